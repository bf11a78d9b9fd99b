use super::*;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio::sync::RwLock;

struct MemoryFile {
    bytes: Vec<u8>,
    content_type: Mime,
    modified: SystemTime,
}

/// Process-local store. Contents are lost on restart.
#[derive(Clone)]
pub struct InMemoryStorage {
    files: Arc<RwLock<HashMap<String, MemoryFile>>>,
    policy: UploadPolicy,
}

impl InMemoryStorage {
    pub fn new(policy: UploadPolicy) -> Self {
        Self {
            files: Arc::new(RwLock::new(HashMap::new())),
            policy,
        }
    }

    // Same contract as the disk backend's create_new: never overwrite.
    async fn insert_new(&self, name: &str, file: MemoryFile) -> Result<(), ApiError> {
        match self.files.write().await.entry(name.to_string()) {
            Entry::Occupied(_) => Err(ApiError::Storage(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{name} already exists"),
            ))),
            Entry::Vacant(slot) => {
                slot.insert(file);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    async fn put(&self, file_data: FileData) -> Result<StoredEntry, ApiError> {
        let content_type = self.policy.check(&file_data)?;
        let name = name::generate(file_data.filename.as_deref());
        let size = file_data.bytes.len() as u64;
        let modified = SystemTime::now();

        self.insert_new(
            &name,
            MemoryFile {
                bytes: file_data.bytes,
                content_type: content_type.clone(),
                modified,
            },
        )
        .await?;

        tracing::info!(name = %name, size, content_type = %content_type, "Stored file in memory");

        Ok(StoredEntry {
            name,
            content_type: content_type.to_string(),
            size,
            modified,
        })
    }

    async fn get(&self, name: &str) -> Result<StoredFile, ApiError> {
        self.files
            .read()
            .await
            .get(name)
            .map(|file| StoredFile {
                bytes: file.bytes.clone(),
                content_type: file.content_type.clone(),
            })
            .ok_or(ApiError::NotFound)
    }

    async fn list(&self) -> Result<Vec<StoredEntry>, ApiError> {
        let mut entries: Vec<StoredEntry> = self
            .files
            .read()
            .await
            .iter()
            .map(|(name, file)| StoredEntry {
                name: name.clone(),
                content_type: file.content_type.to_string(),
                size: file.bytes.len() as u64,
                modified: file.modified,
            })
            .collect();

        sort_newest_first(&mut entries);
        Ok(entries)
    }

    async fn delete(&self, name: &str) -> Result<(), ApiError> {
        self.files
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or(ApiError::NotFound)
    }
}

use super::*;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Flat directory store. The directory listing is the whole index.
pub struct LocalFileStorage {
    storage_path: PathBuf,
    policy: UploadPolicy,
}

impl LocalFileStorage {
    pub fn new(storage_path: PathBuf, policy: UploadPolicy) -> Result<Self, ApiError> {
        if !storage_path.exists() {
            std::fs::create_dir_all(&storage_path)?;
        }
        Ok(Self {
            storage_path,
            policy,
        })
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    // Client names never reach `join` unless they have the generated shape.
    fn path_for(&self, name: &str) -> Result<PathBuf, ApiError> {
        if !name::is_valid(name) {
            tracing::debug!(name = %name, "Rejected malformed file name");
            return Err(ApiError::NotFound);
        }
        Ok(self.storage_path.join(name))
    }
}

fn not_found_or_storage(err: std::io::Error) -> ApiError {
    match err.kind() {
        ErrorKind::NotFound => ApiError::NotFound,
        _ => ApiError::Storage(err),
    }
}

async fn write_contents(file: &mut fs::File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

#[async_trait]
impl Storage for LocalFileStorage {
    fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    async fn put(&self, file_data: FileData) -> Result<StoredEntry, ApiError> {
        let content_type = self.policy.check(&file_data)?;
        let name = name::generate(file_data.filename.as_deref());
        let file_path = self.storage_path.join(&name);

        // create_new: a name collision fails instead of overwriting.
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&file_path)
            .await?;

        if let Err(err) = write_contents(&mut file, &file_data.bytes).await {
            drop(file);
            if let Err(cleanup) = fs::remove_file(&file_path).await {
                tracing::warn!(name = %name, error = %cleanup, "Failed to remove partial upload");
            }
            return Err(err.into());
        }

        let modified = file
            .metadata()
            .await
            .and_then(|m| m.modified())
            .unwrap_or_else(|_| SystemTime::now());

        tracing::info!(
            name = %name,
            size = file_data.bytes.len(),
            content_type = %content_type,
            "Stored file"
        );

        Ok(StoredEntry {
            name,
            content_type: content_type.to_string(),
            size: file_data.bytes.len() as u64,
            modified,
        })
    }

    async fn get(&self, name: &str) -> Result<StoredFile, ApiError> {
        let file_path = self.path_for(name)?;
        let bytes = fs::read(&file_path).await.map_err(not_found_or_storage)?;

        Ok(StoredFile {
            bytes,
            content_type: content_type_for(name),
        })
    }

    async fn list(&self) -> Result<Vec<StoredEntry>, ApiError> {
        let mut entries = fs::read_dir(&self.storage_path).await?;
        let mut files = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if !name::is_valid(file_name) {
                continue;
            }

            // Entries can vanish between read_dir and stat when a delete races us.
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            if !metadata.is_file() {
                continue;
            }

            files.push(StoredEntry {
                name: file_name.to_string(),
                content_type: content_type_for(file_name).to_string(),
                size: metadata.len(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }

        sort_newest_first(&mut files);
        Ok(files)
    }

    async fn delete(&self, name: &str) -> Result<(), ApiError> {
        let file_path = self.path_for(name)?;
        fs::remove_file(file_path)
            .await
            .map_err(not_found_or_storage)?;

        tracing::info!(name = %name, "Deleted file");
        Ok(())
    }
}

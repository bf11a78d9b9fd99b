mod in_memory;
mod local_fs;
pub mod name;

pub use in_memory::InMemoryStorage;
pub use local_fs::LocalFileStorage;

use crate::errors::ApiError;
use async_trait::async_trait;
use mime::Mime;
use std::time::SystemTime;

/// Image types accepted under [`AcceptPolicy::Images`].
pub const IMAGE_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/webp",
    "image/bmp",
    "image/svg+xml",
    "image/tiff",
    "image/avif",
];

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug)]
pub struct FileData {
    pub bytes: Vec<u8>,
    pub content_type: Option<Mime>,
    pub filename: Option<String>,
}

/// A file as it sits in the store. The store keeps no metadata besides the
/// file itself, so `content_type` is whatever was declared on upload for a
/// fresh entry and whatever the extension implies for everything else.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub name: String,
    pub content_type: String,
    pub size: u64,
    pub modified: SystemTime,
}

#[derive(Debug)]
pub struct StoredFile {
    pub bytes: Vec<u8>,
    pub content_type: Mime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptPolicy {
    Images,
    Any,
}

#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub accept: AcceptPolicy,
    pub max_bytes: Option<usize>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            accept: AcceptPolicy::Images,
            max_bytes: Some(DEFAULT_MAX_UPLOAD_BYTES),
        }
    }
}

impl UploadPolicy {
    /// Resolve the declared type against the allow-list.
    pub fn check_type(&self, declared: Option<&Mime>) -> Result<Mime, ApiError> {
        match (self.accept, declared) {
            (AcceptPolicy::Any, Some(mime)) => Ok(mime.clone()),
            (AcceptPolicy::Any, None) => Ok(mime::APPLICATION_OCTET_STREAM),
            (AcceptPolicy::Images, Some(mime)) => {
                let essence = mime.essence_str().to_ascii_lowercase();
                if IMAGE_TYPES.contains(&essence.as_str()) {
                    Ok(mime.clone())
                } else {
                    Err(ApiError::UnsupportedType(essence))
                }
            }
            (AcceptPolicy::Images, None) => {
                Err(ApiError::UnsupportedType("missing content type".to_string()))
            }
        }
    }

    pub fn check_size(&self, size: usize) -> Result<(), ApiError> {
        match self.max_bytes {
            Some(limit) if size > limit => Err(ApiError::PayloadTooLarge { limit }),
            _ => Ok(()),
        }
    }

    pub fn check(&self, file_data: &FileData) -> Result<Mime, ApiError> {
        let content_type = self.check_type(file_data.content_type.as_ref())?;
        self.check_size(file_data.bytes.len())?;
        Ok(content_type)
    }
}

/// Content type served back for a stored name.
pub fn content_type_for(name: &str) -> Mime {
    mime_guess::from_path(name).first_or_octet_stream()
}

/// Newest first, name as tie-break so equal mtimes still list stably.
pub fn sort_newest_first(entries: &mut [StoredEntry]) {
    entries.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
}

#[async_trait]
pub trait Storage: Send + Sync + 'static {
    fn policy(&self) -> &UploadPolicy;
    async fn put(&self, file_data: FileData) -> Result<StoredEntry, ApiError>;
    async fn get(&self, name: &str) -> Result<StoredFile, ApiError>;
    async fn list(&self) -> Result<Vec<StoredEntry>, ApiError>;
    async fn delete(&self, name: &str) -> Result<(), ApiError>;
}

use crate::errors::StartupError;
use crate::storage::{AcceptPolicy, DEFAULT_MAX_UPLOAD_BYTES, UploadPolicy};
use dotenvy::dotenv;
use std::{env, net::SocketAddr, path::PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Local,
    Memory,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_type: StorageType,
    pub storage_path: PathBuf,
    /// Refuse to start unless `storage_path` already exists (a mounted volume).
    pub require_existing_storage: bool,
    pub policy: UploadPolicy,
    pub allow_delete: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, StartupError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StartupError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match var("PORT") {
            Some(port) => port
                .trim()
                .parse()
                .map_err(|_| StartupError::Config(format!("PORT must be a number, got {port:?}")))?,
            None => 3000,
        };

        let storage_type = match var("STORAGE_TYPE").as_deref().map(str::trim) {
            None | Some("local") => StorageType::Local,
            Some("memory") => StorageType::Memory,
            Some(other) => {
                return Err(StartupError::Config(format!(
                    "STORAGE_TYPE must be \"local\" or \"memory\", got {other:?}"
                )));
            }
        };

        let accept = match var("ACCEPT").as_deref().map(str::trim) {
            None | Some("images") => AcceptPolicy::Images,
            Some("any") => AcceptPolicy::Any,
            Some(other) => {
                return Err(StartupError::Config(format!(
                    "ACCEPT must be \"images\" or \"any\", got {other:?}"
                )));
            }
        };

        let max_bytes = match var("MAX_UPLOAD_BYTES").as_deref().map(str::trim) {
            None => Some(DEFAULT_MAX_UPLOAD_BYTES),
            Some("0") | Some("none") => None,
            Some(raw) => Some(raw.parse().map_err(|_| {
                StartupError::Config(format!("MAX_UPLOAD_BYTES must be a byte count, got {raw:?}"))
            })?),
        };

        let allow_delete = match var("ALLOW_DELETE") {
            Some(raw) => parse_bool("ALLOW_DELETE", &raw)?,
            None => accept == AcceptPolicy::Any,
        };

        let require_existing_storage = match var("STORAGE_REQUIRE_EXISTING") {
            Some(raw) => parse_bool("STORAGE_REQUIRE_EXISTING", &raw)?,
            None => false,
        };

        Ok(Self {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            storage_type,
            storage_path: PathBuf::from(var("STORAGE_PATH").unwrap_or_else(|| "./uploads".to_string())),
            require_existing_storage,
            policy: UploadPolicy { accept, max_bytes },
            allow_delete,
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, StartupError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| StartupError::Config(format!("Invalid host or port: {}:{}", self.host, self.port)))
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, StartupError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(StartupError::Config(format!("{key} must be a boolean, got {raw:?}"))),
    }
}

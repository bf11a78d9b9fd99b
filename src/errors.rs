use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("No file provided")]
    NoFileProvided,
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),
    #[error("File exceeds the maximum upload size of {limit} bytes")]
    PayloadTooLarge { limit: usize },
    #[error("File not found")]
    NotFound,
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NoFileProvided | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::UnsupportedType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand back to the client. Filesystem details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Storage(_) => "Failed to access storage".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Storage(_) => tracing::error!("Storage failure: {}", self),
            _ => tracing::debug!("Client error: {}", self),
        }

        let body = json!({
            "success": false,
            "error": self.user_message(),
        });

        (self.status_code(), Json(body)).into_response()
    }
}

/// Failures that stop the server before it starts accepting requests.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Storage directory {0} does not exist; attach the volume before starting")]
    StoragePrereqMissing(String),
    #[error("Failed to prepare storage: {0}")]
    Storage(#[source] ApiError),
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },
    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeployerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("tenant returned HTTP {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml_bw::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("unexpected error: {0}")]
    Other(String),
}

impl DeployerError {
    /// Classify a non-2xx tenant status into the matching error variant.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => DeployerError::Unauthorized(format!("HTTP {status}: {message}")),
            404 => DeployerError::NotFound(message),
            _ => DeployerError::Remote { status, message },
        }
    }
}

pub type Result<T> = std::result::Result<T, DeployerError>;

//! Error types for blobsync

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for blobsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in blobsync operations
///
/// `backend` fields carry a display label such as `s3://bucket` or
/// `file:///data`, never endpoint credentials.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error at {}: {source}", path.display())]
    Path {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Object not found in {backend}: {key}")]
    NotFound { backend: String, key: String },

    #[error("Backend error in {backend} for '{key}': {message}")]
    Backend {
        backend: String,
        key: String,
        message: String,
    },

    #[error("IO error transferring '{key}' for {backend}: {source}")]
    Transfer {
        backend: String,
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Wrap an IO error with the path it happened on
    pub fn at_path(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Path {
            path: path.into(),
            source,
        }
    }

    /// Whether this error means the key does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

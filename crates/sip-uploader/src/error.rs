//! Error taxonomy for the bulk uploader. A single task's failure is always
//! captured here rather than propagated as a panic, so the worker pool can
//! isolate it from the other in-flight uploads.

use std::path::PathBuf;

/// Errors raised while uploading one package to the object store.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("{path}: not a valid UTF-8 file name")]
    InvalidFileName { path: PathBuf },

    #[error("{path} is not a directory")]
    NotADirectory { path: PathBuf },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("object store transfer failed for key {key}: {source}")]
    Store {
        key: String,
        #[source]
        source: object_store::Error,
    },
}

impl UploadError {
    /// Whether a retry of the same upload might succeed. Local filesystem
    /// and naming errors are not; a transport-layer object-store failure
    /// may be transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UploadError::Store { .. })
    }
}

pub type Result<T> = std::result::Result<T, UploadError>;

//! Errors surfaced by credential storage.

use thiserror::Error;

/// Failure while reading or writing persisted credentials.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem access failed.
    #[error("credential storage i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// The credential file could not be serialized or parsed.
    #[error("credential storage serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

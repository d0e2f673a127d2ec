//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The storage medium cannot be reached (unmounted volume, quota, injected fault).
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A truncate or replace was asked to do something impossible.
    #[error("invalid storage request: {0}")]
    InvalidRequest(String),
}

impl StorageError {
    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

//! Error types for the local stores.

use crate::types::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the cache store, the mutation log and the `Outbox` facade.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The partition medium could not be read or written.
    ///
    /// The in-memory view is left as it was before the call; the caller may
    /// retry or carry on without the cache.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] outbox_storage::StorageError),

    /// The mutation log reached its configured capacity.
    #[error("mutation queue is full ({capacity} pending)")]
    QueueFull {
        /// Configured capacity.
        capacity: usize,
    },

    /// A complete partition record failed its checksum or could not be decoded.
    #[error("partition {partition} corrupted at offset {offset}: {message}")]
    Corrupted {
        /// Partition name.
        partition: &'static str,
        /// Byte offset of the bad record.
        offset: u64,
        /// What was wrong.
        message: String,
    },

    /// Payload codec failure.
    #[error("codec error: {0}")]
    Codec(#[from] outbox_codec::CodecError),

    /// Another process holds the store directory.
    #[error("store locked: another process has exclusive access")]
    Locked,

    /// I/O error outside a partition (directory handling).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The referenced mutation is not in the log.
    #[error("mutation {0} is not pending")]
    MutationNotFound(String),

    /// Operation not permitted.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Why the operation was refused.
        message: String,
    },
}

impl StoreError {
    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if retrying the same call later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::StorageUnavailable(_) | StoreError::Io(_))
    }
}

/// Why the server refused a queued mutation.
///
/// Conflicts are surfaced to the application, never resolved silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictReason {
    /// The row changed on the server after the client read it.
    VersionMismatch {
        /// Version the client based its edit on.
        expected: Option<Version>,
        /// Version the server holds now.
        actual: Option<Version>,
    },
    /// The row was deleted on the server.
    RemoteDeleted,
    /// A create used an id the server already holds with different content.
    DuplicateId,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::VersionMismatch { expected, actual } => write!(
                f,
                "version mismatch (based on {}, server has {})",
                Version::describe(*expected),
                Version::describe(*actual)
            ),
            ConflictReason::RemoteDeleted => write!(f, "row deleted on server"),
            ConflictReason::DuplicateId => write!(f, "id already used on server"),
        }
    }
}

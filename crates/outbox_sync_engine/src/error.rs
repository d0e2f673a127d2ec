//! Error types for the sync engine.

use outbox_core::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while talking to the remote store.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote could not process the request.
    #[error("server error: {0}")]
    Server(String),

    /// Malformed or unexpected message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Local store failure during bookkeeping.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The drain was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// The remote call did not finish in time.
    #[error("operation timed out")]
    Timeout,

    /// Connectivity is down.
    #[error("not connected to server")]
    NotConnected,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the same call may succeed later.
    ///
    /// Retryable failures keep the mutation at the head of the log and
    /// go through backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout | SyncError::NotConnected => true,
            _ => false,
        }
    }

    /// Returns true if the remote answered, but not with an outcome.
    ///
    /// Such an answer settles the mutation as failed; resending it would
    /// get the same answer.
    pub fn is_remote_failure(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => !*retryable,
            SyncError::Server(_) | SyncError::Protocol(_) => true,
            _ => false,
        }
    }
}

impl From<outbox_sync_protocol::ProtocolError> for SyncError {
    fn from(err: outbox_sync_protocol::ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::NotConnected.is_retryable());
        assert!(!SyncError::Server("overloaded".into()).is_retryable());
        assert!(!SyncError::Protocol("bad frame".into()).is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::from(StoreError::Locked).is_retryable());
    }

    #[test]
    fn remote_failures_settle_the_mutation() {
        assert!(SyncError::Server("permission denied".into()).is_remote_failure());
        assert!(SyncError::Protocol("unexpected reply".into()).is_remote_failure());
        assert!(SyncError::transport_fatal("invalid certificate").is_remote_failure());
        assert!(!SyncError::transport_retryable("connection lost").is_remote_failure());
        assert!(!SyncError::Timeout.is_remote_failure());
        assert!(!SyncError::Cancelled.is_remote_failure());
        assert!(!SyncError::from(StoreError::Locked).is_remote_failure());
    }

    #[test]
    fn error_display() {
        assert_eq!(SyncError::NotConnected.to_string(), "not connected to server");
        assert_eq!(SyncError::Timeout.to_string(), "operation timed out");
    }
}

//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or interpreting protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A message could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] outbox_codec::CodecError),

    /// The peer speaks another protocol version.
    #[error("unsupported protocol version {found} (expected {expected})")]
    VersionMismatch {
        /// Version this side speaks.
        expected: u16,
        /// Version received.
        found: u16,
    },

    /// A well-formed message arrived where another was expected.
    #[error("unexpected message: expected {expected}, got {got}")]
    UnexpectedMessage {
        /// Expected message kind.
        expected: &'static str,
        /// Received message kind.
        got: &'static str,
    },
}

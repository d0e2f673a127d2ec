//! Error types for the reference server.

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Why a request could not be served.
///
/// `InvalidRequest` and `Protocol` failures are answered with an encoded
/// `Error` message; `NotFound` never reaches the handler.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The body decoded, but is not a request this endpoint accepts.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown endpoint.
    #[error("no such endpoint: {0}")]
    NotFound(String),

    /// The body could not be decoded, or the answer encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] outbox_sync_protocol::ProtocolError),
}

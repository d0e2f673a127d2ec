//! # Outbox Sync Protocol
//!
//! What travels between a client and the authoritative remote store.
//!
//! This crate provides:
//! - [`WriteRequest`] / [`WriteOutcome`]: conditional, idempotent writes
//! - [`ReadRequest`] / [`ReadResponse`]: single-row reads
//! - [`SyncMessage`]: the CBOR envelope for all of the above
//! - [`resolve`]: the pure conflict resolver and its [`MergePolicy`]
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod error;
mod messages;

pub use conflict::{resolve, MergePolicy, Resolution};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    ReadRequest, ReadResponse, RemoteRecord, SyncMessage, WriteOutcome, WriteRequest,
    PROTOCOL_VERSION, READ_PATH, WRITE_PATH,
};

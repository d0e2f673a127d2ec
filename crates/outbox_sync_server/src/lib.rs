//! # Outbox Sync Server
//!
//! Reference authoritative remote store for Outbox clients.
//!
//! This crate provides:
//! - Conditional writes keyed by collection and row id, with a version per row
//! - Idempotent handling of re-submitted mutation ids
//! - Validation rules that reject writes outright
//! - CBOR message dispatch for the `/outbox/write` and `/outbox/read` endpoints
//!
//! The server is in-memory and transport-agnostic; an HTTP front end only
//! has to hand request bodies to [`SyncServer::handle_post`].

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod rows;
mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::RequestHandler;
pub use rows::{AppliedWrite, RowStore};
pub use server::SyncServer;

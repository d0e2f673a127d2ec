//! # Outbox Sync Engine
//!
//! Drains the durable mutation log of an [`outbox_core::Outbox`] into a
//! remote store.
//!
//! This crate provides:
//! - The sync coordinator state machine (idle, draining, backoff)
//! - Retry with immediate attempts, then exponential backoff
//! - Conflict resolution against the row the remote reports
//! - A connectivity monitor the application flips
//! - The remote store abstraction, with an HTTP transport and a scripted mock
//!
//! ## Key Invariants
//!
//! - Mutations reach the remote strictly in the order they were queued
//! - A mutation is settled completely before the next one is sent
//! - Transport failures never drop a mutation
//! - Conflicts and rejections are always surfaced as events

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connectivity;
mod error;
mod http;
mod state;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use connectivity::ConnectivityMonitor;
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpTransport, LoopbackClient, LoopbackServer};
pub use state::{DrainReport, SyncCoordinator, SyncState, SyncStats};
pub use transport::{MockRemote, RemoteStore};

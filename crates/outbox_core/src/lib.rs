//! # Outbox Core
//!
//! Local half of the Outbox offline-first engine.
//!
//! This crate provides:
//! - [`CacheStore`]: durable cache of remote rows with optimistic overlays
//! - [`MutationLog`]: durable FIFO of pending write intents
//! - [`EventFeed`]: sync status events for the application
//! - [`Outbox`]: the facade tying them together under a single write gate
//!
//! Both stores persist into framed, checksummed partitions (see
//! [`partition`]) on any [`outbox_storage::StorageBackend`]. Nothing here
//! talks to the network; delivery lives in `outbox_sync_engine`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
#[cfg(feature = "std")]
mod dir;
mod entity;
mod error;
mod events;
mod log;
mod mutation;
mod outbox;
pub mod partition;
mod types;

pub use cache::{CacheRecord, CacheStore, StoredEntry};
pub use config::StoreConfig;
#[cfg(feature = "std")]
pub use dir::{StoreDir, CACHE_FILE, MUTATIONS_FILE};
pub use entity::{CachedEntity, EntryState, ServerSnapshot};
pub use error::{ConflictReason, StoreError, StoreResult};
pub use events::{EventFeed, SequencedEvent, SyncEvent};
pub use log::{MutationLog, MutationRecord};
pub use mutation::{MutationKind, PendingMutation};
pub use outbox::{Outbox, QueuedCreate};
pub use types::{now_millis, EntityId, MutationId, Version};

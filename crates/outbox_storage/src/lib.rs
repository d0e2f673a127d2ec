//! # Outbox Storage
//!
//! Partition backends for the Outbox offline mutation engine.
//!
//! A backend holds one durable partition (the row cache or the pending
//! mutation log) as an **opaque byte sequence**. Backends never look inside
//! the bytes; record framing, replay and compaction belong to `outbox_core`.
//!
//! ## Design Principles
//!
//! - Writes are appends; a partition is rewritten only as a whole (compaction)
//! - A torn tail left by a crash can be cut off with `truncate`
//! - Must be `Send + Sync`; callers wrap backends in their own lock
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and cache-less operation, with fault injection
//! - [`FileBackend`] - For persistent partitions on the local file system
//!
//! ## Example
//!
//! ```rust
//! use outbox_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! backend.append(b"hello ").unwrap();
//! backend.append(b"world").unwrap();
//! assert_eq!(backend.read_all().unwrap(), b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::{FaultSwitch, InMemoryBackend};

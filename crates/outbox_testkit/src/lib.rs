//! # Outbox Testkit
//!
//! Test utilities for Outbox.
//!
//! This crate provides:
//! - Outbox fixtures (in-memory, file-backed, with injectable storage faults)
//! - Property-based generators for documents and mutation scripts
//! - A reference executor that applies a script straight to a row model
//!
//! ## Usage
//!
//! ```rust
//! use outbox_testkit::prelude::*;
//!
//! let store = TestOutbox::memory();
//! store.queue_create("tasks", task("write tests")).unwrap();
//! assert_eq!(store.pending_count(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod reference;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::reference::*;
}

pub use fixtures::*;
pub use generators::*;
pub use reference::*;

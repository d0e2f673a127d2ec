//! Server configuration.

use std::collections::BTreeSet;

/// Configuration for the reference server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// How many applied mutation ids are remembered for idempotent re-submission.
    pub idempotency_window: usize,
    /// Maximum number of fields in one write; larger writes are rejected.
    pub max_fields: usize,
    /// Collections that refuse every write.
    pub read_only: BTreeSet<String>,
}

impl ServerConfig {
    /// Creates a configuration with default limits.
    pub fn new() -> Self {
        Self {
            idempotency_window: 100_000,
            max_fields: 256,
            read_only: BTreeSet::new(),
        }
    }

    /// Sets the idempotency window.
    pub fn with_idempotency_window(mut self, window: usize) -> Self {
        self.idempotency_window = window;
        self
    }

    /// Sets the maximum number of fields per write.
    pub fn with_max_fields(mut self, max: usize) -> Self {
        self.max_fields = max;
        self
    }

    /// Marks a collection read-only.
    pub fn with_read_only(mut self, collection: impl Into<String>) -> Self {
        self.read_only.insert(collection.into());
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

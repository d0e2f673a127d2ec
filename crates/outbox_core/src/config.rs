//! Local store configuration.

/// Configuration for opening an [`crate::Outbox`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether to create the store directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Maximum number of pending mutations; enqueue fails with `QueueFull` beyond it.
    pub queue_capacity: usize,

    /// Whether to sync each partition write to disk (safer but slower).
    pub sync_on_write: bool,

    /// Minimum number of superseded records before a partition is compacted.
    pub compact_threshold: u64,

    /// Number of recent events kept for polling.
    pub event_history: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            queue_capacity: 10_000,
            sync_on_write: true,
            compact_threshold: 1024,
            event_history: 1000,
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the mutation queue capacity.
    #[must_use]
    pub const fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets whether partition writes are synced.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets the compaction threshold.
    #[must_use]
    pub const fn compact_threshold(mut self, records: u64) -> Self {
        self.compact_threshold = records;
        self
    }

    /// Sets the event history length.
    #[must_use]
    pub const fn event_history(mut self, events: usize) -> Self {
        self.event_history = events;
        self
    }
}

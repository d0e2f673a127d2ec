//! Outbox fixtures.

use outbox_codec::{document, Document, Value};
use outbox_core::{EntityId, Outbox, StoreConfig};
use outbox_storage::{FaultSwitch, InMemoryBackend};
use outbox_sync_server::SyncServer;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// An outbox with automatic cleanup.
///
/// The outbox is shared so a sync coordinator can hold it too.
pub struct TestOutbox {
    /// The outbox instance.
    pub outbox: Arc<Outbox>,
    // kept alive so the directory outlives the outbox
    temp_dir: Option<TempDir>,
}

impl TestOutbox {
    /// Creates an in-memory outbox.
    pub fn memory() -> Self {
        Self {
            outbox: Arc::new(Outbox::in_memory().expect("Failed to open in-memory outbox")),
            temp_dir: None,
        }
    }

    /// Creates an outbox in a fresh temporary directory.
    pub fn file() -> Self {
        Self::file_with_config(StoreConfig::default())
    }

    /// Creates a file-backed outbox with the given configuration.
    pub fn file_with_config(config: StoreConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let outbox = Outbox::open(&store_path(temp_dir.path()), config)
            .expect("Failed to open file outbox");
        Self {
            outbox: Arc::new(outbox),
            temp_dir: Some(temp_dir),
        }
    }

    /// Closes and reopens a file-backed outbox, replaying its partitions.
    ///
    /// In-memory outboxes are returned unchanged. Panics if another clone
    /// of the outbox is still alive, since it keeps the directory locked.
    pub fn reopen(self) -> Self {
        let Self { outbox, temp_dir } = self;
        let Some(temp_dir) = temp_dir else {
            return Self {
                outbox,
                temp_dir: None,
            };
        };
        drop(outbox);
        let outbox = Outbox::open(&store_path(temp_dir.path()), StoreConfig::default())
            .expect("Failed to reopen file outbox");
        Self {
            outbox: Arc::new(outbox),
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns a handle to the outbox.
    pub fn shared(&self) -> Arc<Outbox> {
        Arc::clone(&self.outbox)
    }

    /// Returns the store directory if file-backed.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|d| store_path(d.path()))
    }
}

impl std::ops::Deref for TestOutbox {
    type Target = Outbox;

    fn deref(&self) -> &Self::Target {
        &self.outbox
    }
}

fn store_path(root: &Path) -> PathBuf {
    root.join("outbox")
}

/// An in-memory outbox whose partitions can be made unavailable.
pub struct FaultyOutbox {
    /// The outbox instance.
    pub outbox: Outbox,
    /// Fails every cache partition operation while set.
    pub cache_faults: FaultSwitch,
    /// Fails every mutation log operation while set.
    pub log_faults: FaultSwitch,
}

impl FaultyOutbox {
    /// Creates the outbox with both switches off.
    pub fn new(config: StoreConfig) -> Self {
        let cache = InMemoryBackend::new();
        let log = InMemoryBackend::new();
        let cache_faults = cache.fault_switch();
        let log_faults = log.fault_switch();
        let outbox = Outbox::open_with_backends(Box::new(cache), Box::new(log), config)
            .expect("Failed to open faulty outbox");
        Self {
            outbox,
            cache_faults,
            log_faults,
        }
    }
}

impl std::ops::Deref for FaultyOutbox {
    type Target = Outbox;

    fn deref(&self) -> &Self::Target {
        &self.outbox
    }
}

/// A task row with a title and an open flag.
pub fn task(title: &str) -> Document {
    document([("title", Value::from(title)), ("done", Value::from(false))])
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use outbox_sync_server::ServerConfig;

    /// A server holding `count` task rows in `collection`, written directly.
    pub fn seeded_server(collection: &str, count: usize) -> (SyncServer, Vec<EntityId>) {
        let server = SyncServer::new(ServerConfig::default());
        let ids = (0..count)
            .map(|i| {
                let id = EntityId::new();
                server.put_direct(collection, id, &task(&format!("task {i}")));
                id
            })
            .collect();
        (server, ids)
    }

    /// Reads every seeded row from the server into the outbox cache.
    pub fn mirror_rows(outbox: &Outbox, server: &SyncServer, collection: &str) {
        for (id, row) in server.rows_in(collection) {
            outbox
                .store_remote_read(collection, id, Some(row))
                .expect("Failed to store remote row");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outbox_core::StoreError;

    #[test]
    fn file_outbox_survives_reopen() {
        let store = TestOutbox::file();
        let queued = store.queue_create("tasks", task("a")).unwrap();
        assert!(store.path().is_some());

        let store = store.reopen();
        assert_eq!(store.pending_count(), 1);
        assert_eq!(store.next_pending().unwrap().id, queued.mutation_id);
        assert!(store.read_cached("tasks", queued.entity_id).is_some());
    }

    #[test]
    fn log_fault_refuses_queueing() {
        let store = FaultyOutbox::new(StoreConfig::default());
        store.log_faults.set_unavailable(true);
        assert!(matches!(
            store.queue_create("tasks", task("a")),
            Err(StoreError::StorageUnavailable(_))
        ));
        assert_eq!(store.pending_count(), 0);

        store.log_faults.set_unavailable(false);
        store.queue_create("tasks", task("a")).unwrap();
        assert_eq!(store.pending_count(), 1);
    }

    #[test]
    fn seeded_rows_mirror_into_cache() {
        let (server, ids) = scenarios::seeded_server("tasks", 3);
        let store = TestOutbox::memory();
        scenarios::mirror_rows(&store, &server, "tasks");
        assert_eq!(store.read_cached_list("tasks").len(), 3);
        for id in ids {
            assert!(store.read_cached("tasks", id).is_some());
        }
    }
}

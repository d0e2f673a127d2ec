//! The `Outbox` facade: cached reads, queued writes and sync bookkeeping.

use crate::cache::CacheStore;
use crate::config::StoreConfig;
use crate::entity::{CachedEntity, ServerSnapshot};
use crate::error::{ConflictReason, StoreResult};
use crate::events::{EventFeed, SyncEvent};
use crate::log::MutationLog;
use crate::mutation::{MutationKind, PendingMutation};
use crate::types::{EntityId, MutationId, Version};
use outbox_codec::Document;
use outbox_storage::{InMemoryBackend, StorageBackend};
use parking_lot::Mutex;
use std::sync::mpsc::Receiver;
use tracing::{debug, info, warn};

#[cfg(feature = "std")]
use crate::dir::StoreDir;
#[cfg(feature = "std")]
use outbox_storage::FileBackend;
#[cfg(feature = "std")]
use std::path::Path;

/// Ids assigned to a queued create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedCreate {
    /// The queued mutation.
    pub mutation_id: MutationId,
    /// Client-generated id of the new row.
    pub entity_id: EntityId,
}

/// Local half of the offline-first engine.
///
/// The application reads and writes through this type; the sync
/// coordinator settles queued mutations through its bookkeeping methods.
/// Queueing and bookkeeping share one write gate, so a mutation's log
/// entry and its cache patch always change together.
///
/// # Example
///
/// ```rust
/// use outbox_codec::{document, Value};
/// use outbox_core::Outbox;
///
/// let outbox = Outbox::in_memory().unwrap();
/// let created = outbox
///     .queue_create("tasks", document([("title", Value::from("Buy milk"))]))
///     .unwrap();
///
/// let view = outbox.read_cached("tasks", created.entity_id).unwrap();
/// assert!(view.is_pending());
/// assert_eq!(outbox.pending_count(), 1);
/// ```
pub struct Outbox {
    cache: CacheStore,
    log: MutationLog,
    events: EventFeed,
    gate: Mutex<()>,
    #[cfg(feature = "std")]
    _dir: Option<StoreDir>,
}

impl Outbox {
    /// Opens a store directory, taking its lock and replaying both partitions.
    ///
    /// # Errors
    ///
    /// Returns `Locked` if another process holds the directory, or a storage
    /// error if a partition cannot be replayed.
    #[cfg(feature = "std")]
    pub fn open(path: &Path, config: StoreConfig) -> StoreResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing)?;
        let cache = FileBackend::open(&dir.cache_path())?;
        let log = FileBackend::open(&dir.mutations_path())?;
        let mut outbox = Self::open_with_backends(Box::new(cache), Box::new(log), config)?;
        info!(path = %path.display(), pending = outbox.pending_count(), "outbox opened");
        outbox._dir = Some(dir);
        Ok(outbox)
    }

    /// Opens the outbox on caller-supplied partition backends.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a partition cannot be replayed.
    pub fn open_with_backends(
        cache_backend: Box<dyn StorageBackend>,
        log_backend: Box<dyn StorageBackend>,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        Ok(Self {
            cache: CacheStore::open(cache_backend, &config)?,
            log: MutationLog::open(log_backend, &config)?,
            events: EventFeed::with_max_history(config.event_history),
            gate: Mutex::new(()),
            #[cfg(feature = "std")]
            _dir: None,
        })
    }

    /// Opens a non-persistent outbox.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature matches the other constructors.
    pub fn in_memory() -> StoreResult<Self> {
        Self::open_with_backends(
            Box::new(InMemoryBackend::new()),
            Box::new(InMemoryBackend::new()),
            StoreConfig::default(),
        )
    }

    // ---- reads ----

    /// Returns the cached view of a row, tombstones included.
    pub fn read_cached(&self, collection: &str, id: EntityId) -> Option<CachedEntity> {
        self.cache.get(collection, id)
    }

    /// Returns the cached, non-deleted rows of a collection.
    pub fn read_cached_list(&self, collection: &str) -> Vec<CachedEntity> {
        self.cache.list(collection)
    }

    // ---- writes ----

    /// Queues the creation of a new row with a client-generated id.
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` or `StorageUnavailable`. Nothing is queued on error.
    pub fn queue_create(&self, collection: &str, data: Document) -> StoreResult<QueuedCreate> {
        let entity_id = EntityId::new();
        let mutation = PendingMutation::create(collection, entity_id, data.clone());
        let mutation_id = self.enqueue_with_patch(mutation, |cache| {
            cache.patch_optimistic(collection, entity_id, data, None)
        })?;
        Ok(QueuedCreate {
            mutation_id,
            entity_id,
        })
    }

    /// Queues an update of the given fields of a row.
    ///
    /// `base_version` is the server version the edit was made against.
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` or `StorageUnavailable`. Nothing is queued on error.
    pub fn queue_update(
        &self,
        collection: &str,
        id: EntityId,
        data: Document,
        base_version: Option<Version>,
    ) -> StoreResult<MutationId> {
        let base_fields = self.base_fields(collection, id, &data, base_version);
        let mut mutation = PendingMutation::update(collection, id, data.clone(), base_version);
        if let Some(fields) = base_fields {
            mutation = mutation.with_base_fields(fields);
        }

        self.enqueue_with_patch(mutation, |cache| {
            let current = cache.get(collection, id).filter(|view| !view.is_tombstone());
            let version = current
                .as_ref()
                .and_then(|view| view.server_version)
                .or(base_version);
            let mut payload = current.map(|view| view.payload).unwrap_or_default();
            payload.extend(data);
            cache.patch_optimistic(collection, id, payload, version)
        })
    }

    /// Queues the deletion of a row.
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` or `StorageUnavailable`. Nothing is queued on error.
    pub fn queue_delete(
        &self,
        collection: &str,
        id: EntityId,
        base_version: Option<Version>,
    ) -> StoreResult<MutationId> {
        let mutation = PendingMutation::delete(collection, id, base_version);
        self.enqueue_with_patch(mutation, |cache| {
            cache.mark_deleted_optimistic(collection, id)
        })
    }

    /// Confirmed values of the touched fields, if the cache holds the base.
    fn base_fields(
        &self,
        collection: &str,
        id: EntityId,
        data: &Document,
        base_version: Option<Version>,
    ) -> Option<Document> {
        let confirmed = self.cache.confirmed(collection, id);
        match (&confirmed, base_version) {
            (Some(snapshot), Some(base)) if snapshot.version == base => Some(
                data.keys()
                    .filter_map(|k| snapshot.payload.get(k).map(|v| (k.clone(), v.clone())))
                    .collect(),
            ),
            (None, None) => Some(Document::new()),
            _ => None,
        }
    }

    fn enqueue_with_patch<F>(&self, mutation: PendingMutation, patch: F) -> StoreResult<MutationId>
    where
        F: FnOnce(&CacheStore) -> StoreResult<()>,
    {
        let _gate = self.gate.lock();
        let id = mutation.id;
        self.log.enqueue(mutation.clone())?;

        if let Err(e) = patch(&self.cache) {
            if let Err(undo) = self.log.remove(id) {
                warn!(mutation = %id, error = %undo, "could not withdraw mutation after failed cache patch");
            }
            return Err(e);
        }

        debug!(%mutation, "mutation queued");
        self.events.emit(SyncEvent::Queued { mutation });
        Ok(id)
    }

    // ---- events ----

    /// Subscribes to sync events.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// The event feed.
    pub fn events(&self) -> &EventFeed {
        &self.events
    }

    /// Publishes an event on the feed.
    pub fn emit(&self, event: SyncEvent) {
        self.events.emit(event);
    }

    // ---- pending mutations ----

    /// Every pending mutation, oldest first.
    pub fn pending(&self) -> Vec<PendingMutation> {
        self.log.list_all()
    }

    /// Number of pending mutations.
    pub fn pending_count(&self) -> usize {
        self.log.len()
    }

    /// The oldest pending mutation.
    pub fn next_pending(&self) -> Option<PendingMutation> {
        self.log.peek_oldest()
    }

    /// The cache store.
    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// The mutation log.
    pub fn log(&self) -> &MutationLog {
        &self.log
    }

    /// Compacts both partitions.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if a rewrite fails.
    pub fn compact(&self) -> StoreResult<()> {
        let _gate = self.gate.lock();
        self.cache.compact()?;
        self.log.compact()
    }

    // ---- bookkeeping (sync coordinator) ----

    /// Settles a mutation the server applied.
    ///
    /// `result` is the row as the server now holds it, `None` after a
    /// delete. Later pending edits of the row built on the same base are
    /// rebased onto the new version.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if a partition write fails. The
    /// mutation then stays queued; re-submitting it is answered from the
    /// remote's memory of applied ids.
    pub fn complete_applied(
        &self,
        mutation: &PendingMutation,
        result: Option<ServerSnapshot>,
    ) -> StoreResult<()> {
        let _gate = self.gate.lock();
        let keep_overlay = !self.later_pending(mutation).is_empty();
        self.cache.confirm(
            &mutation.collection,
            mutation.entity_id,
            result.clone(),
            keep_overlay,
        )?;
        if let Some(snapshot) = &result {
            self.log.rebase(mutation, snapshot.version, &snapshot.payload)?;
        }
        self.log.remove(mutation.id)?;

        self.events.emit(SyncEvent::Applied {
            mutation_id: mutation.id,
            collection: mutation.collection.clone(),
            entity_id: mutation.entity_id,
            version: result.map(|s| s.version),
        });
        Ok(())
    }

    /// Settles a mutation refused because the row moved on.
    ///
    /// The cache shows the server's row again (a tombstone if it is gone),
    /// with any later pending edits of the row stacked on top.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if a partition write fails.
    pub fn complete_conflict(
        &self,
        mutation: &PendingMutation,
        reason: ConflictReason,
        server: Option<ServerSnapshot>,
    ) -> StoreResult<()> {
        let _gate = self.gate.lock();
        self.roll_back(mutation, server.clone(), true)?;
        self.log.remove(mutation.id)?;

        self.events.emit(SyncEvent::SyncConflict {
            mutation: mutation.clone(),
            reason,
            server,
        });
        Ok(())
    }

    /// Settles a mutation the remote rejected outright.
    ///
    /// The cache shows the last confirmed state from before the mutation,
    /// with any later pending edits of the row stacked on top.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if a partition write fails.
    pub fn complete_failed(&self, mutation: &PendingMutation, reason: String) -> StoreResult<()> {
        let _gate = self.gate.lock();
        let confirmed = self.cache.confirmed(&mutation.collection, mutation.entity_id);
        self.roll_back(mutation, confirmed, false)?;
        self.log.remove(mutation.id)?;

        self.events.emit(SyncEvent::SyncFailed {
            mutation: mutation.clone(),
            reason,
        });
        Ok(())
    }

    /// Durably records a failed delivery attempt and returns the new count.
    ///
    /// # Errors
    ///
    /// Returns `MutationNotFound` or `StorageUnavailable`.
    pub fn record_attempt(&self, id: MutationId) -> StoreResult<u32> {
        let _gate = self.gate.lock();
        self.log.increment_attempts(id)
    }

    /// Stores the result of a remote read as confirmed state.
    ///
    /// Pending optimistic views stay visible. A row the server no longer
    /// holds becomes a tombstone unless local edits of it are pending.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the cache write fails.
    pub fn store_remote_read(
        &self,
        collection: &str,
        id: EntityId,
        server: Option<ServerSnapshot>,
    ) -> StoreResult<()> {
        let _gate = self.gate.lock();
        let pending = self.log.has_pending_for(collection, id);
        match (server, pending) {
            (snapshot, true) => self.cache.confirm(collection, id, snapshot, true),
            (Some(snapshot), false) => self.cache.confirm(collection, id, Some(snapshot), false),
            (None, false) => self.cache.rollback(collection, id, None, true),
        }
    }

    fn later_pending(&self, mutation: &PendingMutation) -> Vec<PendingMutation> {
        self.log
            .list_all()
            .into_iter()
            .filter(|m| m.id != mutation.id && m.targets(&mutation.collection, mutation.entity_id))
            .collect()
    }

    /// Drops `mutation`'s effect from the cache, keeping the row's other
    /// pending edits visible.
    fn roll_back(
        &self,
        mutation: &PendingMutation,
        server: Option<ServerSnapshot>,
        tombstone_if_absent: bool,
    ) -> StoreResult<()> {
        let later = self.later_pending(mutation);
        if later.is_empty() {
            return self.cache.rollback(
                &mutation.collection,
                mutation.entity_id,
                server,
                tombstone_if_absent,
            );
        }
        let overlay = replay_pending(server.as_ref(), &later);
        self.cache
            .restack(&mutation.collection, mutation.entity_id, server, overlay)
    }
}

/// The view pending mutations produce on top of a server row, in queue order.
fn replay_pending(base: Option<&ServerSnapshot>, pending: &[PendingMutation]) -> Option<Document> {
    let mut view = base.map(|s| s.payload.clone());
    for m in pending {
        match m.kind {
            MutationKind::Create => view = Some(m.data.clone()),
            MutationKind::Update => view.get_or_insert_with(Document::new).extend(m.data.clone()),
            MutationKind::Delete => view = None,
        }
    }
    view
}

//! Durable cache of remote rows.
//!
//! The cache answers reads while offline. Each row keeps two things: the
//! view the application sees, and the last snapshot the server confirmed.
//! Optimistic edits replace the view only, so a rejected edit rolls back
//! to exactly what the server last said.
//!
//! Every change is appended to the cache partition before the in-memory
//! map is touched. A failed append leaves the map as it was.

use crate::config::StoreConfig;
use crate::entity::{CachedEntity, EntryState, ServerSnapshot};
use crate::error::{StoreError, StoreResult};
use crate::partition::{Partition, PartitionRecord};
use crate::types::{EntityId, Version};
use outbox_codec::{from_cbor, to_cbor, Document};
use outbox_storage::StorageBackend;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

const RECORD_PUT: u8 = 1;
const RECORD_REMOVE: u8 = 2;

/// Everything the cache holds for one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    /// Collection name.
    pub collection: String,
    /// Row id.
    pub id: EntityId,
    /// What reads return. `None` while a local delete is pending.
    pub view: Option<CachedEntity>,
    /// Last state the server confirmed, if the row exists there.
    pub confirmed: Option<ServerSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RowKey {
    collection: String,
    id: EntityId,
}

/// A record in the cache partition.
#[derive(Debug, Clone)]
pub enum CacheRecord {
    /// Full state of one row.
    Put(StoredEntry),
    /// The row was dropped from the cache.
    Remove {
        /// Collection name.
        collection: String,
        /// Row id.
        id: EntityId,
    },
}

impl PartitionRecord for CacheRecord {
    const MAGIC: [u8; 4] = *b"OBXC";
    const NAME: &'static str = "cache";

    fn record_type(&self) -> u8 {
        match self {
            CacheRecord::Put(_) => RECORD_PUT,
            CacheRecord::Remove { .. } => RECORD_REMOVE,
        }
    }

    fn encode_payload(&self) -> StoreResult<Vec<u8>> {
        let bytes = match self {
            CacheRecord::Put(entry) => to_cbor(entry)?,
            CacheRecord::Remove { collection, id } => to_cbor(&RowKey {
                collection: collection.clone(),
                id: *id,
            })?,
        };
        Ok(bytes)
    }

    fn decode_payload(record_type: u8, payload: &[u8]) -> StoreResult<Self> {
        match record_type {
            RECORD_PUT => Ok(CacheRecord::Put(from_cbor(payload)?)),
            RECORD_REMOVE => {
                let key: RowKey = from_cbor(payload)?;
                Ok(CacheRecord::Remove {
                    collection: key.collection,
                    id: key.id,
                })
            }
            other => Err(StoreError::invalid_operation(format!(
                "unknown cache record type {other}"
            ))),
        }
    }
}

type Key = (String, EntityId);

struct CacheInner {
    partition: Partition<CacheRecord>,
    entries: BTreeMap<Key, StoredEntry>,
}

/// The durable cache store.
pub struct CacheStore {
    inner: RwLock<CacheInner>,
    compact_threshold: u64,
}

impl CacheStore {
    /// Opens the cache on a backend and replays its partition.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` or `Corrupted` if the partition cannot be replayed.
    pub fn open(backend: Box<dyn StorageBackend>, config: &StoreConfig) -> StoreResult<Self> {
        let (partition, records) = Partition::<CacheRecord>::open(backend, config.sync_on_write)?;

        let mut entries = BTreeMap::new();
        for record in records {
            match record {
                CacheRecord::Put(entry) => {
                    entries.insert((entry.collection.clone(), entry.id), entry);
                }
                CacheRecord::Remove { collection, id } => {
                    entries.remove(&(collection, id));
                }
            }
        }
        debug!(rows = entries.len(), "cache store opened");

        Ok(Self {
            inner: RwLock::new(CacheInner { partition, entries }),
            compact_threshold: config.compact_threshold,
        })
    }

    /// Returns the visible copy of a row.
    ///
    /// Server-deleted rows come back as tombstones. A row with a pending
    /// local delete, or one never fetched, returns `None`.
    pub fn get(&self, collection: &str, id: EntityId) -> Option<CachedEntity> {
        let inner = self.inner.read();
        inner
            .entries
            .get(&(collection.to_string(), id))
            .and_then(|entry| entry.view.clone())
    }

    /// Returns every visible, non-deleted row of a collection in id order.
    pub fn list(&self, collection: &str) -> Vec<CachedEntity> {
        let inner = self.inner.read();
        inner
            .entries
            .values()
            .filter(|entry| entry.collection == collection)
            .filter_map(|entry| entry.view.as_ref())
            .filter(|view| !view.is_tombstone())
            .cloned()
            .collect()
    }

    /// Returns the last server-confirmed snapshot of a row.
    pub fn confirmed(&self, collection: &str, id: EntityId) -> Option<ServerSnapshot> {
        let inner = self.inner.read();
        inner
            .entries
            .get(&(collection.to_string(), id))
            .and_then(|entry| entry.confirmed.clone())
    }

    /// Returns the full stored entry of a row.
    pub fn entry(&self, collection: &str, id: EntityId) -> Option<StoredEntry> {
        let inner = self.inner.read();
        inner.entries.get(&(collection.to_string(), id)).cloned()
    }

    /// Returns every stored entry, tombstones and pending deletes included.
    pub fn entries(&self) -> Vec<StoredEntry> {
        self.inner.read().entries.values().cloned().collect()
    }

    /// Upserts a row.
    ///
    /// A confirmed entity also becomes the row's confirmed snapshot; a
    /// tombstone clears it; a pending entity keeps the snapshot already held.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the write does not reach the partition.
    pub fn put(&self, entity: CachedEntity) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let key = (entity.collection.clone(), entity.id);
        let confirmed = match (entity.state, entity.server_version) {
            (EntryState::Confirmed, Some(version)) => {
                Some(ServerSnapshot::new(entity.payload.clone(), version))
            }
            (EntryState::Tombstoned, _) => None,
            _ => inner
                .entries
                .get(&key)
                .and_then(|entry| entry.confirmed.clone()),
        };
        let entry = StoredEntry {
            collection: entity.collection.clone(),
            id: entity.id,
            view: Some(entity),
            confirmed,
        };
        self.store(&mut inner, entry)
    }

    /// Drops a row from the cache.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the write does not reach the partition.
    pub fn remove(&self, collection: &str, id: EntityId) -> StoreResult<()> {
        let mut inner = self.inner.write();
        self.drop_row(&mut inner, collection, id)
    }

    /// Shows an optimistic payload for a row, keeping its confirmed snapshot.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the write does not reach the partition.
    pub fn patch_optimistic(
        &self,
        collection: &str,
        id: EntityId,
        payload: Document,
        server_version: Option<Version>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let confirmed = inner
            .entries
            .get(&(collection.to_string(), id))
            .and_then(|entry| entry.confirmed.clone());
        let entry = StoredEntry {
            collection: collection.to_string(),
            id,
            view: Some(CachedEntity {
                collection: collection.to_string(),
                id,
                payload,
                server_version,
                state: EntryState::Pending,
            }),
            confirmed,
        };
        self.store(&mut inner, entry)
    }

    /// Hides a row until its pending delete is settled.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the write does not reach the partition.
    pub fn mark_deleted_optimistic(&self, collection: &str, id: EntityId) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let confirmed = inner
            .entries
            .get(&(collection.to_string(), id))
            .and_then(|entry| entry.confirmed.clone());
        if confirmed.is_none() {
            return self.drop_row(&mut inner, collection, id);
        }
        let entry = StoredEntry {
            collection: collection.to_string(),
            id,
            view: None,
            confirmed,
        };
        self.store(&mut inner, entry)
    }

    /// Records what the server confirmed for a row.
    ///
    /// With `keep_overlay` the visible view stays as it is (later pending
    /// mutations of the row still overlay it) and only its server version
    /// moves forward. Otherwise the view becomes the snapshot. `None` means
    /// the server confirmed the row gone.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the write does not reach the partition.
    pub fn confirm(
        &self,
        collection: &str,
        id: EntityId,
        snapshot: Option<ServerSnapshot>,
        keep_overlay: bool,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let current = inner.entries.get(&(collection.to_string(), id)).cloned();

        let view = if keep_overlay {
            current.and_then(|entry| entry.view).map(|mut view| {
                if view.is_pending() {
                    view.server_version = snapshot.as_ref().map(|s| s.version);
                }
                view
            })
        } else {
            snapshot.as_ref().map(|s| s.to_entity(collection, id))
        };

        if view.is_none() && snapshot.is_none() {
            return self.drop_row(&mut inner, collection, id);
        }
        let entry = StoredEntry {
            collection: collection.to_string(),
            id,
            view,
            confirmed: snapshot,
        };
        self.store(&mut inner, entry)
    }

    /// Discards any optimistic view and shows the given server state.
    ///
    /// When the server holds no row, the cache keeps a tombstone if
    /// `tombstone_if_absent` is set and forgets the row otherwise.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the write does not reach the partition.
    pub fn rollback(
        &self,
        collection: &str,
        id: EntityId,
        server: Option<ServerSnapshot>,
        tombstone_if_absent: bool,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let entry = match server {
            Some(snapshot) => StoredEntry {
                collection: collection.to_string(),
                id,
                view: Some(snapshot.to_entity(collection, id)),
                confirmed: Some(snapshot),
            },
            None if tombstone_if_absent => StoredEntry {
                collection: collection.to_string(),
                id,
                view: Some(CachedEntity {
                    collection: collection.to_string(),
                    id,
                    payload: Document::new(),
                    server_version: None,
                    state: EntryState::Tombstoned,
                }),
                confirmed: None,
            },
            None => return self.drop_row(&mut inner, collection, id),
        };
        self.store(&mut inner, entry)
    }

    /// Records a new confirmed state with pending edits stacked on top.
    ///
    /// `overlay` is the payload the remaining pending mutations of the row
    /// produce; `None` hides the row behind a pending delete.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the write does not reach the partition.
    pub fn restack(
        &self,
        collection: &str,
        id: EntityId,
        confirmed: Option<ServerSnapshot>,
        overlay: Option<Document>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write();
        if overlay.is_none() && confirmed.is_none() {
            return self.drop_row(&mut inner, collection, id);
        }
        let view = overlay.map(|payload| CachedEntity {
            collection: collection.to_string(),
            id,
            payload,
            server_version: confirmed.as_ref().map(|s| s.version),
            state: EntryState::Pending,
        });
        let entry = StoredEntry {
            collection: collection.to_string(),
            id,
            view,
            confirmed,
        };
        self.store(&mut inner, entry)
    }

    /// Number of rows held, tombstones included.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Returns true if the cache holds no rows.
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Number of superseded records in the partition.
    pub fn dead_records(&self) -> u64 {
        let inner = self.inner.read();
        inner
            .partition
            .record_count()
            .saturating_sub(inner.entries.len() as u64)
    }

    /// Rewrites the partition from the live rows.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the rewrite fails; the old partition stays.
    pub fn compact(&self) -> StoreResult<()> {
        let mut inner = self.inner.write();
        Self::rewrite(&mut inner)
    }

    fn rewrite(inner: &mut CacheInner) -> StoreResult<()> {
        let records: Vec<CacheRecord> = inner
            .entries
            .values()
            .cloned()
            .map(CacheRecord::Put)
            .collect();
        inner.partition.rewrite(records.iter())
    }

    fn store(&self, inner: &mut CacheInner, entry: StoredEntry) -> StoreResult<()> {
        let record = CacheRecord::Put(entry);
        inner.partition.append(&record)?;
        if let CacheRecord::Put(entry) = record {
            inner
                .entries
                .insert((entry.collection.clone(), entry.id), entry);
        }
        self.maybe_compact(inner);
        Ok(())
    }

    fn drop_row(&self, inner: &mut CacheInner, collection: &str, id: EntityId) -> StoreResult<()> {
        let key = (collection.to_string(), id);
        if !inner.entries.contains_key(&key) {
            return Ok(());
        }
        inner.partition.append(&CacheRecord::Remove {
            collection: collection.to_string(),
            id,
        })?;
        inner.entries.remove(&key);
        self.maybe_compact(inner);
        Ok(())
    }

    fn maybe_compact(&self, inner: &mut CacheInner) {
        let live = inner.entries.len() as u64;
        let dead = inner.partition.record_count().saturating_sub(live);
        if dead >= self.compact_threshold && dead > live {
            if let Err(e) = Self::rewrite(inner) {
                warn!(error = %e, "cache compaction failed; will retry on a later write");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outbox_codec::{document, Value};
    use outbox_storage::InMemoryBackend;

    fn open(backend: &InMemoryBackend) -> CacheStore {
        CacheStore::open(Box::new(backend.clone()), &StoreConfig::default()).unwrap()
    }

    fn title(t: &str) -> Document {
        document([("title", Value::from(t))])
    }

    #[test]
    fn put_get_list() {
        let cache = open(&InMemoryBackend::new());
        let a = EntityId::new();
        let b = EntityId::new();
        cache
            .put(CachedEntity::confirmed("tasks", a, title("a"), Version::new(1)))
            .unwrap();
        cache
            .put(CachedEntity::confirmed("notes", b, title("b"), Version::new(1)))
            .unwrap();

        let got = cache.get("tasks", a).unwrap();
        assert_eq!(got.payload, title("a"));
        assert_eq!(got.state, EntryState::Confirmed);
        assert_eq!(cache.list("tasks").len(), 1);
        assert!(cache.get("tasks", b).is_none());
        assert_eq!(
            cache.confirmed("tasks", a),
            Some(ServerSnapshot::new(title("a"), Version::new(1)))
        );
    }

    #[test]
    fn state_survives_reopen() {
        let backend = InMemoryBackend::new();
        let id = EntityId::new();
        {
            let cache = open(&backend);
            cache
                .put(CachedEntity::confirmed("tasks", id, title("v1"), Version::new(1)))
                .unwrap();
            cache
                .patch_optimistic("tasks", id, title("local"), Some(Version::new(1)))
                .unwrap();
        }

        let cache = open(&backend);
        let view = cache.get("tasks", id).unwrap();
        assert!(view.is_pending());
        assert_eq!(view.payload, title("local"));
        assert_eq!(cache.confirmed("tasks", id).unwrap().payload, title("v1"));
    }

    #[test]
    fn rollback_restores_server_state() {
        let cache = open(&InMemoryBackend::new());
        let id = EntityId::new();
        cache
            .put(CachedEntity::confirmed("tasks", id, title("v1"), Version::new(1)))
            .unwrap();
        cache
            .patch_optimistic("tasks", id, title("mine"), Some(Version::new(1)))
            .unwrap();

        let server = ServerSnapshot::new(title("theirs"), Version::new(2));
        cache.rollback("tasks", id, Some(server), true).unwrap();

        let view = cache.get("tasks", id).unwrap();
        assert_eq!(view.payload, title("theirs"));
        assert_eq!(view.server_version, Some(Version::new(2)));
        assert_eq!(view.state, EntryState::Confirmed);
    }

    #[test]
    fn rollback_to_absent_row_leaves_tombstone() {
        let cache = open(&InMemoryBackend::new());
        let id = EntityId::new();
        cache
            .patch_optimistic("tasks", id, title("mine"), Some(Version::new(4)))
            .unwrap();

        cache.rollback("tasks", id, None, true).unwrap();
        assert!(cache.get("tasks", id).unwrap().is_tombstone());
        assert!(cache.list("tasks").is_empty());

        cache.rollback("tasks", id, None, false).unwrap();
        assert!(cache.get("tasks", id).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn pending_delete_hides_row_until_settled() {
        let cache = open(&InMemoryBackend::new());
        let id = EntityId::new();
        let snapshot = ServerSnapshot::new(title("v1"), Version::new(1));
        cache.put(snapshot.to_entity("tasks", id)).unwrap();

        cache.mark_deleted_optimistic("tasks", id).unwrap();
        assert!(cache.get("tasks", id).is_none());
        assert!(cache.list("tasks").is_empty());
        assert_eq!(cache.confirmed("tasks", id), Some(snapshot.clone()));

        // rejected delete comes back
        cache.rollback("tasks", id, Some(snapshot), false).unwrap();
        assert_eq!(cache.get("tasks", id).unwrap().payload, title("v1"));

        // confirmed delete forgets the row
        cache.mark_deleted_optimistic("tasks", id).unwrap();
        cache.confirm("tasks", id, None, false).unwrap();
        assert!(cache.entry("tasks", id).is_none());
    }

    #[test]
    fn confirm_with_overlay_moves_version_only() {
        let cache = open(&InMemoryBackend::new());
        let id = EntityId::new();
        cache
            .patch_optimistic("tasks", id, title("second edit"), None)
            .unwrap();

        let snapshot = ServerSnapshot::new(title("first edit"), Version::new(1));
        cache.confirm("tasks", id, Some(snapshot.clone()), true).unwrap();

        let view = cache.get("tasks", id).unwrap();
        assert_eq!(view.payload, title("second edit"));
        assert_eq!(view.server_version, Some(Version::new(1)));
        assert!(view.is_pending());
        assert_eq!(cache.confirmed("tasks", id), Some(snapshot));

        let final_state = ServerSnapshot::new(title("second edit"), Version::new(2));
        cache.confirm("tasks", id, Some(final_state), false).unwrap();
        let view = cache.get("tasks", id).unwrap();
        assert_eq!(view.state, EntryState::Confirmed);
        assert_eq!(view.server_version, Some(Version::new(2)));
    }

    #[test]
    fn failed_write_leaves_memory_untouched() {
        let backend = InMemoryBackend::new();
        let faults = backend.fault_switch();
        let cache = open(&backend);
        let id = EntityId::new();
        cache
            .put(CachedEntity::confirmed("tasks", id, title("v1"), Version::new(1)))
            .unwrap();

        faults.set_unavailable(true);
        let result = cache.patch_optimistic("tasks", id, title("lost"), Some(Version::new(1)));
        assert!(matches!(result, Err(StoreError::StorageUnavailable(_))));
        assert_eq!(cache.get("tasks", id).unwrap().payload, title("v1"));

        faults.set_unavailable(false);
        cache
            .patch_optimistic("tasks", id, title("kept"), Some(Version::new(1)))
            .unwrap();
        assert_eq!(cache.get("tasks", id).unwrap().payload, title("kept"));
    }

    #[test]
    fn compaction_drops_superseded_records() {
        let backend = InMemoryBackend::new();
        let config = StoreConfig::default().compact_threshold(4);
        let cache = CacheStore::open(Box::new(backend.clone()), &config).unwrap();
        let id = EntityId::new();
        for v in 1..=10u64 {
            cache
                .put(CachedEntity::confirmed("tasks", id, title("x"), Version::new(v)))
                .unwrap();
        }
        assert!(cache.dead_records() < 4);

        let reopened = CacheStore::open(Box::new(backend), &config).unwrap();
        assert_eq!(
            reopened.get("tasks", id).unwrap().server_version,
            Some(Version::new(10))
        );
    }
}

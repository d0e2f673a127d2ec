//! Durable log of pending mutations.
//!
//! The log is a FIFO of write intents. Mutations leave it only from the
//! front in normal operation, but the coordinator may settle any mutation
//! by id. Every change (enqueue, attempt count, rebase, removal) is a
//! record in the mutations partition, appended before memory changes.

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::mutation::{MutationKind, PendingMutation};
use crate::partition::{Partition, PartitionRecord};
use crate::types::{EntityId, MutationId, Version};
use outbox_codec::{from_cbor, to_cbor, Document};
use outbox_storage::StorageBackend;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const RECORD_ENQUEUE: u8 = 1;
const RECORD_ATTEMPT: u8 = 2;
const RECORD_REBASE: u8 = 3;
const RECORD_REMOVE: u8 = 4;

/// A record in the mutations partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MutationRecord {
    /// A mutation joined the back of the log.
    Enqueue(PendingMutation),
    /// A delivery attempt failed.
    Attempt {
        /// Mutation id.
        id: MutationId,
        /// Attempt count after the failure.
        attempts: u32,
    },
    /// The mutation now builds on a newer server version.
    Rebase {
        /// Mutation id.
        id: MutationId,
        /// New base version.
        base_version: Option<Version>,
        /// New confirmed values of the touched fields.
        base_fields: Option<Document>,
    },
    /// The mutation was settled.
    Remove {
        /// Mutation id.
        id: MutationId,
    },
}

impl PartitionRecord for MutationRecord {
    const MAGIC: [u8; 4] = *b"OBXM";
    const NAME: &'static str = "mutations";

    fn record_type(&self) -> u8 {
        match self {
            MutationRecord::Enqueue(_) => RECORD_ENQUEUE,
            MutationRecord::Attempt { .. } => RECORD_ATTEMPT,
            MutationRecord::Rebase { .. } => RECORD_REBASE,
            MutationRecord::Remove { .. } => RECORD_REMOVE,
        }
    }

    fn encode_payload(&self) -> StoreResult<Vec<u8>> {
        Ok(to_cbor(self)?)
    }

    fn decode_payload(record_type: u8, payload: &[u8]) -> StoreResult<Self> {
        let record: MutationRecord = from_cbor(payload)?;
        if record.record_type() != record_type {
            return Err(StoreError::invalid_operation(format!(
                "record type {record_type} does not match its body"
            )));
        }
        Ok(record)
    }
}

struct LogInner {
    partition: Partition<MutationRecord>,
    queue: Vec<PendingMutation>,
}

impl LogInner {
    fn position(&self, id: MutationId) -> Option<usize> {
        self.queue.iter().position(|m| m.id == id)
    }

    fn apply(&mut self, record: MutationRecord) {
        match record {
            MutationRecord::Enqueue(mutation) => {
                if self.position(mutation.id).is_none() {
                    self.queue.push(mutation);
                }
            }
            MutationRecord::Attempt { id, attempts } => {
                if let Some(pos) = self.position(id) {
                    self.queue[pos].attempts = attempts;
                }
            }
            MutationRecord::Rebase {
                id,
                base_version,
                base_fields,
            } => {
                if let Some(pos) = self.position(id) {
                    self.queue[pos].base_version = base_version;
                    self.queue[pos].base_fields = base_fields;
                }
            }
            MutationRecord::Remove { id } => {
                self.queue.retain(|m| m.id != id);
            }
        }
    }

    fn write(&mut self, record: MutationRecord) -> StoreResult<()> {
        self.partition.append(&record)?;
        self.apply(record);
        Ok(())
    }
}

/// The durable mutation log.
pub struct MutationLog {
    inner: RwLock<LogInner>,
    capacity: usize,
    compact_threshold: u64,
}

impl MutationLog {
    /// Opens the log on a backend and replays its partition.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` or `Corrupted` if the partition cannot be replayed.
    pub fn open(backend: Box<dyn StorageBackend>, config: &StoreConfig) -> StoreResult<Self> {
        let (partition, records) =
            Partition::<MutationRecord>::open(backend, config.sync_on_write)?;

        let mut inner = LogInner {
            partition,
            queue: Vec::new(),
        };
        for record in records {
            inner.apply(record);
        }
        debug!(pending = inner.queue.len(), "mutation log opened");

        Ok(Self {
            inner: RwLock::new(inner),
            capacity: config.queue_capacity,
            compact_threshold: config.compact_threshold,
        })
    }

    /// Appends a mutation to the back of the log.
    ///
    /// Returns `false` without writing anything if a mutation with the same
    /// id is already pending.
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` at capacity, or `StorageUnavailable` if the write
    /// does not reach the partition.
    pub fn enqueue(&self, mutation: PendingMutation) -> StoreResult<bool> {
        let mut inner = self.inner.write();
        if inner.position(mutation.id).is_some() {
            return Ok(false);
        }
        if inner.queue.len() >= self.capacity {
            return Err(StoreError::QueueFull {
                capacity: self.capacity,
            });
        }
        inner.write(MutationRecord::Enqueue(mutation))?;
        Ok(true)
    }

    /// Returns the oldest pending mutation.
    pub fn peek_oldest(&self) -> Option<PendingMutation> {
        self.inner.read().queue.first().cloned()
    }

    /// Returns a pending mutation by id.
    pub fn get(&self, id: MutationId) -> Option<PendingMutation> {
        let inner = self.inner.read();
        inner.position(id).map(|pos| inner.queue[pos].clone())
    }

    /// Removes a mutation and returns it.
    ///
    /// # Errors
    ///
    /// Returns `MutationNotFound` if it is not pending, or `StorageUnavailable`
    /// if the write does not reach the partition.
    pub fn remove(&self, id: MutationId) -> StoreResult<PendingMutation> {
        let mut inner = self.inner.write();
        let pos = inner
            .position(id)
            .ok_or_else(|| StoreError::MutationNotFound(id.to_string()))?;
        let mutation = inner.queue[pos].clone();
        inner.write(MutationRecord::Remove { id })?;
        self.maybe_compact(&mut inner);
        Ok(mutation)
    }

    /// Records a failed delivery attempt and returns the new count.
    ///
    /// # Errors
    ///
    /// Returns `MutationNotFound` if it is not pending, or `StorageUnavailable`
    /// if the write does not reach the partition.
    pub fn increment_attempts(&self, id: MutationId) -> StoreResult<u32> {
        let mut inner = self.inner.write();
        let pos = inner
            .position(id)
            .ok_or_else(|| StoreError::MutationNotFound(id.to_string()))?;
        let attempts = inner.queue[pos].attempts.saturating_add(1);
        inner.write(MutationRecord::Attempt { id, attempts })?;
        self.maybe_compact(&mut inner);
        Ok(attempts)
    }

    /// Moves later edits of a row onto the version the server just assigned.
    ///
    /// `confirmed` is the mutation the server just applied. Every pending
    /// update or delete of the same row queued after it, and built on the
    /// same base, gets base `to`. Their recorded base fields are refreshed
    /// from `payload`, the row as the server now holds it. Returns how many
    /// mutations moved.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if a write does not reach the partition.
    /// Mutations rebased before the failure stay rebased.
    pub fn rebase(
        &self,
        confirmed: &PendingMutation,
        to: Version,
        payload: &Document,
    ) -> StoreResult<usize> {
        let mut inner = self.inner.write();
        let start = inner.position(confirmed.id).map_or(0, |pos| pos + 1);
        let targets: Vec<(MutationId, Option<Document>)> = inner.queue[start..]
            .iter()
            .filter(|m| m.kind != MutationKind::Create)
            .filter(|m| {
                m.targets(&confirmed.collection, confirmed.entity_id)
                    && m.base_version == confirmed.base_version
            })
            .map(|m| {
                let fields = m.base_fields.as_ref().map(|_| {
                    m.data
                        .keys()
                        .filter_map(|k| payload.get(k).map(|v| (k.clone(), v.clone())))
                        .collect()
                });
                (m.id, fields)
            })
            .collect();

        for (id, base_fields) in &targets {
            inner.write(MutationRecord::Rebase {
                id: *id,
                base_version: Some(to),
                base_fields: base_fields.clone(),
            })?;
        }
        if !targets.is_empty() {
            debug!(
                collection = %confirmed.collection,
                entity = %confirmed.entity_id,
                from = %Version::describe(confirmed.base_version),
                to = %to,
                count = targets.len(),
                "rebased pending mutations"
            );
        }
        Ok(targets.len())
    }

    /// Returns every pending mutation, oldest first.
    pub fn list_all(&self) -> Vec<PendingMutation> {
        self.inner.read().queue.clone()
    }

    /// Returns true if any mutation of the row is pending.
    pub fn has_pending_for(&self, collection: &str, entity_id: EntityId) -> bool {
        self.inner
            .read()
            .queue
            .iter()
            .any(|m| m.targets(collection, entity_id))
    }

    /// Number of pending mutations.
    pub fn len(&self) -> usize {
        self.inner.read().queue.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.inner.read().queue.is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of superseded records in the partition.
    pub fn dead_records(&self) -> u64 {
        let inner = self.inner.read();
        inner
            .partition
            .record_count()
            .saturating_sub(inner.queue.len() as u64)
    }

    /// Rewrites the partition from the pending mutations.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the rewrite fails; the old partition stays.
    pub fn compact(&self) -> StoreResult<()> {
        let mut inner = self.inner.write();
        Self::rewrite(&mut inner)
    }

    fn rewrite(inner: &mut LogInner) -> StoreResult<()> {
        let records: Vec<MutationRecord> = inner
            .queue
            .iter()
            .cloned()
            .map(MutationRecord::Enqueue)
            .collect();
        inner.partition.rewrite(records.iter())
    }

    fn maybe_compact(&self, inner: &mut LogInner) {
        let live = inner.queue.len() as u64;
        let dead = inner.partition.record_count().saturating_sub(live);
        if dead >= self.compact_threshold && dead > live {
            if let Err(e) = Self::rewrite(inner) {
                warn!(error = %e, "mutation log compaction failed; will retry on a later write");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outbox_codec::{document, Value};
    use outbox_storage::{FileBackend, InMemoryBackend};
    use tempfile::tempdir;

    fn open(backend: &InMemoryBackend) -> MutationLog {
        MutationLog::open(Box::new(backend.clone()), &StoreConfig::default()).unwrap()
    }

    fn update(id: EntityId, n: i64, base: u64) -> PendingMutation {
        PendingMutation::update(
            "tasks",
            id,
            document([("n", Value::from(n))]),
            Some(Version::new(base)),
        )
    }

    #[test]
    fn fifo_order() {
        let log = open(&InMemoryBackend::new());
        let row = EntityId::new();
        let first = update(row, 1, 1);
        let second = update(row, 2, 1);
        log.enqueue(first.clone()).unwrap();
        log.enqueue(second.clone()).unwrap();

        assert_eq!(log.peek_oldest().unwrap().id, first.id);
        assert_eq!(log.remove(first.id).unwrap().id, first.id);
        assert_eq!(log.peek_oldest().unwrap().id, second.id);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn duplicate_enqueue_is_noop() {
        let log = open(&InMemoryBackend::new());
        let m = update(EntityId::new(), 1, 1);
        assert!(log.enqueue(m.clone()).unwrap());
        assert!(!log.enqueue(m).unwrap());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn queue_full() {
        let config = StoreConfig::default().queue_capacity(2);
        let log = MutationLog::open(Box::new(InMemoryBackend::new()), &config).unwrap();
        let row = EntityId::new();
        log.enqueue(update(row, 1, 1)).unwrap();
        log.enqueue(update(row, 2, 1)).unwrap();

        let err = log.enqueue(update(row, 3, 1)).unwrap_err();
        assert!(matches!(err, StoreError::QueueFull { capacity: 2 }));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn attempts_and_removal_survive_reopen() {
        let backend = InMemoryBackend::new();
        let row = EntityId::new();
        let kept = update(row, 1, 1);
        let dropped = update(row, 2, 1);
        {
            let log = open(&backend);
            log.enqueue(kept.clone()).unwrap();
            log.enqueue(dropped.clone()).unwrap();
            assert_eq!(log.increment_attempts(kept.id).unwrap(), 1);
            assert_eq!(log.increment_attempts(kept.id).unwrap(), 2);
            log.remove(dropped.id).unwrap();
        }

        let log = open(&backend);
        let all = log.list_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, kept.id);
        assert_eq!(all[0].attempts, 2);
    }

    #[test]
    fn unknown_mutation() {
        let log = open(&InMemoryBackend::new());
        let id = MutationId::new();
        assert!(matches!(log.remove(id), Err(StoreError::MutationNotFound(_))));
        assert!(matches!(
            log.increment_attempts(id),
            Err(StoreError::MutationNotFound(_))
        ));
    }

    #[test]
    fn rebase_moves_later_edits_of_same_row() {
        let log = open(&InMemoryBackend::new());
        let row = EntityId::new();
        let other = EntityId::new();
        let first = update(row, 1, 1);
        let later = update(row, 2, 1).with_base_fields(document([("n", Value::from(0))]));
        let unrelated = update(other, 9, 1);
        let stale = update(row, 3, 7);
        log.enqueue(first.clone()).unwrap();
        log.enqueue(later.clone()).unwrap();
        log.enqueue(unrelated.clone()).unwrap();
        log.enqueue(stale.clone()).unwrap();

        let server = document([("n", Value::from(1)), ("extra", Value::from(true))]);
        let moved = log.rebase(&first, Version::new(2), &server).unwrap();
        assert_eq!(moved, 1);
        assert_eq!(log.get(first.id).unwrap().base_version, Some(Version::new(1)));

        let rebased = log.get(later.id).unwrap();
        assert_eq!(rebased.base_version, Some(Version::new(2)));
        assert_eq!(rebased.base_fields, Some(document([("n", Value::from(1))])));
        assert_eq!(log.get(unrelated.id).unwrap().base_version, Some(Version::new(1)));
        assert_eq!(log.get(stale.id).unwrap().base_version, Some(Version::new(7)));
    }

    #[test]
    fn rebase_after_offline_create() {
        let log = open(&InMemoryBackend::new());
        let row = EntityId::new();
        let create = PendingMutation::create("tasks", row, document([("n", Value::from(1))]));
        let edit = PendingMutation::update("tasks", row, document([("n", Value::from(2))]), None);
        log.enqueue(create.clone()).unwrap();
        log.enqueue(edit.clone()).unwrap();
        log.remove(create.id).unwrap();

        log.rebase(&create, Version::new(1), &create.data).unwrap();
        assert_eq!(log.get(edit.id).unwrap().base_version, Some(Version::new(1)));
        assert!(log.has_pending_for("tasks", row));
    }

    #[test]
    fn failed_append_keeps_queue() {
        let backend = InMemoryBackend::new();
        let faults = backend.fault_switch();
        let log = open(&backend);
        let m = update(EntityId::new(), 1, 1);
        log.enqueue(m.clone()).unwrap();

        faults.set_unavailable(true);
        assert!(log.enqueue(update(EntityId::new(), 2, 1)).is_err());
        assert!(log.remove(m.id).is_err());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn compaction_keeps_pending_mutations() {
        let backend = InMemoryBackend::new();
        let config = StoreConfig::default().compact_threshold(3);
        let log = MutationLog::open(Box::new(backend.clone()), &config).unwrap();
        let row = EntityId::new();
        let survivor = update(row, 0, 1);
        log.enqueue(survivor.clone()).unwrap();
        for n in 1..8 {
            let m = update(row, n, 1);
            log.enqueue(m.clone()).unwrap();
            log.remove(m.id).unwrap();
        }
        assert!(log.dead_records() < 3);

        let reopened = MutationLog::open(Box::new(backend), &config).unwrap();
        assert_eq!(reopened.list_all(), vec![survivor]);
    }

    #[test]
    fn file_backed_log_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mutations.log");
        let m = update(EntityId::new(), 5, 3);
        {
            let log = MutationLog::open(
                Box::new(FileBackend::open(&path).unwrap()),
                &StoreConfig::default(),
            )
            .unwrap();
            log.enqueue(m.clone()).unwrap();
        }

        let log = MutationLog::open(
            Box::new(FileBackend::open(&path).unwrap()),
            &StoreConfig::default(),
        )
        .unwrap();
        assert_eq!(log.peek_oldest(), Some(m));
    }
}

//! Authoritative row storage.

use outbox_codec::Document;
use outbox_core::{EntityId, MutationId, MutationKind, Version};
use outbox_sync_protocol::RemoteRecord;
use std::collections::BTreeMap;

/// One write the server applied, in application order.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedWrite {
    /// Server version assigned to the write.
    pub version: Version,
    /// Mutation that caused it, `None` for writes made directly on the server.
    pub mutation_id: Option<MutationId>,
    /// Write kind.
    pub kind: MutationKind,
    /// Collection.
    pub collection: String,
    /// Row id.
    pub entity_id: EntityId,
}

/// Rows keyed by collection and id, each with the version of its last write.
///
/// Versions come from one counter shared by all rows, so they are unique
/// and never reused, even for a row deleted and created again.
#[derive(Debug, Default)]
pub struct RowStore {
    rows: BTreeMap<(String, EntityId), RemoteRecord>,
    last_version: u64,
    history: Vec<AppliedWrite>,
}

impl RowStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a row.
    pub fn get(&self, collection: &str, id: EntityId) -> Option<&RemoteRecord> {
        self.rows.get(&(collection.to_string(), id))
    }

    /// Inserts a row, or overwrites the given fields of an existing one.
    pub fn upsert(
        &mut self,
        collection: &str,
        id: EntityId,
        data: &Document,
        mutation_id: Option<MutationId>,
    ) -> RemoteRecord {
        let version = self.next_version();
        let key = (collection.to_string(), id);
        let kind = if self.rows.contains_key(&key) {
            MutationKind::Update
        } else {
            MutationKind::Create
        };
        let mut payload = self
            .rows
            .remove(&key)
            .map(|row| row.payload)
            .unwrap_or_default();
        payload.extend(data.clone());

        let record = RemoteRecord::new(payload, version);
        self.rows.insert(key, record.clone());
        self.record(version, mutation_id, kind, collection, id);
        record
    }

    /// Deletes a row. Returns false if it did not exist.
    pub fn delete(
        &mut self,
        collection: &str,
        id: EntityId,
        mutation_id: Option<MutationId>,
    ) -> bool {
        if self.rows.remove(&(collection.to_string(), id)).is_none() {
            return false;
        }
        let version = self.next_version();
        self.record(version, mutation_id, MutationKind::Delete, collection, id);
        true
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the store holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every row of a collection in id order.
    pub fn rows_in(&self, collection: &str) -> Vec<(EntityId, RemoteRecord)> {
        self.rows
            .iter()
            .filter(|((c, _), _)| c == collection)
            .map(|((_, id), row)| (*id, row.clone()))
            .collect()
    }

    /// Every applied write, oldest first.
    pub fn history(&self) -> &[AppliedWrite] {
        &self.history
    }

    fn next_version(&mut self) -> Version {
        self.last_version += 1;
        Version::new(self.last_version)
    }

    fn record(
        &mut self,
        version: Version,
        mutation_id: Option<MutationId>,
        kind: MutationKind,
        collection: &str,
        entity_id: EntityId,
    ) {
        self.history.push(AppliedWrite {
            version,
            mutation_id,
            kind,
            collection: collection.to_string(),
            entity_id,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outbox_codec::{document, Value};

    #[test]
    fn versions_increase_across_rows() {
        let mut rows = RowStore::new();
        let a = EntityId::new();
        let b = EntityId::new();
        let first = rows.upsert("tasks", a, &document([("n", Value::from(1))]), None);
        let second = rows.upsert("tasks", b, &document([("n", Value::from(2))]), None);
        assert!(second.version > first.version);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn upsert_merges_fields() {
        let mut rows = RowStore::new();
        let id = EntityId::new();
        rows.upsert("tasks", id, &document([("a", Value::from(1)), ("b", Value::from(1))]), None);
        let updated = rows.upsert("tasks", id, &document([("b", Value::from(2))]), None);
        assert_eq!(
            updated.payload,
            document([("a", Value::from(1)), ("b", Value::from(2))])
        );
        assert_eq!(rows.history()[1].kind, MutationKind::Update);
    }

    #[test]
    fn delete_and_recreate_never_reuses_version() {
        let mut rows = RowStore::new();
        let id = EntityId::new();
        let v1 = rows.upsert("tasks", id, &Document::new(), None).version;
        assert!(rows.delete("tasks", id, None));
        assert!(!rows.delete("tasks", id, None));
        let v3 = rows.upsert("tasks", id, &Document::new(), None).version;
        assert!(v3 > v1);
        assert_eq!(rows.history().len(), 3);
    }
}

//! Pending write intents.

use crate::types::{now_millis, EntityId, MutationId, Version};
use outbox_codec::Document;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of write a mutation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationKind {
    /// Insert a new row.
    Create,
    /// Overwrite the given fields of an existing row.
    Update,
    /// Remove a row.
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationKind::Create => write!(f, "create"),
            MutationKind::Update => write!(f, "update"),
            MutationKind::Delete => write!(f, "delete"),
        }
    }
}

/// A durable write intent waiting to be applied to the remote store.
///
/// # Invariants
///
/// - `base_version` is `None` for creates
/// - mutations of the same row are applied in the order they were queued
/// - only the sync coordinator changes a mutation after it is queued
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
    /// Client-generated id, used for de-duplication and idempotent submission.
    pub id: MutationId,
    /// Write kind.
    pub kind: MutationKind,
    /// Target collection.
    pub collection: String,
    /// Target row.
    pub entity_id: EntityId,
    /// Fields to write. Empty for deletes.
    pub data: Document,
    /// Server version the client believed current when it made the edit.
    pub base_version: Option<Version>,
    /// Confirmed values of the touched fields when the edit was made.
    ///
    /// A field missing here was absent from the confirmed row.
    pub base_fields: Option<Document>,
    /// When the mutation was queued (Unix millis).
    pub queued_at: u64,
    /// Failed delivery attempts so far.
    pub attempts: u32,
}

impl PendingMutation {
    /// Creates a create mutation.
    pub fn create(collection: impl Into<String>, entity_id: EntityId, data: Document) -> Self {
        Self::new(MutationKind::Create, collection, entity_id, data, None)
    }

    /// Creates an update mutation.
    pub fn update(
        collection: impl Into<String>,
        entity_id: EntityId,
        data: Document,
        base_version: Option<Version>,
    ) -> Self {
        Self::new(MutationKind::Update, collection, entity_id, data, base_version)
    }

    /// Creates a delete mutation.
    pub fn delete(
        collection: impl Into<String>,
        entity_id: EntityId,
        base_version: Option<Version>,
    ) -> Self {
        Self::new(
            MutationKind::Delete,
            collection,
            entity_id,
            Document::new(),
            base_version,
        )
    }

    fn new(
        kind: MutationKind,
        collection: impl Into<String>,
        entity_id: EntityId,
        data: Document,
        base_version: Option<Version>,
    ) -> Self {
        Self {
            id: MutationId::new(),
            kind,
            collection: collection.into(),
            entity_id,
            data,
            base_version,
            base_fields: None,
            queued_at: now_millis(),
            attempts: 0,
        }
    }

    /// Records the confirmed values of the touched fields.
    #[must_use]
    pub fn with_base_fields(mut self, base_fields: Document) -> Self {
        self.base_fields = Some(base_fields);
        self
    }

    /// Returns true if this mutation targets the given row.
    pub fn targets(&self, collection: &str, entity_id: EntityId) -> bool {
        self.entity_id == entity_id && self.collection == collection
    }
}

impl fmt::Display for PendingMutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/{} (mutation {}, base {})",
            self.kind,
            self.collection,
            self.entity_id,
            self.id,
            Version::describe(self.base_version)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outbox_codec::{document, Value};

    #[test]
    fn constructors_set_kind_and_base() {
        let id = EntityId::new();
        let create = PendingMutation::create("tasks", id, document([("t", Value::from("a"))]));
        assert_eq!(create.kind, MutationKind::Create);
        assert_eq!(create.base_version, None);
        assert_eq!(create.attempts, 0);

        let delete = PendingMutation::delete("tasks", id, Some(Version::new(3)));
        assert!(delete.data.is_empty());
        assert_eq!(delete.base_version, Some(Version::new(3)));
        assert!(delete.targets("tasks", id));
        assert!(!delete.targets("notes", id));
    }

    #[test]
    fn every_mutation_gets_its_own_id() {
        let id = EntityId::new();
        let a = PendingMutation::delete("tasks", id, None);
        let b = PendingMutation::delete("tasks", id, None);
        assert_ne!(a.id, b.id);
    }
}

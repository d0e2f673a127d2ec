//! Cached entity snapshots.

use crate::types::{EntityId, Version};
use outbox_codec::Document;
use serde::{Deserialize, Serialize};

/// How the visible copy of a row relates to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryState {
    /// Matches the last state confirmed by the server.
    Confirmed,
    /// Carries an optimistic patch not yet confirmed.
    Pending,
    /// The server reported the row deleted.
    Tombstoned,
}

/// A snapshot of one remote row, as seen by the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntity {
    /// Collection (table) name.
    pub collection: String,
    /// Row id.
    pub id: EntityId,
    /// Field values.
    pub payload: Document,
    /// Server version the payload is based on. Absent for rows created offline.
    pub server_version: Option<Version>,
    /// Relation to the server state.
    pub state: EntryState,
}

impl CachedEntity {
    /// Creates a confirmed entity from a server read.
    pub fn confirmed(
        collection: impl Into<String>,
        id: EntityId,
        payload: Document,
        version: Version,
    ) -> Self {
        Self {
            collection: collection.into(),
            id,
            payload,
            server_version: Some(version),
            state: EntryState::Confirmed,
        }
    }

    /// Returns true if the server reported this row deleted.
    pub fn is_tombstone(&self) -> bool {
        self.state == EntryState::Tombstoned
    }

    /// Returns true if an optimistic patch is visible.
    pub fn is_pending(&self) -> bool {
        self.state == EntryState::Pending
    }
}

/// The server's authoritative copy of a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSnapshot {
    /// Field values on the server.
    pub payload: Document,
    /// Server version.
    pub version: Version,
}

impl ServerSnapshot {
    /// Creates a snapshot.
    pub fn new(payload: Document, version: Version) -> Self {
        Self { payload, version }
    }

    /// Builds the confirmed cache view of this snapshot.
    pub fn to_entity(&self, collection: &str, id: EntityId) -> CachedEntity {
        CachedEntity::confirmed(collection, id, self.payload.clone(), self.version)
    }
}

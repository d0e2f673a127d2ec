//! CLI command implementations.

pub mod compact;
pub mod inspect;
pub mod pending;
pub mod verify;

use outbox_core::partition::{scan, PartitionRecord, Replay};
use outbox_core::{
    CacheRecord, EntityId, MutationRecord, PendingMutation, StoreError, StoredEntry,
};
use outbox_storage::{FileBackend, StorageBackend, StorageError};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Errors reported by the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// A command needs `--path`.
    #[error("store path required for {0}")]
    MissingPath(&'static str),

    /// No partition files at the path.
    #[error("no outbox store found at {0}")]
    NotFound(String),

    /// Unknown output format.
    #[error("unknown format {0:?} (expected text or json)")]
    Format(String),

    /// Verification found problems.
    #[error("verification failed: {0} problem(s)")]
    VerifyFailed(usize),

    /// Store error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// JSON output error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit code for the error.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::MissingPath(_) | CliError::Format(_) => 2,
            CliError::VerifyFailed(_) => 3,
            CliError::Store(StoreError::Locked) => 4,
            _ => 1,
        }
    }
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl Format {
    /// Parses a `--format` value.
    pub fn parse(value: &str) -> Result<Self, CliError> {
        match value {
            "text" => Ok(Format::Text),
            "json" => Ok(Format::Json),
            other => Err(CliError::Format(other.to_string())),
        }
    }
}

/// A partition file read without opening the store.
pub struct Loaded<R> {
    /// File size in bytes.
    pub size: u64,
    /// Decoded records.
    pub replay: Replay<R>,
}

/// Reads and decodes a partition file. `Ok(None)` if the file is absent.
pub fn load<R: PartitionRecord>(path: &Path) -> Result<Option<Loaded<R>>, CliError> {
    if !path.exists() {
        return Ok(None);
    }
    let backend = FileBackend::open(path)?;
    let bytes = backend.read_all()?;
    let replay = scan(&bytes)?;
    Ok(Some(Loaded {
        size: bytes.len() as u64,
        replay,
    }))
}

/// Fails unless the directory holds at least one partition file.
pub fn require_store(path: &Path) -> Result<(), CliError> {
    if path.join(outbox_core::CACHE_FILE).exists()
        || path.join(outbox_core::MUTATIONS_FILE).exists()
    {
        Ok(())
    } else {
        Err(CliError::NotFound(path.display().to_string()))
    }
}

/// Folds cache records into the rows they leave behind.
pub fn fold_cache(records: &[(u64, CacheRecord)]) -> BTreeMap<(String, EntityId), StoredEntry> {
    let mut rows = BTreeMap::new();
    for (_, record) in records {
        match record {
            CacheRecord::Put(entry) => {
                rows.insert((entry.collection.clone(), entry.id), entry.clone());
            }
            CacheRecord::Remove { collection, id } => {
                rows.remove(&(collection.clone(), *id));
            }
        }
    }
    rows
}

/// Folds mutation records into the pending queue.
pub fn fold_log(records: &[(u64, MutationRecord)]) -> Vec<PendingMutation> {
    let mut queue: Vec<PendingMutation> = Vec::new();
    for (_, record) in records {
        match record {
            MutationRecord::Enqueue(mutation) => queue.push(mutation.clone()),
            MutationRecord::Attempt { id, attempts } => {
                if let Some(m) = queue.iter_mut().find(|m| m.id == *id) {
                    m.attempts = *attempts;
                }
            }
            MutationRecord::Rebase {
                id,
                base_version,
                base_fields,
            } => {
                if let Some(m) = queue.iter_mut().find(|m| m.id == *id) {
                    m.base_version = *base_version;
                    m.base_fields = base_fields.clone();
                }
            }
            MutationRecord::Remove { id } => queue.retain(|m| m.id != *id),
        }
    }
    queue
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn folding_matches_queue_order() {
        let dir = tempdir().unwrap();
        let (first, second) = test_support::sample_store(dir.path());

        let log = load::<MutationRecord>(&dir.path().join(outbox_core::MUTATIONS_FILE))
            .unwrap()
            .unwrap();
        let pending = fold_log(&log.replay.records);
        assert_eq!(pending.len(), 3);
        assert_eq!(pending[0].id, first.mutation_id);
        assert_eq!(pending[1].id, second.mutation_id);

        let cache = load::<CacheRecord>(&dir.path().join(outbox_core::CACHE_FILE))
            .unwrap()
            .unwrap();
        assert_eq!(fold_cache(&cache.replay.records).len(), 2);
    }

    #[test]
    fn missing_store_is_reported() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            require_store(&dir.path().join("nope")),
            Err(CliError::NotFound(_))
        ));
        assert!(load::<CacheRecord>(&dir.path().join("nope")).unwrap().is_none());
    }

    #[test]
    fn exit_codes() {
        assert_eq!(CliError::MissingPath("inspect").exit_code(), 2);
        assert_eq!(CliError::VerifyFailed(1).exit_code(), 3);
        assert_eq!(CliError::Store(StoreError::Locked).exit_code(), 4);
        assert!(Format::parse("yaml").is_err());
    }
}

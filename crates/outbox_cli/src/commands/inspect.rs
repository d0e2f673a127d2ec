//! Inspect command implementation.

use super::{fold_cache, fold_log, load, require_store, CliError, Format};
use outbox_core::{CacheRecord, EntryState, MutationRecord, CACHE_FILE, MUTATIONS_FILE};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Cache partition size in bytes.
    pub cache_size: u64,
    /// Records in the cache partition, superseded ones included.
    pub cache_records: usize,
    /// Mutations partition size in bytes.
    pub mutations_size: u64,
    /// Records in the mutations partition, superseded ones included.
    pub mutation_records: usize,
    /// Rows showing confirmed server state.
    pub confirmed_rows: usize,
    /// Rows showing an optimistic edit.
    pub pending_rows: usize,
    /// Rows hidden by a queued delete.
    pub pending_deletes: usize,
    /// Rows the server reported deleted.
    pub tombstones: usize,
    /// Mutations waiting for delivery.
    pub pending_mutations: usize,
    /// Per-collection statistics (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collections: Option<Vec<CollectionStats>>,
}

/// Statistics for one collection.
#[derive(Debug, Default, Serialize)]
pub struct CollectionStats {
    /// Collection name.
    pub name: String,
    /// Visible rows.
    pub rows: usize,
    /// Mutations waiting for delivery.
    pub pending_mutations: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_collections: bool, format: &str) -> Result<(), CliError> {
    let format = Format::parse(format)?;
    let result = inspect(path, show_collections)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }
    Ok(())
}

/// Reads both partitions and summarizes them.
pub fn inspect(path: &Path, show_collections: bool) -> Result<InspectResult, CliError> {
    require_store(path)?;

    let mut result = InspectResult {
        path: path.display().to_string(),
        cache_size: 0,
        cache_records: 0,
        mutations_size: 0,
        mutation_records: 0,
        confirmed_rows: 0,
        pending_rows: 0,
        pending_deletes: 0,
        tombstones: 0,
        pending_mutations: 0,
        collections: None,
    };
    let mut collections: BTreeMap<String, CollectionStats> = BTreeMap::new();

    if let Some(cache) = load::<CacheRecord>(&path.join(CACHE_FILE))? {
        result.cache_size = cache.size;
        result.cache_records = cache.replay.records.len();
        for entry in fold_cache(&cache.replay.records).into_values() {
            let stats = collections.entry(entry.collection.clone()).or_default();
            match entry.view.map(|view| view.state) {
                None => result.pending_deletes += 1,
                Some(EntryState::Tombstoned) => result.tombstones += 1,
                Some(EntryState::Confirmed) => {
                    result.confirmed_rows += 1;
                    stats.rows += 1;
                }
                Some(EntryState::Pending) => {
                    result.pending_rows += 1;
                    stats.rows += 1;
                }
            }
        }
    }

    if let Some(log) = load::<MutationRecord>(&path.join(MUTATIONS_FILE))? {
        result.mutations_size = log.size;
        result.mutation_records = log.replay.records.len();
        let pending = fold_log(&log.replay.records);
        result.pending_mutations = pending.len();
        for mutation in pending {
            collections
                .entry(mutation.collection.clone())
                .or_default()
                .pending_mutations += 1;
        }
    }

    if show_collections {
        result.collections = Some(
            collections
                .into_iter()
                .map(|(name, stats)| CollectionStats { name, ..stats })
                .collect(),
        );
    }
    Ok(result)
}

fn print_text_output(result: &InspectResult) {
    println!("Outbox store: {}", result.path);
    println!();
    println!("Partitions:");
    println!(
        "  cache:     {} bytes, {} records",
        result.cache_size, result.cache_records
    );
    println!(
        "  mutations: {} bytes, {} records",
        result.mutations_size, result.mutation_records
    );
    println!();
    println!("Rows:");
    println!("  confirmed:       {}", result.confirmed_rows);
    println!("  pending edit:    {}", result.pending_rows);
    println!("  pending delete:  {}", result.pending_deletes);
    println!("  tombstones:      {}", result.tombstones);
    println!();
    println!("Pending mutations: {}", result.pending_mutations);

    if let Some(collections) = &result.collections {
        println!();
        println!("Collections:");
        for c in collections {
            println!(
                "  {:<24} {:>6} rows {:>6} pending",
                c.name, c.rows, c.pending_mutations
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::sample_store;
    use tempfile::tempdir;

    #[test]
    fn counts_rows_and_mutations() {
        let dir = tempdir().unwrap();
        sample_store(dir.path());

        let result = inspect(dir.path(), true).unwrap();
        assert_eq!(result.pending_rows, 2);
        assert_eq!(result.confirmed_rows, 0);
        assert_eq!(result.pending_mutations, 3);

        let collections = result.collections.unwrap();
        let tasks = collections.iter().find(|c| c.name == "tasks").unwrap();
        assert_eq!(tasks.rows, 1);
        assert_eq!(tasks.pending_mutations, 2);
    }

    #[test]
    fn json_output_serializes() {
        let dir = tempdir().unwrap();
        sample_store(dir.path());
        let json = serde_json::to_value(inspect(dir.path(), false).unwrap()).unwrap();
        assert_eq!(json["pending_mutations"], 3);
        assert!(json.get("collections").is_none());
    }
}

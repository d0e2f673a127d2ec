//! Compact command implementation.

use super::{require_store, CliError};
use outbox_core::{Outbox, StoreConfig, CACHE_FILE, MUTATIONS_FILE};
use std::path::Path;
use tracing::info;

/// Compaction result.
#[derive(Debug)]
pub struct CompactResult {
    /// Superseded cache records.
    pub cache_dead: u64,
    /// Superseded mutation records.
    pub mutation_dead: u64,
    /// Combined partition size before.
    pub size_before: u64,
    /// Combined partition size after.
    pub size_after: u64,
}

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), CliError> {
    let result = compact(path, dry_run)?;
    println!(
        "Superseded records: {} cache, {} mutations",
        result.cache_dead, result.mutation_dead
    );
    if dry_run {
        println!("Dry run: nothing rewritten ({} bytes)", result.size_before);
    } else {
        println!(
            "Compacted: {} -> {} bytes",
            result.size_before, result.size_after
        );
    }
    Ok(())
}

/// Opens the store (taking its lock) and rewrites both partitions.
pub fn compact(path: &Path, dry_run: bool) -> Result<CompactResult, CliError> {
    require_store(path)?;
    let size_before = store_size(path);
    let outbox = Outbox::open(path, StoreConfig::default().create_if_missing(false))?;

    let cache_dead = outbox.cache().dead_records();
    let mutation_dead = outbox.log().dead_records();
    if !dry_run {
        outbox.compact()?;
        info!(cache_dead, mutation_dead, "store compacted");
    }
    drop(outbox);

    Ok(CompactResult {
        cache_dead,
        mutation_dead,
        size_before,
        size_after: store_size(path),
    })
}

fn store_size(path: &Path) -> u64 {
    [CACHE_FILE, MUTATIONS_FILE]
        .iter()
        .filter_map(|f| std::fs::metadata(path.join(f)).ok())
        .map(|m| m.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::sample_store;
    use crate::commands::{fold_log, load};
    use outbox_core::MutationRecord;
    use tempfile::tempdir;

    #[test]
    fn compaction_keeps_pending_mutations() {
        let dir = tempdir().unwrap();
        sample_store(dir.path());

        let dry = compact(dir.path(), true).unwrap();
        assert!(dry.cache_dead > 0);
        assert_eq!(dry.size_after, dry.size_before);

        let done = compact(dir.path(), false).unwrap();
        assert!(done.size_after < done.size_before);

        let log = load::<MutationRecord>(&dir.path().join(MUTATIONS_FILE))
            .unwrap()
            .unwrap();
        assert_eq!(fold_log(&log.replay.records).len(), 3);
    }
}

//! Verify command implementation.

use super::{load, require_store, CliError};
use outbox_core::partition::PartitionRecord;
use outbox_core::{CacheRecord, MutationRecord, CACHE_FILE, MUTATIONS_FILE};
use std::path::Path;

/// Result of checking one partition.
#[derive(Debug)]
pub struct PartitionCheck {
    /// Partition name.
    pub name: &'static str,
    /// Whether the file exists.
    pub present: bool,
    /// File size in bytes.
    pub size: u64,
    /// Complete, valid records.
    pub records: usize,
    /// Bytes after the last complete record; cut off on the next open.
    pub torn_tail: u64,
    /// Corruption found, if any.
    pub error: Option<String>,
}

impl PartitionCheck {
    fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), CliError> {
    require_store(path)?;
    println!("Verifying store at {}", path.display());
    println!();

    let checks = [
        check::<CacheRecord>(&path.join(CACHE_FILE))?,
        check::<MutationRecord>(&path.join(MUTATIONS_FILE))?,
    ];
    for c in &checks {
        print_check(c);
    }

    let failures = checks.iter().filter(|c| !c.is_ok()).count();
    println!();
    if failures == 0 {
        println!("✓ Store verification passed");
        Ok(())
    } else {
        println!("✗ Store verification failed");
        Err(CliError::VerifyFailed(failures))
    }
}

/// Checks one partition file.
pub fn check<R: PartitionRecord>(file: &Path) -> Result<PartitionCheck, CliError> {
    let mut result = PartitionCheck {
        name: R::NAME,
        present: false,
        size: 0,
        records: 0,
        torn_tail: 0,
        error: None,
    };
    match load::<R>(file) {
        Ok(None) => {}
        Ok(Some(loaded)) => {
            result.present = true;
            result.size = loaded.size;
            result.records = loaded.replay.records.len();
            result.torn_tail = loaded.size - loaded.replay.valid_len;
        }
        Err(CliError::Store(e)) => {
            result.present = true;
            result.size = std::fs::metadata(file).map(|m| m.len()).unwrap_or(0);
            result.error = Some(e.to_string());
        }
        Err(e) => return Err(e),
    }
    Ok(result)
}

fn print_check(c: &PartitionCheck) {
    if !c.present {
        println!("{}: not found (normal for a new store)", c.name);
        return;
    }
    println!("{}: {} records, {} bytes", c.name, c.records, c.size);
    if c.torn_tail > 0 {
        println!("  ! {} bytes of incomplete record at the end", c.torn_tail);
    }
    if let Some(e) = &c.error {
        println!("  ✗ {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::sample_store;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn clean_store_passes() {
        let dir = tempdir().unwrap();
        sample_store(dir.path());
        let c = check::<MutationRecord>(&dir.path().join(MUTATIONS_FILE)).unwrap();
        assert!(c.is_ok());
        assert_eq!(c.records, 3);
        assert_eq!(c.torn_tail, 0);
    }

    #[test]
    fn torn_tail_is_reported_but_not_fatal() {
        let dir = tempdir().unwrap();
        sample_store(dir.path());
        let file = dir.path().join(MUTATIONS_FILE);
        OpenOptions::new()
            .append(true)
            .open(&file)
            .unwrap()
            .write_all(b"OBX")
            .unwrap();

        let c = check::<MutationRecord>(&file).unwrap();
        assert!(c.is_ok());
        assert_eq!(c.torn_tail, 3);
    }

    #[test]
    fn garbage_is_corruption() {
        let dir = tempdir().unwrap();
        let file = dir.path().join(CACHE_FILE);
        std::fs::write(&file, [0xFFu8; 64]).unwrap();

        let c = check::<CacheRecord>(&file).unwrap();
        assert!(!c.is_ok());
        assert!(c.error.unwrap().contains("cache"));
    }
}

//! Store directory management.
//!
//! ```text
//! <store_path>/
//! ├─ LOCK             # Advisory lock for single-writer
//! ├─ cache.log        # Cached rows partition
//! └─ mutations.log    # Pending mutations partition
//! ```
//!
//! The two partitions are independent; no write spans both.

use crate::error::{StoreError, StoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
/// File name of the cache partition.
pub const CACHE_FILE: &str = "cache.log";
/// File name of the mutations partition.
pub const MUTATIONS_FILE: &str = "mutations.log";

/// An opened store directory holding the exclusive lock.
///
/// Only one `StoreDir` can exist per directory at a time, across processes.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `Locked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> StoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(StoreError::invalid_operation(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(StoreError::invalid_operation(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the cache partition.
    #[must_use]
    pub fn cache_path(&self) -> PathBuf {
        self.path.join(CACHE_FILE)
    }

    /// Path of the mutations partition.
    #[must_use]
    pub fn mutations_path(&self) -> PathBuf {
        self.path.join(MUTATIONS_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_missing_directory() {
        let root = tempdir().unwrap();
        let path = root.path().join("store");
        let dir = StoreDir::open(&path, true).unwrap();
        assert!(path.join(LOCK_FILE).exists());
        assert_eq!(dir.cache_path(), path.join("cache.log"));
        assert_eq!(dir.mutations_path(), path.join("mutations.log"));
    }

    #[test]
    fn missing_directory_without_create() {
        let root = tempdir().unwrap();
        let result = StoreDir::open(&root.path().join("absent"), false);
        assert!(matches!(result, Err(StoreError::InvalidOperation { .. })));
    }

    #[test]
    fn second_open_is_locked() {
        let root = tempdir().unwrap();
        let _held = StoreDir::open(root.path(), true).unwrap();
        let second = StoreDir::open(root.path(), true);
        assert!(matches!(second, Err(StoreError::Locked)));
    }

    #[test]
    fn lock_released_on_drop() {
        let root = tempdir().unwrap();
        {
            let _dir = StoreDir::open(root.path(), true).unwrap();
        }
        assert!(StoreDir::open(root.path(), true).is_ok());
    }
}

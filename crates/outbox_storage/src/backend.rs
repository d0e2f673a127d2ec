//! Storage backend trait definition.

use crate::error::StorageResult;

/// A durable partition backend.
///
/// Backends are **opaque byte stores** holding one partition. The caller
/// owns the record format; the backend only guarantees that bytes written by
/// `append` come back from `read_all` in the same order.
///
/// # Invariants
///
/// - `append` returns the offset where the data starts
/// - `read_all` returns every byte appended since the last `replace`
/// - `replace` is all-or-nothing: a reader sees the old or the new contents
/// - Backends must be `Send + Sync`
pub trait StorageBackend: Send + Sync {
    /// Reads the whole partition.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium is unavailable or an I/O error occurs.
    fn read_all(&self) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the partition.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium is unavailable or an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Makes all appended data durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size of the partition in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Cuts the partition back to `new_size` bytes.
    ///
    /// Used to drop a torn record left at the tail by a crash.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is larger than the current size or the
    /// truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Atomically replaces the whole partition with `data`.
    ///
    /// Used by compaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the replacement cannot be written. On error the
    /// previous contents are still in place.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()>;
}

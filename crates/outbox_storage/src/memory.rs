//! In-memory partition backend with fault injection.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Switch that makes an [`InMemoryBackend`] behave like an unreachable medium.
///
/// Obtained from [`InMemoryBackend::fault_switch`]; it keeps working after
/// the backend has been moved into a store.
#[derive(Debug, Clone)]
pub struct FaultSwitch {
    unavailable: Arc<AtomicBool>,
    sync_fails: Arc<AtomicBool>,
}

impl FaultSwitch {
    /// Makes every subsequent backend call fail (`true`) or succeed (`false`).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns true if the backend currently fails every call.
    pub fn is_unavailable(&self) -> bool {
        self.unavailable.load(Ordering::SeqCst)
    }

    /// Makes only `sync` fail; appended bytes still land in the buffer.
    pub fn set_sync_failing(&self, failing: bool) {
        self.sync_fails.store(failing, Ordering::SeqCst);
    }
}

/// An in-memory partition backend.
///
/// Clones share the same buffer, so a test can keep a handle, drop the
/// store that owns the other clone, and "reopen" the partition from it.
///
/// # Example
///
/// ```rust
/// use outbox_storage::{InMemoryBackend, StorageBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let faults = backend.fault_switch();
///
/// backend.append(b"ok").unwrap();
/// faults.set_unavailable(true);
/// assert!(backend.append(b"lost").is_err());
/// assert_eq!(backend.data(), b"ok");
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
    unavailable: Arc<AtomicBool>,
    sync_fails: Arc<AtomicBool>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend with pre-existing partition bytes.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
            ..Self::default()
        }
    }

    /// Returns a copy of the partition bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Returns a switch for injecting storage faults.
    #[must_use]
    pub fn fault_switch(&self) -> FaultSwitch {
        FaultSwitch {
            unavailable: Arc::clone(&self.unavailable),
            sync_fails: Arc::clone(&self.sync_fails),
        }
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::unavailable("in-memory partition is switched off"))
        } else {
            Ok(())
        }
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        self.check_available()?;
        Ok(self.data.read().clone())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        self.check_available()?;
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.check_available()?;
        if self.sync_fails.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable("fsync failed"));
        }
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        self.check_available()?;
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.check_available()?;
        let mut data = self.data.write();
        let current = data.len() as u64;
        if new_size > current {
            return Err(StorageError::InvalidRequest(format!(
                "cannot truncate to {new_size} bytes, partition holds {current}"
            )));
        }
        data.truncate(new_size as usize);
        Ok(())
    }

    fn replace(&mut self, new_data: &[u8]) -> StorageResult<()> {
        self.check_available()?;
        *self.data.write() = new_data.to_vec();
        Ok(())
    }
}

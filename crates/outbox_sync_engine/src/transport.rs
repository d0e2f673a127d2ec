//! Remote store abstraction.

use crate::error::{SyncError, SyncResult};
use outbox_sync_protocol::{ReadRequest, RemoteRecord, WriteOutcome, WriteRequest};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

/// The authoritative store the outbox drains into.
///
/// Implementations decide how requests travel (HTTP, in-process, scripted
/// for tests). A write is conditional on `base_version` and idempotent per
/// `mutation_id`; transport failures are reported as `Err` and never as an
/// outcome.
pub trait RemoteStore: Send + Sync {
    /// Submits one conditional write.
    fn write(&self, request: WriteRequest) -> impl Future<Output = SyncResult<WriteOutcome>> + Send;

    /// Reads one row. `Ok(None)` means the remote does not hold it.
    fn read(
        &self,
        request: ReadRequest,
    ) -> impl Future<Output = SyncResult<Option<RemoteRecord>>> + Send;
}

/// A remote that answers from scripted responses.
///
/// Writes and reads pop their answers in order; an empty script is a
/// protocol error. Every write request is recorded.
#[derive(Debug, Default)]
pub struct MockRemote {
    offline: AtomicBool,
    writes: Mutex<VecDeque<SyncResult<WriteOutcome>>>,
    reads: Mutex<VecDeque<SyncResult<Option<RemoteRecord>>>>,
    requests: Mutex<Vec<WriteRequest>>,
}

impl MockRemote {
    /// Creates a mock with empty scripts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the answer to the next unanswered write.
    pub fn push_write(&self, answer: SyncResult<WriteOutcome>) {
        self.writes.lock().push_back(answer);
    }

    /// Queues the answer to the next unanswered read.
    pub fn push_read(&self, answer: SyncResult<Option<RemoteRecord>>) {
        self.reads.lock().push_back(answer);
    }

    /// Makes every call fail with `NotConnected` while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Write requests received so far, oldest first.
    pub fn requests(&self) -> Vec<WriteRequest> {
        self.requests.lock().clone()
    }

    /// Scripted write answers not yet consumed.
    pub fn remaining_writes(&self) -> usize {
        self.writes.lock().len()
    }
}

impl RemoteStore for MockRemote {
    async fn write(&self, request: WriteRequest) -> SyncResult<WriteOutcome> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::NotConnected);
        }
        self.requests.lock().push(request);
        self.writes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::Protocol("no scripted write answer".into())))
    }

    async fn read(&self, _request: ReadRequest) -> SyncResult<Option<RemoteRecord>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::NotConnected);
        }
        self.reads
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::Protocol("no scripted read answer".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outbox_codec::Document;
    use outbox_core::{EntityId, PendingMutation};

    fn request() -> WriteRequest {
        WriteRequest::from_mutation(&PendingMutation::create(
            "tasks",
            EntityId::new(),
            Document::new(),
        ))
    }

    #[tokio::test]
    async fn answers_in_script_order() {
        let remote = MockRemote::new();
        remote.push_write(Err(SyncError::Timeout));
        remote.push_write(Ok(WriteOutcome::Applied { record: None }));

        assert!(matches!(remote.write(request()).await, Err(SyncError::Timeout)));
        assert!(matches!(
            remote.write(request()).await,
            Ok(WriteOutcome::Applied { record: None })
        ));
        assert!(matches!(remote.write(request()).await, Err(SyncError::Protocol(_))));
        assert_eq!(remote.requests().len(), 3);
        assert_eq!(remote.remaining_writes(), 0);
    }

    #[tokio::test]
    async fn offline_mock_refuses_calls() {
        let remote = MockRemote::new();
        remote.push_write(Ok(WriteOutcome::Applied { record: None }));
        remote.set_offline(true);

        assert!(matches!(remote.write(request()).await, Err(SyncError::NotConnected)));
        assert!(remote.requests().is_empty());
        assert_eq!(remote.remaining_writes(), 1);
    }
}

//! Sync coordinator state machine.

use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::transport::RemoteStore;
use outbox_core::{
    CachedEntity, ConflictReason, EntityId, MutationKind, Outbox, PendingMutation, SyncEvent,
};
use outbox_sync_protocol::{
    resolve, ReadRequest, RemoteRecord, Resolution, WriteOutcome, WriteRequest,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// The current state of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Nothing to do, or offline.
    Idle,
    /// Submitting the oldest pending mutation.
    Draining,
    /// Waiting before retrying the oldest pending mutation.
    Backoff,
}

impl SyncState {
    /// Returns true while a drain is in progress.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Draining | SyncState::Backoff)
    }
}

/// Counters across all drains.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Drains run.
    pub drains: u64,
    /// Mutations confirmed by the remote.
    pub applied: u64,
    /// Mutations settled by a conflict.
    pub conflicts: u64,
    /// Mutations the remote rejected.
    pub failures: u64,
    /// Transport failures retried.
    pub retries: u64,
    /// Last error message.
    pub last_error: Option<String>,
    /// When the last drain finished.
    pub last_drain_at: Option<Instant>,
}

/// Result of one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Mutations confirmed by the remote.
    pub applied: usize,
    /// Mutations settled by a conflict.
    pub conflicts: usize,
    /// Mutations the remote rejected.
    pub failed: usize,
    /// Mutations still queued when the drain stopped.
    pub remaining: usize,
    /// Duration of the drain.
    pub duration: Duration,
}

enum Settled {
    Applied,
    Conflict,
    Failed,
}

/// Drains the mutation log into a remote store.
///
/// Mutations are submitted strictly oldest first, one at a time, each to
/// completion before the next. A transport failure keeps the mutation at
/// the head of the log and retries it after a backoff; nothing behind it
/// is ever submitted first.
///
/// ```text
/// Idle --trigger / back online--> Draining
/// Draining --log empty / offline--> Idle
/// Draining --transport failure--> Backoff --delay elapsed--> Draining
/// Backoff --offline--> Idle
/// ```
pub struct SyncCoordinator<R: RemoteStore> {
    config: SyncConfig,
    outbox: Arc<Outbox>,
    remote: Arc<R>,
    connectivity: ConnectivityMonitor,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    trigger: Notify,
    shutdown: Notify,
    cancelled: AtomicBool,
    // one drain at a time
    running: Mutex<()>,
}

impl<R: RemoteStore + 'static> SyncCoordinator<R> {
    /// Creates a coordinator.
    pub fn new(
        config: SyncConfig,
        outbox: Arc<Outbox>,
        remote: Arc<R>,
        connectivity: ConnectivityMonitor,
    ) -> Self {
        Self {
            config,
            outbox,
            remote,
            connectivity,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            trigger: Notify::new(),
            shutdown: Notify::new(),
            cancelled: AtomicBool::new(false),
            running: Mutex::new(()),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Returns a copy of the counters.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the outbox being drained.
    pub fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }

    /// Returns the connectivity monitor.
    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    /// Asks the background loop to drain.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Stops the background loop and any drain at its next mutation boundary.
    ///
    /// A mutation already submitted is still settled.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    /// Clears a previous cancellation.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Returns true if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Drains the log until it is empty, connectivity drops or the
    /// coordinator is cancelled.
    ///
    /// Nothing is emitted or counted when the log is empty or the
    /// coordinator is offline.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled`, or a local store error from bookkeeping.
    pub async fn drain(&self) -> SyncResult<DrainReport> {
        let _running = self.running.lock().await;
        if self.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let pending = self.outbox.pending_count();
        if pending == 0 || !self.connectivity.is_online() {
            debug!(pending, online = self.connectivity.is_online(), "nothing to drain");
            return Ok(DrainReport {
                remaining: pending,
                ..DrainReport::default()
            });
        }

        let started = Instant::now();
        let mut report = DrainReport::default();
        info!(pending, "drain started");
        self.outbox.emit(SyncEvent::DrainStarted { pending });
        self.set_state(SyncState::Draining);

        let result = self.drain_loop(&mut report).await;

        self.set_state(SyncState::Idle);
        report.remaining = self.outbox.pending_count();
        report.duration = started.elapsed();
        {
            let mut stats = self.stats.write();
            stats.drains += 1;
            stats.applied += report.applied as u64;
            stats.conflicts += report.conflicts as u64;
            stats.failures += report.failed as u64;
            stats.last_drain_at = Some(Instant::now());
            if let Err(e) = &result {
                stats.last_error = Some(e.to_string());
            }
        }
        self.outbox.emit(SyncEvent::DrainIdle {
            applied: report.applied,
            conflicts: report.conflicts,
            failed: report.failed,
        });
        info!(
            applied = report.applied,
            conflicts = report.conflicts,
            failed = report.failed,
            remaining = report.remaining,
            "drain finished"
        );

        result.map(|()| report)
    }

    async fn drain_loop(&self, report: &mut DrainReport) -> SyncResult<()> {
        loop {
            if self.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            if !self.connectivity.is_online() {
                debug!("offline, drain paused");
                return Ok(());
            }
            let Some(mutation) = self.outbox.next_pending() else {
                return Ok(());
            };

            match self.process(&mutation).await {
                Ok(Settled::Applied) => report.applied += 1,
                Ok(Settled::Conflict) => report.conflicts += 1,
                Ok(Settled::Failed) => report.failed += 1,
                Err(e) if e.is_retryable() => self.retry_later(&mutation, &e).await?,
                Err(e) if e.is_remote_failure() => {
                    warn!(mutation = %mutation.id, error = %e, "remote failed the mutation");
                    self.outbox.complete_failed(&mutation, e.to_string())?;
                    report.failed += 1;
                }
                Err(e) => {
                    warn!(mutation = %mutation.id, error = %e, "drain stopped");
                    return Err(e);
                }
            }
        }
    }

    async fn retry_later(&self, mutation: &PendingMutation, error: &SyncError) -> SyncResult<()> {
        let attempts = self.outbox.record_attempt(mutation.id)?;
        {
            let mut stats = self.stats.write();
            stats.retries += 1;
            stats.last_error = Some(error.to_string());
        }

        let Some(delay) = self.config.retry.backoff_after(attempts) else {
            debug!(mutation = %mutation.id, attempts, error = %error, "retrying at once");
            return Ok(());
        };

        warn!(
            mutation = %mutation.id,
            attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "delivery failed, backing off"
        );
        self.set_state(SyncState::Backoff);
        self.outbox.emit(SyncEvent::BackoffScheduled {
            mutation_id: mutation.id,
            attempts,
            delay,
        });

        let shutdown = self.shutdown.notified();
        tokio::pin!(shutdown);
        shutdown.as_mut().enable();
        if !self.is_cancelled() {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.connectivity.wait_offline() => debug!("offline during backoff"),
                () = &mut shutdown => {}
            }
        }
        self.set_state(SyncState::Draining);
        Ok(())
    }

    /// Submits one mutation and settles it locally.
    async fn process(&self, mutation: &PendingMutation) -> SyncResult<Settled> {
        let mut request = WriteRequest::from_mutation(mutation);
        let mut rounds = 0u32;

        loop {
            let current = match self.send(request.clone()).await? {
                WriteOutcome::Applied { record } => {
                    debug!(%mutation, "applied");
                    self.outbox.complete_applied(mutation, record)?;
                    return Ok(Settled::Applied);
                }
                WriteOutcome::Rejected { reason } => {
                    warn!(%mutation, %reason, "rejected by remote");
                    self.outbox.complete_failed(mutation, reason)?;
                    return Ok(Settled::Failed);
                }
                WriteOutcome::Conflict { current } => current,
            };

            let next = match resolve(mutation, current.as_ref(), &self.config.merge_policy) {
                Resolution::Reject(reason) => return self.settle_conflict(mutation, reason, current),
                Resolution::Apply if already_reflected(mutation, current.as_ref()) => {
                    debug!(%mutation, "already reflected remotely");
                    self.outbox.complete_applied(mutation, current)?;
                    return Ok(Settled::Applied);
                }
                Resolution::Apply => request.clone(),
                Resolution::Merge(merged) => request.clone().with_data(merged),
            }
            .with_base(current.as_ref().map(|row| row.version));

            rounds += 1;
            if rounds > self.config.max_merge_rounds {
                let reason = ConflictReason::VersionMismatch {
                    expected: mutation.base_version,
                    actual: current.as_ref().map(|row| row.version),
                };
                return self.settle_conflict(mutation, reason, current);
            }
            debug!(%mutation, rounds, base = ?next.base_version, "re-issuing against current row");
            request = next;
        }
    }

    fn settle_conflict(
        &self,
        mutation: &PendingMutation,
        reason: ConflictReason,
        current: Option<RemoteRecord>,
    ) -> SyncResult<Settled> {
        warn!(%mutation, %reason, "conflict");
        self.outbox.complete_conflict(mutation, reason, current)?;
        Ok(Settled::Conflict)
    }

    async fn send(&self, request: WriteRequest) -> SyncResult<WriteOutcome> {
        tokio::time::timeout(self.config.timeout, self.remote.write(request))
            .await
            .unwrap_or(Err(SyncError::Timeout))
    }

    /// Reads a row from the remote and stores it as confirmed state.
    ///
    /// Returns the cached view afterwards, which still shows pending local
    /// edits of the row.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` while offline, or the transport error.
    pub async fn refresh(&self, collection: &str, id: EntityId) -> SyncResult<Option<CachedEntity>> {
        if !self.connectivity.is_online() {
            return Err(SyncError::NotConnected);
        }
        let request = ReadRequest {
            collection: collection.to_string(),
            entity_id: id,
        };
        let record = tokio::time::timeout(self.config.timeout, self.remote.read(request))
            .await
            .unwrap_or(Err(SyncError::Timeout))?;
        self.outbox.store_remote_read(collection, id, record)?;
        Ok(self.outbox.read_cached(collection, id))
    }

    /// Runs the background loop until cancelled.
    ///
    /// Drains whenever triggered, when connectivity comes back and on the
    /// configured interval.
    pub async fn run(self: Arc<Self>) {
        let mut connectivity = self.connectivity.subscribe();
        let mut ticker = self.config.sync_interval.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        info!("sync coordinator started");

        loop {
            // registered before the flag check so a cancel in between is not lost
            let shutdown = self.shutdown.notified();
            tokio::pin!(shutdown);
            shutdown.as_mut().enable();
            if self.is_cancelled() {
                break;
            }
            if self.connectivity.is_online() && self.outbox.pending_count() > 0 {
                if let Err(e) = self.drain().await {
                    warn!(error = %e, "drain failed");
                }
                if self.is_cancelled() {
                    break;
                }
            }

            tokio::select! {
                () = self.trigger.notified() => {}
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *connectivity.borrow_and_update();
                    info!(online, "connectivity changed");
                    self.outbox.emit(SyncEvent::ConnectivityChanged { online });
                }
                () = tick(&mut ticker) => {}
                () = &mut shutdown => break,
            }
        }
        info!("sync coordinator stopped");
    }

    /// Spawns [`run`](Self::run) on the current tokio runtime.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run())
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }
}

/// True if the remote row already shows the mutation's effect.
fn already_reflected(mutation: &PendingMutation, current: Option<&RemoteRecord>) -> bool {
    match mutation.kind {
        MutationKind::Create => current.is_some(),
        MutationKind::Delete => current.is_none(),
        MutationKind::Update => false,
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

//! Sync status events.
//!
//! Every state change the application may care about is published on the
//! [`EventFeed`]: mutations queued, confirmed, rejected or failed, drain
//! progress, backoff and connectivity. Subscribers receive events in
//! emission order.
//!
//! ```rust,ignore
//! let events = outbox.subscribe();
//! std::thread::spawn(move || {
//!     while let Ok(event) = events.recv() {
//!         println!("{event:?}");
//!     }
//! });
//! ```

use crate::entity::ServerSnapshot;
use crate::error::ConflictReason;
use crate::mutation::PendingMutation;
use crate::types::{EntityId, MutationId, Version};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

/// An observable change in sync state.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A mutation was durably queued and its optimistic patch is visible.
    Queued {
        /// The queued mutation.
        mutation: PendingMutation,
    },
    /// The remote confirmed a mutation.
    Applied {
        /// Mutation id.
        mutation_id: MutationId,
        /// Collection.
        collection: String,
        /// Row id.
        entity_id: EntityId,
        /// Server version after the write. `None` for a confirmed delete.
        version: Option<Version>,
    },
    /// The remote refused a mutation because the row moved on.
    ///
    /// Carries the local intent and the server's current row so the
    /// application can present both.
    SyncConflict {
        /// The refused mutation, with its local payload.
        mutation: PendingMutation,
        /// Why it was refused.
        reason: ConflictReason,
        /// The server's current row, `None` if it no longer exists.
        server: Option<ServerSnapshot>,
    },
    /// The remote rejected a mutation outright (validation, authorization).
    SyncFailed {
        /// The rejected mutation, with its original data.
        mutation: PendingMutation,
        /// Reason given by the remote.
        reason: String,
    },
    /// The coordinator started draining the log.
    DrainStarted {
        /// Mutations pending when the drain began.
        pending: usize,
    },
    /// The log was drained or the drain stopped.
    DrainIdle {
        /// Mutations confirmed during the drain.
        applied: usize,
        /// Mutations settled by a conflict.
        conflicts: usize,
        /// Mutations rejected outright.
        failed: usize,
    },
    /// Delivery failed and the next attempt waits.
    BackoffScheduled {
        /// The mutation being retried.
        mutation_id: MutationId,
        /// Failed attempts so far.
        attempts: u32,
        /// Wait before the next attempt.
        delay: Duration,
    },
    /// Connectivity changed.
    ConnectivityChanged {
        /// Whether the remote is now reachable.
        online: bool,
    },
}

/// An event with its position in the feed.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencedEvent {
    /// Position in emission order, starting at 1.
    pub sequence: u64,
    /// The event.
    pub event: SyncEvent,
}

struct History {
    events: VecDeque<SequencedEvent>,
    next_sequence: u64,
}

/// Distributes sync events to subscribers and keeps a bounded history.
pub struct EventFeed {
    subscribers: RwLock<Vec<Sender<SyncEvent>>>,
    history: RwLock<History>,
    max_history: usize,
}

impl EventFeed {
    /// Creates a feed keeping up to `max_history` events for polling.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(History {
                events: VecDeque::new(),
                next_sequence: 1,
            }),
            max_history,
        }
    }

    /// Returns a receiver for every event emitted from now on.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Publishes an event. Dropped receivers are forgotten.
    pub fn emit(&self, event: SyncEvent) {
        {
            let mut history = self.history.write();
            let sequence = history.next_sequence;
            history.next_sequence += 1;
            history.events.push_back(SequencedEvent {
                sequence,
                event: event.clone(),
            });
            while history.events.len() > self.max_history {
                history.events.pop_front();
            }
        }

        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns up to `limit` retained events with sequence above `cursor`.
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<SequencedEvent> {
        self.history
            .read()
            .events
            .iter()
            .filter(|e| e.sequence > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Sequence of the latest event, 0 if none was emitted.
    pub fn latest_sequence(&self) -> u64 {
        self.history.read().next_sequence - 1
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for EventFeed {
    fn default() -> Self {
        Self::with_max_history(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn online(flag: bool) -> SyncEvent {
        SyncEvent::ConnectivityChanged { online: flag }
    }

    #[test]
    fn subscribers_receive_in_order() {
        let feed = EventFeed::default();
        let a = feed.subscribe();
        let b = feed.subscribe();

        feed.emit(online(true));
        feed.emit(SyncEvent::DrainStarted { pending: 2 });

        assert_eq!(a.recv().unwrap(), online(true));
        assert_eq!(a.recv().unwrap(), SyncEvent::DrainStarted { pending: 2 });
        assert_eq!(b.try_iter().count(), 2);
    }

    #[test]
    fn dropped_subscriber_is_forgotten() {
        let feed = EventFeed::default();
        let rx = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 1);

        drop(rx);
        feed.emit(online(false));
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[test]
    fn history_is_bounded() {
        let feed = EventFeed::with_max_history(3);
        for pending in 0..10 {
            feed.emit(SyncEvent::DrainStarted { pending });
        }

        let events = feed.poll(0, 100);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].sequence, 8);
        assert_eq!(feed.latest_sequence(), 10);
        assert_eq!(feed.poll(9, 100).len(), 1);
    }
}

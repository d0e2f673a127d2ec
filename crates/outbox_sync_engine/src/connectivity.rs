//! Connectivity signal.

use std::sync::Arc;
use tokio::sync::watch;

/// Shared online/offline flag.
///
/// The application (or a platform network listener) flips it; the
/// coordinator drains while it is set and pauses while it is not. Clones
/// share one flag.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    sender: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    /// Creates a monitor with the given initial state.
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sets the state. Returns true if it changed.
    pub fn set_online(&self, online: bool) -> bool {
        self.sender.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        })
    }

    /// Returns the current state.
    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    /// Returns a receiver notified on every change.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    /// Waits until the state is online.
    pub async fn wait_online(&self) {
        let mut receiver = self.subscribe();
        // the sender lives in self, so the channel cannot close here
        let _ = receiver.wait_for(|online| *online).await;
    }

    /// Waits until the state is offline.
    pub async fn wait_offline(&self) {
        let mut receiver = self.subscribe();
        let _ = receiver.wait_for(|online| !*online).await;
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn set_reports_changes_only() {
        let monitor = ConnectivityMonitor::new(false);
        assert!(!monitor.is_online());
        assert!(monitor.set_online(true));
        assert!(!monitor.set_online(true));
        assert!(monitor.is_online());
    }

    #[test]
    fn clones_share_state() {
        let a = ConnectivityMonitor::default();
        let b = a.clone();
        b.set_online(false);
        assert!(!a.is_online());
    }

    #[tokio::test]
    async fn wait_online_resolves_after_flip() {
        let monitor = ConnectivityMonitor::new(false);
        let flipper = monitor.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            flipper.set_online(true);
        });
        tokio::time::timeout(Duration::from_secs(5), monitor.wait_online())
            .await
            .unwrap();
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn wait_online_returns_at_once_when_online() {
        let monitor = ConnectivityMonitor::new(true);
        tokio::time::timeout(Duration::from_millis(100), monitor.wait_online())
            .await
            .unwrap();
    }
}

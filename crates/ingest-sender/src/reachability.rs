//! Process-wide network reachability.
//!
//! The embedding application reports OS network changes with
//! [`Reachability::set_status`]. Senders subscribe and suspend while the
//! network is unreachable.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Reachable,
    Unreachable,
}

/// Shared reachability state. Cloning yields another handle to the same state.
#[derive(Clone)]
pub struct Reachability {
    tx: Arc<watch::Sender<NetworkStatus>>,
}

impl Reachability {
    pub fn new(initial: NetworkStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn status(&self) -> NetworkStatus {
        *self.tx.borrow()
    }

    pub fn is_reachable(&self) -> bool {
        self.status() == NetworkStatus::Reachable
    }

    /// Update the status. Subscribers are woken only on an actual change.
    pub fn set_status(&self, status: NetworkStatus) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            info!(?status, "Network reachability changed");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.tx.subscribe()
    }
}

impl Default for Reachability {
    fn default() -> Self {
        Self::new(NetworkStatus::Reachable)
    }
}

impl std::fmt::Debug for Reachability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reachability")
            .field("status", &self.status())
            .finish()
    }
}

//! Online/offline state shared between the runtime and the scheduler.

use tokio::sync::watch;
use tracing::info;

/// Snapshot published to watchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Connectivity {
    /// True if the backend is believed reachable.
    pub online: bool,
    /// Offline to online transitions seen so far.
    ///
    /// Watch channels keep only the latest value, so a watcher compares this
    /// counter rather than the flag to notice a reconnect it did not observe.
    pub reconnects: u64,
}

/// Tracks whether the backend is reachable.
///
/// The platform layer reports changes through [`set_online`](Self::set_online);
/// the scheduler watches for offline to online transitions.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    tx: watch::Sender<Connectivity>,
}

impl ConnectivityMonitor {
    /// Creates a monitor with the given initial state.
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(Connectivity {
            online,
            reconnects: 0,
        });
        Self { tx }
    }

    /// Returns true if the backend is believed reachable.
    pub fn is_online(&self) -> bool {
        self.tx.borrow().online
    }

    /// Records the current state. Returns true on an offline to online
    /// transition.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if current.online == online {
                return false;
            }
            current.online = online;
            if online {
                current.reconnects += 1;
            }
            true
        });
        if changed {
            info!(online, "connectivity changed");
        }
        changed && online
    }

    /// Returns a receiver notified on every change.
    pub fn watch(&self) -> watch::Receiver<Connectivity> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}



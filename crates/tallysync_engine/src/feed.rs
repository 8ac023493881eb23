//! Fan-out of sync status transitions to subscribers.
//!
//! The feed:
//! - Delivers every transition to every subscriber, in order
//! - Supports callbacks and channel receivers
//! - Notifies a snapshot of the subscriber list, so callbacks may subscribe
//!   or unsubscribe while being notified

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Weak};
use tallysync_protocol::SyncStatus;

type Callback = Arc<dyn Fn(&SyncStatus) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: AtomicU64,
    callbacks: RwLock<Vec<(u64, Callback)>>,
    channels: RwLock<Vec<Sender<SyncStatus>>>,
}

/// Distributes [`SyncStatus`] values to subscribers.
#[derive(Clone, Default)]
pub struct StatusFeed {
    inner: Arc<Subscribers>,
}

impl StatusFeed {
    /// Creates a feed with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback run synchronously on every transition.
    ///
    /// The callback stays registered until the returned handle is dropped or
    /// [`Subscription::unsubscribe`] is called.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.callbacks.write().push((id, Arc::new(callback)));
        Subscription {
            id,
            feed: Arc::downgrade(&self.inner),
        }
    }

    /// Returns a receiver of every future transition.
    ///
    /// Dropping the receiver unsubscribes it on the next emit.
    pub fn subscribe_channel(&self) -> Receiver<SyncStatus> {
        let (tx, rx) = mpsc::channel();
        self.inner.channels.write().push(tx);
        rx
    }

    /// Delivers a status to every subscriber.
    pub fn emit(&self, status: &SyncStatus) {
        let snapshot: Vec<Callback> = self
            .inner
            .callbacks
            .read()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in snapshot {
            callback(status);
        }

        self.inner
            .channels
            .write()
            .retain(|tx| tx.send(status.clone()).is_ok());
    }

    /// Returns the number of registered callbacks and channels.
    pub fn subscriber_count(&self) -> usize {
        self.inner.callbacks.read().len() + self.inner.channels.read().len()
    }
}

impl std::fmt::Debug for StatusFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusFeed")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Handle of a callback registration.
#[must_use = "dropping a Subscription unsubscribes its callback"]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    feed: Weak<Subscribers>,
}

impl Subscription {
    /// Removes the callback.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(feed) = self.feed.upgrade() {
            feed.callbacks.write().retain(|(id, _)| *id != self.id);
        }
    }
}



//! [`Fanout`] – explicit registry of snapshot subscribers.
//!
//! Each subscriber owns a bounded [`mpsc`] channel.  Delivery uses
//! `try_send`, so a saturated subscriber simply misses that snapshot and a
//! departed one is pruned; neither affects delivery to the others.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

/// Opaque handle identifying one registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// The receiving half handed to a new subscriber.
#[derive(Debug)]
pub struct SnapshotSubscription {
    pub id: SubscriberId,
    pub receiver: mpsc::Receiver<Arc<str>>,
}

#[derive(Debug, Default)]
pub struct Fanout {
    next_id: u64,
    subscribers: Vec<(SubscriberId, mpsc::Sender<Arc<str>>)>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber whose channel buffers at most `capacity`
    /// snapshots (minimum 1).
    pub fn add(&mut self, capacity: usize) -> SnapshotSubscription {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;
        let (tx, receiver) = mpsc::channel(capacity.max(1));
        self.subscribers.push((id, tx));
        SnapshotSubscription { id, receiver }
    }

    /// Unregister `id`.  Returns `false` if it was not registered.
    pub fn remove(&mut self, id: SubscriberId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Offer `snapshot` to every subscriber.  Returns how many accepted it.
    pub fn push(&mut self, snapshot: Arc<str>) -> usize {
        let mut delivered = 0;
        self.subscribers.retain(|(id, tx)| match tx.try_send(Arc::clone(&snapshot)) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(subscriber = id.0, "snapshot subscriber saturated; skipping");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(subscriber = id.0, "snapshot subscriber gone; pruning");
                false
            }
        });
        delivered
    }
}

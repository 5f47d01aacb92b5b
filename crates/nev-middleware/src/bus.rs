//! Key-addressed publish/subscribe seam.
//!
//! The bridge never talks to a concrete transport.  Links hold an
//! `Arc<dyn MessageBus>` and receive deliveries through plain callbacks that
//! run on the bus's own context, never on the control loop.
//!
//! [`LocalBus`] is the in-process implementation: one Tokio broadcast channel
//! per key, one delivery task per subscription.  Deliveries to a single
//! subscription are sequential, so per-key order is preserved.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use nev_types::NevError;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default per-key channel capacity.
const DEFAULT_CAPACITY: usize = 256;

/// Delivery callback.  Runs on the bus's context and must not block.
pub type Callback = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Minimal transport contract the links depend on.
pub trait MessageBus: Send + Sync {
    /// Publish `payload` on `key`.  Having no subscribers is not an error.
    fn publish(&self, key: &str, payload: Bytes) -> Result<(), NevError>;

    /// Register `callback` for every payload published on `key`.
    fn subscribe(&self, key: &str, callback: Callback) -> Result<Subscription, NevError>;

    /// Tear the session down.  Later publishes fail.
    fn close(&self);
}

/// Handle to one live subscription.  Dropping it undeclares the subscriber.
pub struct Subscription {
    key: String,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(key: impl Into<String>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            key: key.into(),
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stop delivery now.
    pub fn undeclare(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            debug!(key = %self.key, "subscription undeclared");
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("key", &self.key).finish()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// LocalBus
// ────────────────────────────────────────────────────────────────────────────

struct Inner {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<Bytes>>>,
    closed: AtomicBool,
}

/// In-process bus.  Clone it cheaply; all clones share the same channels.
#[derive(Clone)]
pub struct LocalBus {
    inner: Arc<Inner>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity: capacity.max(1),
                channels: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    fn sender(&self, key: &str) -> broadcast::Sender<Bytes> {
        let mut channels = self
            .inner
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .clone()
    }

    fn ensure_open(&self) -> Result<(), NevError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(NevError::Channel("bus session closed".to_string()));
        }
        Ok(())
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MessageBus for LocalBus {
    fn publish(&self, key: &str, payload: Bytes) -> Result<(), NevError> {
        self.ensure_open()?;
        // SendError only means nobody is listening on this key yet.
        let _ = self.sender(key).send(payload);
        Ok(())
    }

    fn subscribe(&self, key: &str, callback: Callback) -> Result<Subscription, NevError> {
        self.ensure_open()?;
        let handle = Handle::try_current()
            .map_err(|e| NevError::Transport(format!("no runtime for {key}: {e}")))?;
        let mut rx = self.sender(key).subscribe();
        let topic = key.to_string();

        let task = handle.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => callback(payload),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(topic = %topic, lagged_by = n, "bus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(key, move || task.abort()))
    }

    fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner
                .channels
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            debug!("local bus closed");
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Test double
// ────────────────────────────────────────────────────────────────────────────

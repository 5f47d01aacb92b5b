//! Ingestion adapters.
//!
//! Each adapter is a pair: a [`CameraSink`] half written from the bus
//! delivery context, and an [`IngestSource`] half pulled by the decode
//! worker.  The worker does not know which adapter it is fed by.
//!
//! - [`stream_ingest`] forwards every unit through a bounded channel.
//! - [`latest_ingest`] keeps only the most recent unit and hands it out
//!   once per pacing interval, repeating the same buffer until a newer one
//!   arrives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use nev_types::CameraSink;
use tokio::sync::mpsc;
use tracing::debug;

/// Blocking pull side consumed by the decode worker.
pub trait IngestSource: Send {
    /// Next encoded unit, blocking until one is available.  `None` ends the
    /// worker.
    fn next_unit(&mut self) -> Option<Bytes>;
}

// ────────────────────────────────────────────────────────────────────────────
// Stream adapter
// ────────────────────────────────────────────────────────────────────────────

/// Sink half of [`stream_ingest`].
#[derive(Debug, Clone)]
pub struct StreamIngest {
    tx: mpsc::Sender<Bytes>,
}

pub struct StreamSource {
    rx: mpsc::Receiver<Bytes>,
}

/// Every-unit adapter with room for `backlog` undecoded units.  When the
/// backlog is full, incoming units are dropped.
pub fn stream_ingest(backlog: usize) -> (StreamIngest, StreamSource) {
    let (tx, rx) = mpsc::channel(backlog.max(1));
    (StreamIngest { tx }, StreamSource { rx })
}

impl CameraSink for StreamIngest {
    fn accept(&self, unit: Bytes) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(unit) {
            debug!("decode backlog full; camera unit dropped");
        }
    }
}

impl IngestSource for StreamSource {
    fn next_unit(&mut self) -> Option<Bytes> {
        self.rx.blocking_recv()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Latest-only adapter
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct LatestSlot {
    unit: Mutex<Option<Bytes>>,
    closed: AtomicBool,
}

/// Sink half of [`latest_ingest`].  Writing replaces the held unit.
#[derive(Debug, Clone, Default)]
pub struct LatestFrameIngest {
    slot: Arc<LatestSlot>,
}

impl LatestFrameIngest {
    /// The unit currently held, if any.
    pub fn latest(&self) -> Option<Bytes> {
        self.slot
            .unit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// End the paired source at its next pull.
    pub fn close(&self) {
        self.slot.closed.store(true, Ordering::Release);
    }
}

impl CameraSink for LatestFrameIngest {
    fn accept(&self, unit: Bytes) {
        *self
            .slot
            .unit
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(unit);
    }
}

pub struct LatestSource {
    slot: Arc<LatestSlot>,
    pace: Duration,
}

/// Single-buffer adapter pulled once every `pace`.  Nothing is produced
/// until the first unit arrives.
pub fn latest_ingest(pace: Duration) -> (LatestFrameIngest, LatestSource) {
    let sink = LatestFrameIngest::default();
    let source = LatestSource {
        slot: Arc::clone(&sink.slot),
        pace,
    };
    (sink, source)
}

impl IngestSource for LatestSource {
    fn next_unit(&mut self) -> Option<Bytes> {
        loop {
            if self.slot.closed.load(Ordering::Acquire) {
                return None;
            }
            std::thread::sleep(self.pace);
            let held = self
                .slot
                .unit
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if held.is_some() {
                return held;
            }
        }
    }
}

/// `true` if both handles view the very same buffer.
pub fn same_buffer(a: &Bytes, b: &Bytes) -> bool {
    a.len() == b.len() && std::ptr::eq(a.as_ptr(), b.as_ptr())
}

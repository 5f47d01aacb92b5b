//! The decode worker.
//!
//! Decoder state is not shareable, so exactly one OS thread owns the
//! [`Decoder`] for the lifetime of the pipeline.  Units are decoded in the
//! order the [`IngestSource`] yields them and every resulting frame is handed
//! to [`VideoRelay::fanout`].
//!
//! A decode failure drops that unit only; the decoder keeps its state.  A
//! unit that is the very same buffer as the previously decoded one is not
//! decoded again: its memoised frame, if it produced one, is fanned out
//! instead.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use tracing::{debug, info};

use crate::frame::VideoFrame;
use crate::hevc;
use crate::ingest::{IngestSource, same_buffer};
use crate::relay::VideoRelay;
use crate::VideoError;

/// H.265 elementary-stream decoder backend.
pub trait Decoder: Send {
    /// Decode one access unit.  May return zero frames while the decoder is
    /// buffering.
    fn decode(&mut self, unit: &[u8]) -> Result<Vec<VideoFrame>, VideoError>;
}

/// Counters returned when the worker exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Units pulled from the source.
    pub units: u64,
    /// Units skipped while waiting for the first random-access point.
    pub skipped: u64,
    /// Units the decoder rejected.
    pub failures: u64,
    /// Frames fanned out from fresh decodes.
    pub frames: u64,
    /// Pulls served from the memoised frame.
    pub reused: u64,
}

pub struct DecodeWorker {
    handle: JoinHandle<WorkerStats>,
}

impl DecodeWorker {
    /// Start the worker thread.  It runs until `source` is exhausted.
    pub fn spawn(
        decoder: Box<dyn Decoder>,
        source: Box<dyn IngestSource>,
        relay: Arc<VideoRelay>,
    ) -> Result<Self, VideoError> {
        let handle = thread::Builder::new()
            .name("nev-video-decode".to_string())
            .spawn(move || run(decoder, source, &relay))
            .map_err(|e| VideoError::Decode(format!("cannot spawn decode worker: {e}")))?;
        Ok(Self { handle })
    }

    /// Wait for the worker to finish.
    pub fn join(self) -> Result<WorkerStats, VideoError> {
        self.handle
            .join()
            .map_err(|_| VideoError::Decode("decode worker panicked".to_string()))
    }
}

fn run(
    mut decoder: Box<dyn Decoder>,
    mut source: Box<dyn IngestSource>,
    relay: &VideoRelay,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    let mut synced = false;
    // Last decoded buffer and the frame it produced, if any.
    let mut memo: Option<(Bytes, Option<Arc<VideoFrame>>)> = None;

    while let Some(unit) = source.next_unit() {
        stats.units += 1;

        if let Some((buf, frame)) = &memo
            && same_buffer(buf, &unit)
        {
            if let Some(frame) = frame {
                relay.fanout(Arc::clone(frame));
            }
            stats.reused += 1;
            continue;
        }

        if !synced {
            if !hevc::starts_decodable(&unit) {
                stats.skipped += 1;
                continue;
            }
            synced = true;
            debug!("decoder synchronised on random-access point");
        }

        match decoder.decode(&unit) {
            Ok(frames) => {
                let mut last = None;
                for frame in frames {
                    let frame = Arc::new(frame);
                    relay.fanout(Arc::clone(&frame));
                    stats.frames += 1;
                    last = Some(frame);
                }
                memo = Some((unit, last));
            }
            Err(e) => {
                stats.failures += 1;
                debug!(error = %e, bytes = unit.len(), "decode failed; unit dropped");
            }
        }
    }

    info!(
        units = stats.units,
        frames = stats.frames,
        failures = stats.failures,
        "decode worker stopped"
    );
    stats
}

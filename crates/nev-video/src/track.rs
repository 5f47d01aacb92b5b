//! [`VideoTrack`] – the consumer end of one viewer's queue.
//!
//! The media transport calls [`VideoTrack::recv`] once per output tick.  Each
//! call yields the oldest queued frame converted to I420 and stamped on the
//! track's own 90 kHz clock.

use std::sync::Arc;
use std::time::Instant;

use crate::frame::{I420Frame, VideoFrame};
use crate::queue::FrameQueue;
use crate::relay::TrackId;

/// RTP video clock rate.
pub const CLOCK_RATE: u64 = 90_000;

/// Per-track presentation clock.  Starts at zero on the first stamp and
/// never repeats or goes backwards.
#[derive(Debug, Default)]
pub struct TrackClock {
    start: Option<Instant>,
    last: Option<u64>,
}

impl TrackClock {
    pub fn stamp(&mut self, now: Instant) -> u64 {
        let start = *self.start.get_or_insert(now);
        let elapsed = now.saturating_duration_since(start);
        let ticks = (elapsed.as_micros() * u128::from(CLOCK_RATE) / 1_000_000) as u64;
        let pts = match self.last {
            Some(last) if ticks <= last => last + 1,
            _ => ticks,
        };
        self.last = Some(pts);
        pts
    }
}

#[derive(Debug)]
pub struct VideoTrack {
    id: TrackId,
    queue: Arc<FrameQueue>,
    clock: TrackClock,
}

impl VideoTrack {
    pub(crate) fn new(id: TrackId, queue: Arc<FrameQueue>) -> Self {
        Self {
            id,
            queue,
            clock: TrackClock::default(),
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    /// Frames currently waiting.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Wait for the next frame, convert and stamp it.  `None` once the track
    /// has been removed from the relay.
    pub async fn recv(&mut self) -> Option<I420Frame> {
        let frame = self.queue.pop().await?;
        let mut out = frame.to_i420();
        out.pts = self.clock.stamp(Instant::now());
        Some(out)
    }

    /// Take the oldest raw frame without waiting.
    pub fn try_next_frame(&self) -> Option<Arc<VideoFrame>> {
        self.queue.try_pop()
    }
}

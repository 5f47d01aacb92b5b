//! Channel bandwidth accounting.
//!
//! Bus callbacks bump [`ChannelCounters`] from their own context; the
//! control loop owns the [`BandwidthMeter`] and drains the counters once per
//! window of at least one second.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Minimum window before a sample is taken.
pub const WINDOW: Duration = Duration::from_secs(1);

/// Byte counters shared between the delivery context and the loop.
#[derive(Debug, Default)]
pub struct ChannelCounters {
    telemetry: AtomicU64,
    camera: AtomicU64,
}

impl ChannelCounters {
    pub fn add_telemetry(&self, bytes: usize) {
        self.telemetry.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn add_camera(&self, bytes: usize) {
        self.camera.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Read and zero both counters: `(camera, telemetry)`.
    pub fn take(&self) -> (u64, u64) {
        (
            self.camera.swap(0, Ordering::Relaxed),
            self.telemetry.swap(0, Ordering::Relaxed),
        )
    }
}

/// Megabits per second over `elapsed`, rounded to 3 decimals.
pub fn mbps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    let raw = bytes as f64 * 8.0 / (secs * 1e6);
    (raw * 1000.0).round() / 1000.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandwidthSample {
    pub camera_mbps: f64,
    pub telemetry_mbps: f64,
}

#[derive(Debug)]
pub struct BandwidthMeter {
    counters: Arc<ChannelCounters>,
    window_start: Instant,
}

impl BandwidthMeter {
    pub fn new(counters: Arc<ChannelCounters>, now: Instant) -> Self {
        Self {
            counters,
            window_start: now,
        }
    }

    /// Close the current window if it is at least [`WINDOW`] long.
    pub fn sample(&mut self, now: Instant) -> Option<BandwidthSample> {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < WINDOW {
            return None;
        }
        let (camera, telemetry) = self.counters.take();
        self.window_start = now;
        Some(BandwidthSample {
            camera_mbps: mbps(camera, elapsed),
            telemetry_mbps: mbps(telemetry, elapsed),
        })
    }
}

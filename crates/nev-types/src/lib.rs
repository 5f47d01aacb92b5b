//! `nev-types` – The shared vocabulary of the NEV teleoperation bridge.
//!
//! Every other crate speaks in these types: the telemetry buckets that make
//! up the canonical [`SharedState`], the closed code sets used on the wire,
//! the partial-update patches produced by the vehicle link, and the global
//! [`NevError`].
//!
//! # Modules
//!
//! - [`codes`] – enum-valued wire codes (modes, sources, e-stop flags).
//! - [`state`] – the [`SharedState`] aggregate and its buckets.
//! - [`telemetry`] – inbound vehicle reports and structured partial updates.

pub mod codes;
pub mod state;
pub mod telemetry;

use bytes::Bytes;
use thiserror::Error;

pub use codes::{ActiveSource, AlertLevel, BridgeFlag, Mode, MuxFlag, NetStatusCode};
pub use state::{
    Alert, ControlState, EStopStatus, FieldMap, HunterStatus, IndexedList, MAX_INDEXED_SLOTS,
    MuxStatus, NetworkStatus, SharedState, SystemResources, TwistValues,
};
pub use telemetry::{Bucket, BucketPatch, TelemetryUpdate};

/// Receives raw compressed camera units straight from the vehicle channel.
///
/// Camera traffic bypasses the control loop entirely; the video relay
/// implements this trait for each of its ingestion adapters.
pub trait CameraSink: Send + Sync {
    /// Hand one compressed unit to the sink.  Must not block.
    fn accept(&self, unit: Bytes);
}

/// Wall-clock time as fractional seconds since the Unix epoch.
pub fn epoch_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}

/// Global error type spanning transport failures, malformed payloads and
/// out-of-range wire codes.
#[derive(Error, Debug)]
pub enum NevError {
    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Malformed payload on {topic}: {details}")]
    Parsing { topic: String, details: String },

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Invalid {kind} code: {code}")]
    InvalidCode { kind: &'static str, code: i64 },
}

impl NevError {
    /// Shorthand for a [`NevError::Parsing`] tied to a topic key.
    pub fn parsing(topic: impl Into<String>, details: impl std::fmt::Display) -> Self {
        NevError::Parsing {
            topic: topic.into(),
            details: details.to_string(),
        }
    }
}

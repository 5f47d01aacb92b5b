//! Inbound vehicle reports and the structured updates derived from them.
//!
//! Every vehicle topic parses into exactly one [`TelemetryUpdate`].  Parsing
//! is the validation boundary: a payload that is not a JSON object, carries a
//! field of the wrong type, or (for list topics) misses a required field is
//! rejected as a whole with [`NevError::Parsing`].

use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};

use crate::NevError;
use crate::state::{
    EStopPatch, FieldMap, MAX_INDEXED_SLOTS, HunterPatch, MuxPatch, NetworkPatch, ResourcesPatch, TwistPatch,
};

/// Named telemetry buckets of the [`SharedState`][crate::SharedState].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Mux,
    Twist,
    Network,
    Hunter,
    Estop,
    Resources,
}

impl Bucket {
    /// Snapshot key of the bucket.
    pub fn key(self) -> &'static str {
        match self {
            Bucket::Mux => "mux",
            Bucket::Twist => "twist",
            Bucket::Network => "network",
            Bucket::Hunter => "hunter",
            Bucket::Estop => "estop",
            Bucket::Resources => "resources",
        }
    }
}

/// A partial update addressed to one bucket.
#[derive(Debug, Clone, PartialEq)]
pub enum BucketPatch {
    Mux(MuxPatch),
    Twist(TwistPatch),
    Network(NetworkPatch),
    Hunter(HunterPatch),
    Estop(EStopPatch),
    Resources(ResourcesPatch),
}

impl BucketPatch {
    /// Parse a raw field-map payload into a patch for `bucket`.
    pub fn parse(bucket: Bucket, raw: &[u8]) -> Result<Self, NevError> {
        Ok(match bucket {
            Bucket::Mux => BucketPatch::Mux(decode_fields(bucket.key(), raw)?),
            Bucket::Twist => BucketPatch::Twist(decode_fields(bucket.key(), raw)?),
            Bucket::Network => BucketPatch::Network(decode_fields(bucket.key(), raw)?),
            Bucket::Hunter => BucketPatch::Hunter(decode_fields(bucket.key(), raw)?),
            Bucket::Estop => BucketPatch::Estop(decode_fields(bucket.key(), raw)?),
            Bucket::Resources => BucketPatch::Resources(decode_fields(bucket.key(), raw)?),
        })
    }

    pub fn bucket(&self) -> Bucket {
        match self {
            BucketPatch::Mux(_) => Bucket::Mux,
            BucketPatch::Twist(_) => Bucket::Twist,
            BucketPatch::Network(_) => Bucket::Network,
            BucketPatch::Hunter(_) => Bucket::Hunter,
            BucketPatch::Estop(_) => Bucket::Estop,
            BucketPatch::Resources(_) => Bucket::Resources,
        }
    }
}

/// An `idx` the vehicle may address; anything past the slot capacity makes
/// the whole message malformed.
fn slot_index<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    let idx = u64::deserialize(deserializer)?;
    match usize::try_from(idx) {
        Ok(idx) if idx < MAX_INDEXED_SLOTS => Ok(idx),
        _ => Err(de::Error::custom(format_args!(
            "idx {idx} out of range (max {})",
            MAX_INDEXED_SLOTS - 1
        ))),
    }
}

/// One GPU entry of the `gpu` topic.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GpuReport {
    #[serde(deserialize_with = "slot_index")]
    pub idx: usize,
    pub gpu_usage: f64,
    pub gpu_mem_used: f64,
    pub gpu_mem_total: f64,
    pub gpu_temp: f64,
    pub gpu_power: f64,
}

impl GpuReport {
    pub fn fields(&self) -> FieldMap {
        object(json!({
            "gpu_usage": self.gpu_usage,
            "gpu_mem_used": self.gpu_mem_used,
            "gpu_mem_total": self.gpu_mem_total,
            "gpu_temp": self.gpu_temp,
            "gpu_power": self.gpu_power,
        }))
    }
}

/// One partition entry of the `disk` topic.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PartitionReport {
    #[serde(deserialize_with = "slot_index")]
    pub idx: usize,
    pub mountpoint: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub percent: f64,
    pub accessible: bool,
}

impl PartitionReport {
    pub fn fields(&self) -> FieldMap {
        object(json!({
            "mountpoint": self.mountpoint,
            "total_bytes": self.total_bytes,
            "used_bytes": self.used_bytes,
            "percent": self.percent,
            "accessible": self.accessible,
        }))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DiskReport {
    #[serde(default)]
    pub partitions: Vec<PartitionReport>,
}

/// One interface entry of the `net` topic.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InterfaceReport {
    #[serde(deserialize_with = "slot_index")]
    pub idx: usize,
    pub name: String,
    pub is_up: bool,
    pub speed_mbps: f64,
    pub in_bps: f64,
    pub out_bps: f64,
}

impl InterfaceReport {
    pub fn fields(&self) -> FieldMap {
        object(json!({
            "name": self.name,
            "is_up": self.is_up,
            "speed_mbps": self.speed_mbps,
            "in_bps": self.in_bps,
            "out_bps": self.out_bps,
        }))
    }
}

/// The `net` topic: interface counters plus per-interface detail.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NetReport {
    pub net_total_ifaces: i64,
    pub net_active_ifaces: i64,
    pub net_down_ifaces: i64,
    #[serde(default)]
    pub interfaces: Vec<InterfaceReport>,
}

impl NetReport {
    /// The counter part of the report, addressed to the resources bucket.
    pub fn counters(&self) -> ResourcesPatch {
        ResourcesPatch {
            net_total_ifaces: Some(self.net_total_ifaces),
            net_active_ifaces: Some(self.net_active_ifaces),
            net_down_ifaces: Some(self.net_down_ifaces),
            ..Default::default()
        }
    }
}

/// Heartbeat acknowledgement echoed by the vehicle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct HeartbeatAck {
    #[serde(default)]
    pub ts: f64,
}

impl HeartbeatAck {
    /// Round trip in milliseconds given the current wall-clock time, or
    /// `None` when the ack carries no usable timestamp.
    pub fn rtt_ms(&self, now_epoch_secs: f64) -> Option<f64> {
        (self.ts > 0.0).then(|| ((now_epoch_secs - self.ts) * 1000.0).max(0.0))
    }
}

/// A validated vehicle telemetry update ready to be applied by the state
/// engine.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryUpdate {
    Patch(BucketPatch),
    Gpu(Vec<GpuReport>),
    Disk(DiskReport),
    Net(NetReport),
}

/// Decode `raw` as `T`, mapping failures to [`NevError::Parsing`].
pub fn decode<T: DeserializeOwned>(topic: &str, raw: &[u8]) -> Result<T, NevError> {
    serde_json::from_slice(raw).map_err(|e| NevError::parsing(topic, e))
}

/// Like [`decode`], but only accepts a JSON object at the top level.
pub fn decode_fields<T: DeserializeOwned>(topic: &str, raw: &[u8]) -> Result<T, NevError> {
    let value: Value = serde_json::from_slice(raw).map_err(|e| NevError::parsing(topic, e))?;
    if !value.is_object() {
        return Err(NevError::parsing(topic, "payload is not a field map"));
    }
    serde_json::from_value(value).map_err(|e| NevError::parsing(topic, e))
}

fn object(value: Value) -> FieldMap {
    match value {
        Value::Object(map) => map,
        _ => FieldMap::new(),
    }
}

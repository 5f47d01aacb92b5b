//! [`VehicleLink`] – the vehicle side of the bridge.
//!
//! Inbound, it parses every `nev/vehicle/*` payload on the bus's delivery
//! context and hands the validated result to the control loop.  Camera units
//! skip the loop entirely and go straight to a [`CameraSink`].
//!
//! Outbound, it publishes sequenced `nev/gcs/*` envelopes.  Publishing is
//! fire-and-forget: a failure is logged and the command is lost.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use nev_types::telemetry::{HeartbeatAck, decode, decode_fields};
use nev_types::{
    Bucket, BucketPatch, CameraSink, Mode, NevError, TelemetryUpdate, epoch_seconds,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bandwidth::ChannelCounters;
use crate::bus::{Callback, MessageBus, Subscription};
use crate::handoff::{CommandSender, ControlCommand};

/// Vehicle → server topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VehicleTopic {
    Mux,
    Twist,
    Network,
    Hunter,
    Estop,
    Cpu,
    Mem,
    Gpu,
    Disk,
    Net,
    Camera,
    HbAck,
}

impl VehicleTopic {
    pub const ALL: [VehicleTopic; 12] = [
        VehicleTopic::Mux,
        VehicleTopic::Twist,
        VehicleTopic::Network,
        VehicleTopic::Hunter,
        VehicleTopic::Estop,
        VehicleTopic::Cpu,
        VehicleTopic::Mem,
        VehicleTopic::Gpu,
        VehicleTopic::Disk,
        VehicleTopic::Net,
        VehicleTopic::Camera,
        VehicleTopic::HbAck,
    ];

    pub fn key(self) -> &'static str {
        match self {
            VehicleTopic::Mux => "nev/vehicle/mux",
            VehicleTopic::Twist => "nev/vehicle/twist",
            VehicleTopic::Network => "nev/vehicle/network",
            VehicleTopic::Hunter => "nev/vehicle/hunter",
            VehicleTopic::Estop => "nev/vehicle/estop",
            VehicleTopic::Cpu => "nev/vehicle/cpu",
            VehicleTopic::Mem => "nev/vehicle/mem",
            VehicleTopic::Gpu => "nev/vehicle/gpu",
            VehicleTopic::Disk => "nev/vehicle/disk",
            VehicleTopic::Net => "nev/vehicle/net",
            VehicleTopic::Camera => "nev/vehicle/camera",
            VehicleTopic::HbAck => "nev/vehicle/hb_ack",
        }
    }
}

/// Server → vehicle topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GcsTopic {
    Heartbeat,
    Teleop,
    Estop,
    CmdMode,
}

impl GcsTopic {
    pub fn key(self) -> &'static str {
        match self {
            GcsTopic::Heartbeat => "nev/gcs/heartbeat",
            GcsTopic::Teleop => "nev/gcs/teleop",
            GcsTopic::Estop => "nev/gcs/estop",
            GcsTopic::CmdMode => "nev/gcs/cmd_mode",
        }
    }
}

/// Parse a telemetry payload into the update it produces.
///
/// `cpu` and `mem` both feed the resources bucket.  `camera` and `hb_ack`
/// are not telemetry and are rejected.
pub fn parse_telemetry(topic: VehicleTopic, raw: &[u8]) -> Result<TelemetryUpdate, NevError> {
    let patch = |bucket| BucketPatch::parse(bucket, raw).map(TelemetryUpdate::Patch);
    match topic {
        VehicleTopic::Mux => patch(Bucket::Mux),
        VehicleTopic::Twist => patch(Bucket::Twist),
        VehicleTopic::Network => patch(Bucket::Network),
        VehicleTopic::Hunter => patch(Bucket::Hunter),
        VehicleTopic::Estop => patch(Bucket::Estop),
        VehicleTopic::Cpu | VehicleTopic::Mem => patch(Bucket::Resources),
        VehicleTopic::Gpu => decode(topic.key(), raw).map(TelemetryUpdate::Gpu),
        VehicleTopic::Disk => decode_fields(topic.key(), raw).map(TelemetryUpdate::Disk),
        VehicleTopic::Net => decode_fields(topic.key(), raw).map(TelemetryUpdate::Net),
        VehicleTopic::Camera | VehicleTopic::HbAck => {
            Err(NevError::parsing(topic.key(), "not a telemetry topic"))
        }
    }
}

/// Wrapping 16-bit command sequence shared by every outbound topic.
#[derive(Debug, Default)]
pub struct SequenceCounter(AtomicU16);

impl SequenceCounter {
    /// Return the current value and advance, wrapping after 65535.
    pub fn next(&self) -> u16 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Round to 3 decimal digits.
pub fn quantize(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[derive(Serialize)]
struct HeartbeatEnvelope {
    ts: f64,
    seq: u16,
}

#[derive(Serialize)]
struct TeleopEnvelope {
    linear_x: f64,
    angular_z: f64,
    seq: u16,
}

#[derive(Serialize)]
struct EstopEnvelope {
    active: bool,
    seq: u16,
}

#[derive(Serialize)]
struct ModeEnvelope {
    mode: Mode,
    seq: u16,
}

pub struct VehicleLink {
    bus: Arc<dyn MessageBus>,
    seq: SequenceCounter,
    counters: Arc<ChannelCounters>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl VehicleLink {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            bus,
            seq: SequenceCounter::default(),
            counters: Arc::new(ChannelCounters::default()),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Byte counters fed by the inbound callbacks.
    pub fn counters(&self) -> Arc<ChannelCounters> {
        Arc::clone(&self.counters)
    }

    /// Subscribe to every vehicle topic.  Camera units go to `camera` when
    /// one is given and are otherwise only counted.
    pub fn start(
        &self,
        handoff: CommandSender,
        camera: Option<Arc<dyn CameraSink>>,
    ) -> Result<(), NevError> {
        let mut subs = Vec::with_capacity(VehicleTopic::ALL.len());
        for topic in VehicleTopic::ALL {
            let callback = self.callback(topic, handoff.clone(), camera.clone());
            subs.push(self.bus.subscribe(topic.key(), callback)?);
        }
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(subs);
        info!("vehicle link started");
        Ok(())
    }

    /// Undeclare every subscription.
    pub fn stop(&self) {
        let subs: Vec<_> = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for sub in subs {
            sub.undeclare();
        }
        info!("vehicle link stopped");
    }

    fn callback(
        &self,
        topic: VehicleTopic,
        handoff: CommandSender,
        camera: Option<Arc<dyn CameraSink>>,
    ) -> Callback {
        let counters = Arc::clone(&self.counters);
        match topic {
            VehicleTopic::Camera => Arc::new(move |payload: Bytes| {
                counters.add_camera(payload.len());
                if let Some(sink) = &camera {
                    sink.accept(payload);
                }
            }),
            VehicleTopic::HbAck => Arc::new(move |payload: Bytes| {
                counters.add_telemetry(payload.len());
                match decode::<HeartbeatAck>(topic.key(), &payload) {
                    Ok(ack) => {
                        if let Some(rtt_ms) = ack.rtt_ms(epoch_seconds()) {
                            forward(&handoff, ControlCommand::RoundTrip { rtt_ms });
                        }
                    }
                    Err(e) => warn!(topic = topic.key(), error = %e, "dropping heartbeat ack"),
                }
            }),
            _ => Arc::new(move |payload: Bytes| {
                counters.add_telemetry(payload.len());
                match parse_telemetry(topic, &payload) {
                    Ok(update) => forward(&handoff, ControlCommand::Telemetry(update)),
                    Err(e) => warn!(topic = topic.key(), error = %e, "dropping vehicle message"),
                }
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Outbound commands
    // -----------------------------------------------------------------------

    pub fn send_heartbeat(&self) -> u16 {
        let seq = self.seq.next();
        self.put(
            GcsTopic::Heartbeat,
            &HeartbeatEnvelope {
                ts: epoch_seconds(),
                seq,
            },
        );
        seq
    }

    pub fn send_teleop(&self, linear_x: f64, angular_z: f64) -> u16 {
        let seq = self.seq.next();
        self.put(
            GcsTopic::Teleop,
            &TeleopEnvelope {
                linear_x: quantize(linear_x),
                angular_z: quantize(angular_z),
                seq,
            },
        );
        seq
    }

    pub fn send_estop(&self, active: bool) -> u16 {
        let seq = self.seq.next();
        self.put(GcsTopic::Estop, &EstopEnvelope { active, seq });
        seq
    }

    pub fn send_cmd_mode(&self, mode: Mode) -> u16 {
        let seq = self.seq.next();
        self.put(GcsTopic::CmdMode, &ModeEnvelope { mode, seq });
        seq
    }

    fn put<T: Serialize>(&self, topic: GcsTopic, envelope: &T) {
        let payload = match serde_json::to_vec(envelope) {
            Ok(p) => Bytes::from(p),
            Err(e) => {
                warn!(topic = topic.key(), error = %e, "envelope serialisation failed");
                return;
            }
        };
        if let Err(e) = self.bus.publish(topic.key(), payload) {
            warn!(topic = topic.key(), error = %e, "publish failed; command dropped");
        }
    }
}

fn forward(handoff: &CommandSender, command: ControlCommand) {
    if let Err(e) = handoff.submit(command) {
        debug!(error = %e, "control loop gone; dropping update");
    }
}

//! [`StateEngine`] – the single writer of the [`SharedState`].
//!
//! The control loop owns exactly one engine.  Every mutation entry point
//! either stays silent (bookkeeping only) or ends in [`StateEngine::publish`],
//! which recomputes the alerts and pushes a fresh snapshot to every
//! subscriber.
//!
//! # Snapshot format
//!
//! Snapshots are JSON objects with the keys `mux, twist, network, hunter,
//! estop, resources, gpu_list, disk_partitions, net_interfaces,
//! remote_enabled, control, station_connected, alerts, server_time,
//! vehicle_age`.

use std::sync::Arc;
use std::time::Instant;

use nev_types::{
    Alert, BucketPatch, ControlState, EStopStatus, FieldMap, HunterStatus, IndexedList, Mode,
    MuxStatus, NetworkStatus, NevError, SharedState, SystemResources, TelemetryUpdate,
    TwistValues, epoch_seconds,
};
use serde::Serialize;
use tracing::warn;

use crate::alerts::AlertEvaluator;
use crate::fanout::{Fanout, SnapshotSubscription, SubscriberId};

/// Which positional list an indexed upsert targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexedListKind {
    Gpu,
    DiskPartitions,
    NetInterfaces,
}

#[derive(Serialize)]
struct Snapshot<'a> {
    mux: &'a MuxStatus,
    twist: &'a TwistValues,
    network: &'a NetworkStatus,
    hunter: &'a HunterStatus,
    estop: &'a EStopStatus,
    resources: &'a SystemResources,
    gpu_list: &'a IndexedList,
    disk_partitions: &'a IndexedList,
    net_interfaces: &'a IndexedList,
    remote_enabled: bool,
    control: &'a ControlState,
    station_connected: bool,
    alerts: &'a [Alert],
    server_time: f64,
    vehicle_age: f64,
}

/// Owns the aggregate, its alert rules and its subscribers.
pub struct StateEngine {
    state: SharedState,
    evaluator: AlertEvaluator,
    fanout: Fanout,
}

impl StateEngine {
    pub fn new() -> Self {
        Self::with_evaluator(AlertEvaluator::standard())
    }

    pub fn with_evaluator(evaluator: AlertEvaluator) -> Self {
        Self {
            state: SharedState::new(),
            evaluator,
            fanout: Fanout::new(),
        }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    // -----------------------------------------------------------------------
    // Primitive mutations
    // -----------------------------------------------------------------------

    /// Overwrite only the fields present in `patch` on its bucket.
    pub fn merge_update(&mut self, patch: &BucketPatch) {
        let state = &mut self.state;
        match patch {
            BucketPatch::Mux(p) => state.mux.apply(p),
            BucketPatch::Twist(p) => state.twist.apply(p),
            BucketPatch::Network(p) => state.network.apply(p),
            BucketPatch::Hunter(p) => state.hunter.apply(p),
            BucketPatch::Estop(p) => state.estop.apply(p),
            BucketPatch::Resources(p) => state.resources.apply(p),
        }
    }

    /// Grow `list` to `idx + 1` slots if needed and merge `fields` into slot
    /// `idx`.
    pub fn upsert_indexed(&mut self, list: IndexedListKind, idx: usize, fields: FieldMap) {
        let target = match list {
            IndexedListKind::Gpu => &mut self.state.gpu_list,
            IndexedListKind::DiskPartitions => &mut self.state.disk_partitions,
            IndexedListKind::NetInterfaces => &mut self.state.net_interfaces,
        };
        if !target.upsert(idx, fields) {
            warn!(list = ?list, idx, "indexed slot out of range; entry dropped");
        }
    }

    // -----------------------------------------------------------------------
    // Vehicle-driven updates
    // -----------------------------------------------------------------------

    /// Apply one validated vehicle update received at `now`, stamp the
    /// vehicle receive time and publish.
    pub fn apply_telemetry(&mut self, update: TelemetryUpdate, now: Instant) {
        match update {
            TelemetryUpdate::Patch(patch) => {
                if let BucketPatch::Mux(mux) = &patch {
                    self.state.remote_enabled = mux.remote_enabled.unwrap_or(false);
                }
                self.merge_update(&patch);
            }
            TelemetryUpdate::Gpu(gpus) => {
                for gpu in &gpus {
                    self.upsert_indexed(IndexedListKind::Gpu, gpu.idx, gpu.fields());
                }
            }
            TelemetryUpdate::Disk(disk) => {
                for part in &disk.partitions {
                    self.upsert_indexed(IndexedListKind::DiskPartitions, part.idx, part.fields());
                }
            }
            TelemetryUpdate::Net(net) => {
                self.merge_update(&BucketPatch::Resources(net.counters()));
                for iface in &net.interfaces {
                    self.upsert_indexed(IndexedListKind::NetInterfaces, iface.idx, iface.fields());
                }
            }
        }
        self.state.last_vehicle_recv = Some(now);
        self.publish(now);
    }

    pub fn set_round_trip(&mut self, rtt_ms: f64) {
        self.state.network.rtt_ms = rtt_ms;
    }

    pub fn set_bandwidth(&mut self, camera_mbps: f64, telemetry_mbps: f64) {
        self.state.network.bw_camera_mbps = camera_mbps;
        self.state.network.bw_telemetry_mbps = telemetry_mbps;
    }

    // -----------------------------------------------------------------------
    // Station / operator driven updates
    // -----------------------------------------------------------------------

    /// Mirror the station liveness flag; publishes only on change.
    pub fn set_station_connected(&mut self, connected: bool, now: Instant) -> bool {
        if self.state.station_connected == connected {
            return false;
        }
        self.state.station_connected = connected;
        self.publish(now);
        true
    }

    /// Update the joystick flag; publishes only on change.
    pub fn set_joystick_connected(&mut self, connected: bool, now: Instant) -> bool {
        if self.state.control.joystick_connected == connected {
            return false;
        }
        self.state.control.joystick_connected = connected;
        self.publish(now);
        true
    }

    /// Record the last relayed teleop command.
    pub fn set_teleop(&mut self, linear_x: f64, angular_z: f64) {
        self.state.control.linear_x = linear_x;
        self.state.control.angular_z = angular_z;
    }

    pub fn set_estop_command(&mut self, active: bool, now: Instant) {
        self.state.control.estop = active;
        self.publish(now);
    }

    pub fn set_mode_command(&mut self, mode: Mode, now: Instant) {
        self.state.control.mode = mode;
        self.publish(now);
    }

    // -----------------------------------------------------------------------
    // Validation & fanout
    // -----------------------------------------------------------------------

    /// Compute the ordered alert list for the current state.  Pure.
    pub fn validate(&self, now: Instant) -> Vec<Alert> {
        self.evaluator.evaluate(&self.state, now)
    }

    /// Replace the stored alerts with a fresh validation pass.
    pub fn refresh_alerts(&mut self, now: Instant) {
        self.state.alerts = self.validate(now);
    }

    /// Serialise the full snapshot as of `now`.
    pub fn snapshot_json(&self, now: Instant) -> Result<String, NevError> {
        let state = &self.state;
        let vehicle_age = state
            .last_vehicle_recv
            .map(|at| now.saturating_duration_since(at).as_secs_f64())
            .unwrap_or(-1.0);
        let snapshot = Snapshot {
            mux: &state.mux,
            twist: &state.twist,
            network: &state.network,
            hunter: &state.hunter,
            estop: &state.estop,
            resources: &state.resources,
            gpu_list: &state.gpu_list,
            disk_partitions: &state.disk_partitions,
            net_interfaces: &state.net_interfaces,
            remote_enabled: state.remote_enabled,
            control: &state.control,
            station_connected: state.station_connected,
            alerts: &state.alerts,
            server_time: epoch_seconds(),
            vehicle_age,
        };
        serde_json::to_string(&snapshot).map_err(|e| NevError::Serialization(e.to_string()))
    }

    /// Push the current snapshot to every subscriber.  Returns the number of
    /// subscribers that accepted it.
    pub fn broadcast(&mut self, now: Instant) -> usize {
        match self.snapshot_json(now) {
            Ok(json) => self.fanout.push(Arc::from(json)),
            Err(e) => {
                warn!(error = %e, "snapshot serialisation failed; broadcast skipped");
                0
            }
        }
    }

    /// Validate, then broadcast.
    pub fn publish(&mut self, now: Instant) -> usize {
        self.refresh_alerts(now);
        self.broadcast(now)
    }

    pub fn add_subscriber(&mut self, capacity: usize) -> SnapshotSubscription {
        self.fanout.add(capacity)
    }

    pub fn remove_subscriber(&mut self, id: SubscriberId) -> bool {
        self.fanout.remove(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.fanout.len()
    }
}

impl Default for StateEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nev_types::Bucket;
    use nev_types::telemetry::{DiskReport, GpuReport, NetReport, decode};
    use serde_json::Value;
    use std::time::Duration;

    fn patch(bucket: Bucket, raw: &str) -> BucketPatch {
        BucketPatch::parse(bucket, raw.as_bytes()).unwrap()
    }

    fn parse(json: &str) -> Value {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn merge_update_keeps_absent_fields_for_every_bucket() {
        let mut engine = StateEngine::new();
        engine.merge_update(&patch(Bucket::Mux, r#"{"nav_active":true,"final_active":true}"#));
        engine.merge_update(&patch(Bucket::Twist, r#"{"nav_lx":0.4,"final_az":0.1}"#));
        engine.merge_update(&patch(Bucket::Network, r#"{"connected":true,"rtt_ms":12.0}"#));
        engine.merge_update(&patch(Bucket::Hunter, r#"{"battery_voltage":26.0,"error_code":3}"#));
        engine.merge_update(&patch(Bucket::Estop, r#"{"is_estop":true,"bridge_flag":3}"#));
        engine.merge_update(&patch(Bucket::Resources, r#"{"cpu_usage":50.0,"ram_total":8}"#));

        engine.merge_update(&patch(Bucket::Mux, r#"{"nav_active":false}"#));
        engine.merge_update(&patch(Bucket::Twist, r#"{"nav_lx":0.5}"#));
        engine.merge_update(&patch(Bucket::Network, r#"{"rtt_ms":40.0}"#));
        engine.merge_update(&patch(Bucket::Hunter, r#"{"error_code":0}"#));
        engine.merge_update(&patch(Bucket::Estop, r#"{"is_estop":false}"#));
        engine.merge_update(&patch(Bucket::Resources, r#"{"ram_used":4}"#));

        let s = engine.state();
        assert!(s.mux.final_active && !s.mux.nav_active);
        assert_eq!((s.twist.nav_lx, s.twist.final_az), (0.5, 0.1));
        assert!(s.network.connected);
        assert_eq!(s.network.rtt_ms, 40.0);
        assert_eq!(s.hunter.battery_voltage, 26.0);
        assert_eq!(s.hunter.error_code, 0);
        assert_eq!(s.estop.bridge_flag, nev_types::BridgeFlag::HbTimeout);
        assert!(!s.estop.is_estop);
        assert_eq!((s.resources.cpu_usage, s.resources.ram_total, s.resources.ram_used), (50.0, 8, 4));
    }

    #[test]
    fn merge_update_does_not_stamp_or_publish() {
        let mut engine = StateEngine::new();
        let mut sub = engine.add_subscriber(4);
        engine.merge_update(&patch(Bucket::Twist, r#"{"nav_lx":1.0}"#));
        assert!(engine.state().last_vehicle_recv.is_none());
        assert!(sub.receiver.try_recv().is_err());
    }

    #[test]
    fn mux_telemetry_sets_top_level_remote_flag() {
        let now = Instant::now();
        let mut engine = StateEngine::new();
        engine.apply_telemetry(
            TelemetryUpdate::Patch(patch(Bucket::Mux, r#"{"remote_enabled":true}"#)),
            now,
        );
        assert!(engine.state().remote_enabled);

        engine.apply_telemetry(
            TelemetryUpdate::Patch(patch(Bucket::Mux, r#"{"nav_active":true}"#)),
            now,
        );
        assert!(!engine.state().remote_enabled);
        assert!(engine.state().mux.remote_enabled, "bucket field keeps its value");
    }

    #[test]
    fn list_topics_upsert_by_index() {
        let now = Instant::now();
        let mut engine = StateEngine::new();

        let gpus: Vec<GpuReport> = decode(
            "gpu",
            br#"[{"idx":1,"gpu_usage":5.0,"gpu_mem_used":1.0,"gpu_mem_total":8.0,"gpu_temp":40.0,"gpu_power":30.0}]"#,
        )
        .unwrap();
        engine.apply_telemetry(TelemetryUpdate::Gpu(gpus), now);

        let disk: DiskReport = decode(
            "disk",
            br#"{"partitions":[{"idx":0,"mountpoint":"/","total_bytes":100,"used_bytes":40,"percent":40.0,"accessible":true}]}"#,
        )
        .unwrap();
        engine.apply_telemetry(TelemetryUpdate::Disk(disk), now);

        let net: NetReport = decode(
            "net",
            br#"{"net_total_ifaces":2,"net_active_ifaces":1,"net_down_ifaces":1,"interfaces":[{"idx":2,"name":"eth1","is_up":false,"speed_mbps":0.0,"in_bps":0.0,"out_bps":0.0}]}"#,
        )
        .unwrap();
        engine.apply_telemetry(TelemetryUpdate::Net(net), now);

        let s = engine.state();
        assert_eq!(s.gpu_list.len(), 2);
        assert!(s.gpu_list.get(0).unwrap().is_empty());
        assert_eq!(s.disk_partitions.get(0).unwrap()["mountpoint"], "/");
        assert_eq!(s.net_interfaces.len(), 3);
        assert_eq!(s.resources.net_down_ifaces, 1);
        assert_eq!(s.last_vehicle_recv, Some(now));
    }

    #[test]
    fn snapshot_has_canonical_keys() {
        let engine = StateEngine::new();
        let json = parse(&engine.snapshot_json(Instant::now()).unwrap());
        let obj = json.as_object().unwrap();
        for key in [
            "mux", "twist", "network", "hunter", "estop", "resources", "gpu_list",
            "disk_partitions", "net_interfaces", "remote_enabled", "control",
            "station_connected", "alerts", "server_time", "vehicle_age",
        ] {
            assert!(obj.contains_key(key), "missing key {key}");
        }
        assert_eq!(obj.len(), 15);
        assert_eq!(json["vehicle_age"], -1.0);
        assert_eq!(json["mux"]["requested_mode"], -1);
        assert_eq!(json["network"]["status_code"], 2);
        assert!(json["server_time"].as_f64().unwrap() > 1.0e9);
    }

    #[test]
    fn telemetry_publishes_validated_snapshot() {
        let now = Instant::now();
        let mut engine = StateEngine::new();
        let mut sub = engine.add_subscriber(4);

        engine.apply_telemetry(
            TelemetryUpdate::Patch(patch(Bucket::Twist, r#"{"final_lx":0.2}"#)),
            now,
        );
        engine.apply_telemetry(
            TelemetryUpdate::Patch(patch(Bucket::Estop, r#"{"is_estop":true}"#)),
            now,
        );

        let _first = sub.receiver.try_recv().unwrap();
        let second = parse(&sub.receiver.try_recv().unwrap());
        assert_eq!(second["alerts"][0]["level"], "error");
        assert_eq!(second["alerts"][1]["level"], "warn");
        assert_eq!(second["twist"]["final_lx"], 0.2);
    }

    #[test]
    fn vehicle_age_alert_appears_and_clears() {
        let t0 = Instant::now();
        let mut engine = StateEngine::new();
        engine.set_station_connected(true, t0);
        engine.apply_telemetry(
            TelemetryUpdate::Patch(patch(Bucket::Hunter, r#"{"linear_vel":0.0}"#)),
            t0,
        );

        let silent = t0 + Duration::from_millis(3100);
        engine.refresh_alerts(silent);
        let json = parse(&engine.snapshot_json(silent).unwrap());
        assert!(json["vehicle_age"].as_f64().unwrap() >= 3.1);
        assert!(json["alerts"][0]["message"].as_str().unwrap().contains("No vehicle data"));

        let back = silent + Duration::from_millis(10);
        engine.apply_telemetry(
            TelemetryUpdate::Patch(patch(Bucket::Hunter, r#"{"linear_vel":0.1}"#)),
            back,
        );
        let json = parse(&engine.snapshot_json(back).unwrap());
        assert!(json["vehicle_age"].as_f64().unwrap() < 0.1);
        assert_eq!(json["alerts"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn station_and_joystick_flags_publish_only_on_change() {
        let now = Instant::now();
        let mut engine = StateEngine::new();
        let mut sub = engine.add_subscriber(8);

        assert!(engine.set_station_connected(true, now));
        assert!(!engine.set_station_connected(true, now));
        assert!(engine.set_joystick_connected(true, now));
        assert!(!engine.set_joystick_connected(true, now));

        assert!(sub.receiver.try_recv().is_ok());
        assert!(sub.receiver.try_recv().is_ok());
        assert!(sub.receiver.try_recv().is_err());
    }

    #[test]
    fn alerts_are_recomputed_not_accumulated() {
        let now = Instant::now();
        let mut engine = StateEngine::new();
        engine.refresh_alerts(now);
        engine.refresh_alerts(now);
        assert_eq!(engine.state().alerts.len(), 1);

        engine.set_station_connected(true, now);
        assert!(engine.state().alerts.is_empty());
    }

    #[test]
    fn estop_and_mode_commands_update_control() {
        let now = Instant::now();
        let mut engine = StateEngine::new();
        engine.set_estop_command(true, now);
        engine.set_mode_command(Mode::Nav, now);
        engine.set_teleop(0.25, -0.5);

        let control = &engine.state().control;
        assert!(control.estop);
        assert_eq!(control.mode, Mode::Nav);
        assert_eq!((control.linear_x, control.angular_z), (0.25, -0.5));
        assert!(engine.state().alerts.iter().any(|a| a.message.contains("confirmation")));
    }
}

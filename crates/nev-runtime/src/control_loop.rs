//! [`ControlLoop`] – the single writer.
//!
//! The loop owns the [`StateEngine`] and is the only place the aggregate is
//! mutated.  Bus callbacks never touch it directly: they submit a
//! [`ControlCommand`] which the loop applies in arrival order.  Between
//! commands the loop wakes on a fixed tick and runs one supervisor pass:
//!
//! 1. **Vehicle liveness** – log the disconnect/reconnect edge once.
//! 2. **Station liveness** – time out a silent station and publish the flag.
//! 3. **Bandwidth** – close the byte-counter window once it is 1 s old.
//! 4. **Heartbeat** – emit `nev/gcs/heartbeat` at the configured rate.
//! 5. **Push** – validate and broadcast on the configured interval, so
//!    time-based alerts surface even while telemetry is silent.
//!
//! Both [`ControlLoop::handle`] and [`ControlLoop::supervise`] take the
//! current instant explicitly; [`ControlLoop::run`] feeds them the runtime
//! clock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use nev_kernel::{StateEngine, StationLiveness, Transition, VehicleLiveness};
use nev_middleware::{BandwidthMeter, CommandReceiver, ControlCommand, VehicleLink};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;

pub struct ControlLoop {
    engine: StateEngine,
    vehicle: Arc<VehicleLink>,
    commands: CommandReceiver,
    station: StationLiveness,
    vehicle_liveness: VehicleLiveness,
    bandwidth: BandwidthMeter,
    heartbeat_period: Option<Duration>,
    push_period: Duration,
    tick_period: Duration,
    last_heartbeat: Option<Instant>,
    last_push: Instant,
}

impl ControlLoop {
    pub fn new(
        config: &BridgeConfig,
        vehicle: Arc<VehicleLink>,
        commands: CommandReceiver,
        now: Instant,
    ) -> Self {
        Self::with_engine(config, StateEngine::new(), vehicle, commands, now)
    }

    /// Build around an existing engine, e.g. one with custom alert rules.
    pub fn with_engine(
        config: &BridgeConfig,
        engine: StateEngine,
        vehicle: Arc<VehicleLink>,
        commands: CommandReceiver,
        now: Instant,
    ) -> Self {
        let bandwidth = BandwidthMeter::new(vehicle.counters(), now);
        Self {
            engine,
            vehicle,
            commands,
            station: StationLiveness::new(config.station_grace()),
            vehicle_liveness: VehicleLiveness::new(),
            bandwidth,
            heartbeat_period: config.heartbeat_period(),
            push_period: config.push_period(),
            tick_period: config.tick_period(),
            last_heartbeat: None,
            last_push: now,
        }
    }

    pub fn engine(&self) -> &StateEngine {
        &self.engine
    }

    pub fn station_connected(&self) -> bool {
        self.station.is_connected()
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    /// Apply one queued command.
    pub fn handle(&mut self, command: ControlCommand, now: Instant) {
        match command {
            ControlCommand::Telemetry(update) => self.engine.apply_telemetry(update, now),
            ControlCommand::RoundTrip { rtt_ms } => self.engine.set_round_trip(rtt_ms),
            ControlCommand::StationHeartbeat { at } => {
                if let Some(Transition::Connected) = self.station.heartbeat(at) {
                    info!("station connected");
                    self.engine.set_station_connected(true, now);
                }
            }
            ControlCommand::StationTeleop {
                linear_x,
                angular_z,
            } => {
                if self.station.is_connected() {
                    self.vehicle.send_teleop(linear_x, angular_z);
                    self.engine.set_teleop(linear_x, angular_z);
                } else {
                    debug!("station teleop ignored while station is disconnected");
                }
            }
            ControlCommand::StationEstop { active } => self.engine.set_estop_command(active, now),
            ControlCommand::StationMode { mode } => self.engine.set_mode_command(mode, now),
            ControlCommand::JoystickConnected { connected } => {
                if self.engine.set_joystick_connected(connected, now) {
                    info!(connected, "station joystick state changed");
                }
            }
            ControlCommand::OperatorEstop { active } => {
                let seq = self.vehicle.send_estop(active);
                info!(active, seq, "operator e-stop relayed");
                self.engine.set_estop_command(active, now);
            }
            ControlCommand::OperatorMode { mode } => {
                let seq = self.vehicle.send_cmd_mode(mode);
                info!(mode = ?mode, seq, "operator mode relayed");
                self.engine.set_mode_command(mode, now);
            }
            ControlCommand::Subscribe { capacity, reply } => {
                let subscription = self.engine.add_subscriber(capacity);
                let id = subscription.id;
                if reply.send(subscription).is_err() {
                    self.engine.remove_subscriber(id);
                } else {
                    debug!(subscribers = self.engine.subscriber_count(), "snapshot subscriber added");
                }
            }
            ControlCommand::Unsubscribe { id } => {
                self.engine.remove_subscriber(id);
            }
            ControlCommand::Snapshot { reply } => match self.engine.snapshot_json(now) {
                Ok(json) => {
                    let _ = reply.send(json);
                }
                Err(e) => warn!(error = %e, "snapshot request failed"),
            },
        }
    }

    // -------------------------------------------------------------------------
    // Supervisor
    // -------------------------------------------------------------------------

    /// One supervisor pass.
    pub fn supervise(&mut self, now: Instant) {
        match self
            .vehicle_liveness
            .check(self.engine.state().last_vehicle_recv, now)
        {
            Some(Transition::Disconnected) => warn!("vehicle telemetry lost"),
            Some(Transition::Connected) => info!("vehicle telemetry restored"),
            None => {}
        }

        if let Some(Transition::Disconnected) = self.station.check(now) {
            warn!("station heartbeat timed out");
            self.engine.set_station_connected(false, now);
        }

        if let Some(sample) = self.bandwidth.sample(now) {
            self.engine
                .set_bandwidth(sample.camera_mbps, sample.telemetry_mbps);
        }

        if let Some(period) = self.heartbeat_period {
            let due = self
                .last_heartbeat
                .is_none_or(|last| now.saturating_duration_since(last) >= period);
            if due {
                self.vehicle.send_heartbeat();
                self.last_heartbeat = Some(now);
            }
        }

        if now.saturating_duration_since(self.last_push) >= self.push_period {
            self.engine.publish(now);
            self.last_push = now;
        }
    }

    // -------------------------------------------------------------------------
    // Driver
    // -------------------------------------------------------------------------

    /// Drive the loop until `shutdown` flips to `true` or every command
    /// sender is gone.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.tick_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tick_ms = self.tick_period.as_millis() as u64, "control loop started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command, clock()),
                    None => {
                        info!("command queue closed");
                        break;
                    }
                },
                _ = ticker.tick() => self.supervise(clock()),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("control loop stopped");
    }
}

/// Runtime clock.  Follows Tokio's paused clock under test.
fn clock() -> Instant {
    tokio::time::Instant::now().into_std()
}

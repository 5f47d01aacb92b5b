//! Handoff from bus delivery contexts onto the control loop.
//!
//! Every inbound event becomes one [`ControlCommand`] pushed through an
//! unbounded MPSC channel.  Submission never blocks the caller, and a single
//! producer's commands arrive in the order they were submitted.

use std::time::Instant;

use nev_kernel::{SnapshotSubscription, SubscriberId};
use nev_types::{Mode, NevError, TelemetryUpdate};
use tokio::sync::{mpsc, oneshot};

/// A mutation or query to be executed on the control loop.
#[derive(Debug)]
pub enum ControlCommand {
    /// Validated vehicle telemetry.
    Telemetry(TelemetryUpdate),
    /// Round trip measured from a heartbeat acknowledgement.
    RoundTrip { rtt_ms: f64 },
    StationHeartbeat { at: Instant },
    /// Station teleop, not yet relayed.  Gated on station liveness.
    StationTeleop { linear_x: f64, angular_z: f64 },
    /// Station e-stop, already relayed to the vehicle.
    StationEstop { active: bool },
    /// Station mode change, already relayed to the vehicle.
    StationMode { mode: Mode },
    JoystickConnected { connected: bool },
    /// Operator e-stop from the presentation boundary.  Relayed by the loop.
    OperatorEstop { active: bool },
    /// Operator mode change from the presentation boundary.  Relayed by the
    /// loop.
    OperatorMode { mode: Mode },
    Subscribe {
        capacity: usize,
        reply: oneshot::Sender<SnapshotSubscription>,
    },
    Unsubscribe { id: SubscriberId },
    Snapshot { reply: oneshot::Sender<String> },
}

/// Receiving half, owned by the control loop.
pub type CommandReceiver = mpsc::UnboundedReceiver<ControlCommand>;

/// Cloneable submission handle.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<ControlCommand>,
}

/// Create a connected sender/receiver pair.
pub fn command_channel() -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CommandSender { tx }, rx)
}

impl CommandSender {
    /// Enqueue `command`.  Fails only once the control loop has stopped.
    pub fn submit(&self, command: ControlCommand) -> Result<(), NevError> {
        self.tx
            .send(command)
            .map_err(|_| NevError::Channel("control loop is not running".to_string()))
    }

    /// Register a snapshot subscriber with the engine.
    pub async fn subscribe(&self, capacity: usize) -> Result<SnapshotSubscription, NevError> {
        let (reply, rx) = oneshot::channel();
        self.submit(ControlCommand::Subscribe { capacity, reply })?;
        rx.await
            .map_err(|_| NevError::Channel("control loop dropped subscribe request".to_string()))
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> Result<(), NevError> {
        self.submit(ControlCommand::Unsubscribe { id })
    }

    /// Fetch the current snapshot JSON.
    pub async fn snapshot(&self) -> Result<String, NevError> {
        let (reply, rx) = oneshot::channel();
        self.submit(ControlCommand::Snapshot { reply })?;
        rx.await
            .map_err(|_| NevError::Channel("control loop dropped snapshot request".to_string()))
    }

    /// Operator e-stop.  Always relayed.
    pub fn set_estop(&self, active: bool) -> Result<(), NevError> {
        self.submit(ControlCommand::OperatorEstop { active })
    }

    /// Operator mode change.  Codes outside the mode set are rejected here.
    pub fn set_mode(&self, code: i64) -> Result<Mode, NevError> {
        let mode = Mode::try_from(code)?;
        self.submit(ControlCommand::OperatorMode { mode })?;
        Ok(mode)
    }
}

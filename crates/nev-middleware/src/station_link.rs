//! [`StationLink`] – the control-station side of the bridge.
//!
//! E-stop and mode changes are safety commands: they are relayed to the
//! vehicle straight from the delivery context, whatever the station's
//! liveness, and only then booked on the control loop.  Teleop is handed to
//! the loop unrelayed, because only the loop knows whether the station link
//! is currently live.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use bytes::Bytes;
use nev_types::telemetry::decode;
use nev_types::{Mode, NevError};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::bus::{Callback, MessageBus, Subscription};
use crate::handoff::{CommandSender, ControlCommand};
use crate::vehicle_link::VehicleLink;

/// Station → server topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StationTopic {
    Heartbeat,
    Teleop,
    Estop,
    CmdMode,
    JoystickConnected,
}

impl StationTopic {
    pub const ALL: [StationTopic; 5] = [
        StationTopic::Heartbeat,
        StationTopic::Teleop,
        StationTopic::Estop,
        StationTopic::CmdMode,
        StationTopic::JoystickConnected,
    ];

    pub fn key(self) -> &'static str {
        match self {
            StationTopic::Heartbeat => "nev/station/heartbeat",
            StationTopic::Teleop => "nev/station/teleop",
            StationTopic::Estop => "nev/station/estop",
            StationTopic::CmdMode => "nev/station/cmd_mode",
            StationTopic::JoystickConnected => "nev/station/joystick_connected",
        }
    }
}

#[derive(Deserialize)]
struct TeleopMsg {
    #[serde(default)]
    linear_x: f64,
    #[serde(default)]
    angular_z: f64,
}

#[derive(Deserialize)]
struct EstopMsg {
    #[serde(default)]
    active: bool,
}

#[derive(Deserialize)]
struct ModeMsg {
    #[serde(default = "idle_code")]
    mode: i64,
}

fn idle_code() -> i64 {
    Mode::Idle.code()
}

#[derive(Deserialize)]
struct JoystickMsg {
    #[serde(default)]
    connected: bool,
}

pub struct StationLink {
    bus: Arc<dyn MessageBus>,
    vehicle: Arc<VehicleLink>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl StationLink {
    pub fn new(bus: Arc<dyn MessageBus>, vehicle: Arc<VehicleLink>) -> Self {
        Self {
            bus,
            vehicle,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn start(&self, handoff: CommandSender) -> Result<(), NevError> {
        let mut subs = Vec::with_capacity(StationTopic::ALL.len());
        for topic in StationTopic::ALL {
            let callback = self.callback(topic, handoff.clone());
            subs.push(self.bus.subscribe(topic.key(), callback)?);
        }
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(subs);
        info!("station link started");
        Ok(())
    }

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
        info!("station link stopped");
    }

    fn callback(&self, topic: StationTopic, handoff: CommandSender) -> Callback {
        let vehicle = Arc::clone(&self.vehicle);
        Arc::new(move |payload: Bytes| {
            match translate(topic, &payload, &vehicle) {
                Ok(command) => {
                    if let Err(e) = handoff.submit(command) {
                        debug!(error = %e, "control loop gone; dropping station update");
                    }
                }
                Err(e) => warn!(topic = topic.key(), error = %e, "dropping station message"),
            }
        })
    }
}

/// Turn one station payload into a loop command, relaying safety commands
/// on the way.
fn translate(
    topic: StationTopic,
    raw: &[u8],
    vehicle: &VehicleLink,
) -> Result<ControlCommand, NevError> {
    let key = topic.key();
    Ok(match topic {
        StationTopic::Heartbeat => ControlCommand::StationHeartbeat { at: Instant::now() },
        StationTopic::Teleop => {
            let msg: TeleopMsg = decode(key, raw)?;
            ControlCommand::StationTeleop {
                linear_x: msg.linear_x,
                angular_z: msg.angular_z,
            }
        }
        StationTopic::Estop => {
            let msg: EstopMsg = decode(key, raw)?;
            vehicle.send_estop(msg.active);
            info!(active = msg.active, "station e-stop relayed");
            ControlCommand::StationEstop { active: msg.active }
        }
        StationTopic::CmdMode => {
            let msg: ModeMsg = decode(key, raw)?;
            let mode = Mode::try_from(msg.mode)?;
            vehicle.send_cmd_mode(mode);
            info!(mode = mode.code(), "station mode change relayed");
            ControlCommand::StationMode { mode }
        }
        StationTopic::JoystickConnected => {
            let msg: JoystickMsg = decode(key, raw)?;
            ControlCommand::JoystickConnected {
                connected: msg.connected,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::testing::RecordingBus;
    use crate::handoff::{CommandReceiver, command_channel};

    fn started() -> (Arc<RecordingBus>, StationLink, CommandReceiver) {
        let bus = Arc::new(RecordingBus::default());
        let vehicle = Arc::new(VehicleLink::new(bus.clone()));
        let link = StationLink::new(bus.clone(), vehicle);
        let (tx, rx) = command_channel();
        link.start(tx).unwrap();
        (bus, link, rx)
    }

    #[test]
    fn heartbeat_is_stamped() {
        let (bus, _link, mut rx) = started();
        let before = Instant::now();
        bus.deliver("nev/station/heartbeat", &b""[..]);
        match rx.try_recv() {
            Ok(ControlCommand::StationHeartbeat { at }) => assert!(at >= before),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn teleop_is_not_relayed_by_the_link() {
        let (bus, _link, mut rx) = started();
        bus.deliver("nev/station/teleop", &br#"{"linear_x":0.5,"angular_z":-0.25}"#[..]);

        assert!(matches!(
            rx.try_recv(),
            Ok(ControlCommand::StationTeleop { linear_x, angular_z })
                if linear_x == 0.5 && angular_z == -0.25
        ));
        assert!(bus.published().is_empty());
    }

    #[test]
    fn estop_is_relayed_immediately() {
        let (bus, _link, mut rx) = started();
        bus.deliver("nev/station/estop", &br#"{"active":true}"#[..]);

        let published = bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "nev/gcs/estop");
        assert_eq!(published[0].1["active"], true);
        assert!(matches!(
            rx.try_recv(),
            Ok(ControlCommand::StationEstop { active: true })
        ));
    }

    #[test]
    fn mode_is_relayed_and_validated() {
        let (bus, _link, mut rx) = started();
        bus.deliver("nev/station/cmd_mode", &br#"{"mode":1}"#[..]);
        bus.deliver("nev/station/cmd_mode", &br#"{"mode":42}"#[..]);

        let published = bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].1["mode"], 1);
        assert!(matches!(
            rx.try_recv(),
            Ok(ControlCommand::StationMode { mode: Mode::Nav })
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let (bus, _link, mut rx) = started();
        bus.deliver("nev/station/cmd_mode", &b"{}"[..]);
        bus.deliver("nev/station/joystick_connected", &b"{}"[..]);

        assert!(matches!(
            rx.try_recv(),
            Ok(ControlCommand::StationMode { mode: Mode::Idle })
        ));
        assert!(matches!(
            rx.try_recv(),
            Ok(ControlCommand::JoystickConnected { connected: false })
        ));
    }

    #[test]
    fn malformed_station_payload_is_dropped() {
        let (bus, _link, mut rx) = started();
        bus.deliver("nev/station/estop", &b"{oops"[..]);
        bus.deliver("nev/station/teleop", &br#"{"linear_x":"fast"}"#[..]);
        assert!(rx.try_recv().is_err());
        assert!(bus.published().is_empty());
    }

    #[test]
    fn stop_undeclares_station_topics() {
        let (bus, link, _rx) = started();
        assert_eq!(bus.subscribed_keys().len(), 5);
        link.stop();
        assert_eq!(bus.undeclared().len(), 5);
    }
}

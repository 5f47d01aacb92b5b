//! `nev-middleware` – The bridge's nervous system.
//!
//! Routes bytes between the message bus and the control loop without owning
//! any state of its own.
//!
//! # Modules
//!
//! - [`bus`] – the [`MessageBus`] seam plus [`LocalBus`], an in-process
//!   implementation built on Tokio broadcast channels.
//! - [`handoff`] – [`ControlCommand`] and the FIFO channel that marshals bus
//!   deliveries onto the control loop.
//! - [`bandwidth`] – per-channel byte counters and the Mbps window.
//! - [`vehicle_link`] – [`VehicleLink`]: vehicle telemetry ingest and
//!   sequenced outbound commands.
//! - [`station_link`] – [`StationLink`]: station heartbeat, teleop, e-stop,
//!   mode and joystick topics.
//! - [`zenoh_bus`] – [`ZenohBus`], the [`MessageBus`] backed by a Zenoh
//!   session.

pub mod bandwidth;
pub mod bus;
pub mod handoff;
pub mod station_link;
pub mod vehicle_link;
pub mod zenoh_bus;

pub use bandwidth::{BandwidthMeter, BandwidthSample, ChannelCounters};
pub use bus::{Callback, LocalBus, MessageBus, Subscription};
pub use handoff::{CommandReceiver, CommandSender, ControlCommand, command_channel};
pub use station_link::{StationLink, StationTopic};
pub use vehicle_link::{GcsTopic, SequenceCounter, VehicleLink, VehicleTopic};
pub use zenoh_bus::ZenohBus;

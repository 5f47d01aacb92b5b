//! `nev-kernel` – State Engine & Supervision Primitives
//!
//! Owns the canonical [`SharedState`][nev_types::SharedState] on behalf of
//! the control loop.  Nothing in here is thread-aware: every type assumes a
//! single writer and is driven with explicit `Instant`s so behaviour is fully
//! deterministic under test.
//!
//! # Modules
//!
//! - [`state_engine`] – [`StateEngine`][state_engine::StateEngine]: merge
//!   updates, indexed upserts, validation, snapshot serialisation and fanout.
//! - [`alerts`] – [`AlertEvaluator`][alerts::AlertEvaluator]: the ordered
//!   advisory rules recomputed on every validation pass.
//! - [`fanout`] – [`Fanout`][fanout::Fanout]: explicit registry of bounded
//!   per-subscriber snapshot channels.
//! - [`liveness`] – station and vehicle link liveness state machines that
//!   fire exactly one [`Transition`][liveness::Transition] per edge.

pub mod alerts;
pub mod fanout;
pub mod liveness;
pub mod state_engine;

pub use alerts::{AlertEvaluator, AlertRule};
pub use fanout::{Fanout, SnapshotSubscription, SubscriberId};
pub use liveness::{LinkState, StationLiveness, Transition, VehicleLiveness, VEHICLE_TIMEOUT};
pub use state_engine::{IndexedListKind, StateEngine};

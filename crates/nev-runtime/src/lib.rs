//! `nev-runtime` – The bridge's heartbeat.
//!
//! Hosts the one task that is allowed to touch the aggregate state.
//!
//! # Modules
//!
//! - [`control_loop`] – [`ControlLoop`][control_loop::ControlLoop]: drains
//!   the [`ControlCommand`][nev_middleware::ControlCommand] queue in FIFO
//!   order and runs the supervisor on a fixed tick (vehicle and station
//!   liveness, bandwidth windows, outbound heartbeats and the periodic
//!   snapshot push).
//! - [`config`] – [`BridgeConfig`][config::BridgeConfig]: cadences and
//!   timeouts, deserialisable from the `[bridge]` table of the server's TOML
//!   file.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: initialises
//!   the global `tracing` subscriber with an optional OTLP span exporter.
//!   Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export.

pub mod config;
pub mod control_loop;
pub mod telemetry;

pub use config::BridgeConfig;
pub use control_loop::ControlLoop;
pub use telemetry::{TracerProviderGuard, init_tracing};

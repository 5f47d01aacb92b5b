//! `nev-cockpit` – The operator-facing web boundary.
//!
//! Boots an axum HTTP + WebSocket server (default port `8080`) that:
//!
//! 1. **Streams** state snapshots to every connected browser over `/ws`: one
//!    immediately on connect, then every snapshot the control loop fans out,
//!    and the current one again after 5 s of silence.
//!
//! 2. **Serves** the embedded cockpit page and a small REST surface
//!    (`/api/state`, `/api/estop`, `/api/cmd_mode`).
//!
//! 3. **Relays** viewer media negotiation (`/api/webrtc/offer`) to a
//!    [`SessionManager`][nev_video::SessionManager] when video is enabled.
//!
//! # Usage
//!
//! ```rust,no_run
//! use nev_cockpit::CockpitServer;
//! use nev_middleware::command_channel;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (handoff, _commands) = command_channel();
//!     CockpitServer::new(handoff).run().await.expect("cockpit server failed");
//! }
//! ```

pub mod api;
pub mod server;

pub use api::Cockpit;
pub use server::{CockpitServer, DEFAULT_PORT, DEFAULT_SUBSCRIBER_CAPACITY, RESEND_AFTER};

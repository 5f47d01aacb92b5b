//! REST routes and operator commands.
//!
//! | Route | Effect |
//! |---|---|
//! | `GET /` | Embedded cockpit page |
//! | `GET /api/state` | Current snapshot |
//! | `POST /api/estop` `{active}` | Operator e-stop, always relayed |
//! | `POST /api/cmd_mode` `{mode}` | Operator mode change, codes `-1..=2` only |
//! | `POST /api/webrtc/offer` `{sdp, type}` | Viewer negotiation, when video is enabled |
//!
//! The same e-stop and mode commands are accepted as WebSocket text frames
//! (`{"type":"estop","active":true}`, `{"type":"cmd_mode","mode":2}`).

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::State;
use axum::{Json, Router};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use nev_middleware::CommandSender;
use nev_types::NevError;
use nev_video::{SessionDescription, SessionManager};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

const COCKPIT_HTML: &str = include_str!("cockpit.html");

/// Shared state of every route.
pub struct Cockpit {
    pub handoff: CommandSender,
    pub sessions: Option<Arc<SessionManager>>,
    pub subscriber_capacity: usize,
}

#[derive(Deserialize)]
struct EstopRequest {
    active: bool,
}

#[derive(Deserialize)]
struct ModeRequest {
    mode: i64,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum UpstreamMessage {
    Estop { active: bool },
    CmdMode { mode: i64 },
}

/// The page and REST surface.  The WebSocket route is added by the server.
pub fn routes() -> Router<Arc<Cockpit>> {
    Router::new()
        .route("/", get(index))
        .route("/index.html", get(index))
        .route("/api/state", get(state))
        .route("/api/estop", post(estop))
        .route("/api/cmd_mode", post(cmd_mode))
        .route("/api/webrtc/offer", post(webrtc_offer))
}

fn error(status: StatusCode, e: impl Display) -> Response {
    (status, Json(json!({ "error": e.to_string() }))).into_response()
}

async fn index() -> Html<&'static str> {
    Html(COCKPIT_HTML)
}

async fn state(State(cockpit): State<Arc<Cockpit>>) -> Response {
    match cockpit.handoff.snapshot().await {
        Ok(snapshot) => ([(header::CONTENT_TYPE, "application/json")], snapshot).into_response(),
        Err(e) => error(StatusCode::SERVICE_UNAVAILABLE, e),
    }
}

async fn estop(State(cockpit): State<Arc<Cockpit>>, Json(req): Json<EstopRequest>) -> Response {
    match cockpit.handoff.set_estop(req.active) {
        Ok(()) => {
            info!(active = req.active, "operator e-stop");
            Json(json!({ "ok": true, "active": req.active })).into_response()
        }
        Err(e) => error(StatusCode::SERVICE_UNAVAILABLE, e),
    }
}

async fn cmd_mode(State(cockpit): State<Arc<Cockpit>>, Json(req): Json<ModeRequest>) -> Response {
    match cockpit.handoff.set_mode(req.mode) {
        Ok(mode) => {
            info!(mode = ?mode, "operator mode change");
            let station_connected = cockpit.station_connected().await;
            Json(json!({
                "ok": true,
                "mode": req.mode,
                "station_connected": station_connected,
            }))
            .into_response()
        }
        Err(NevError::InvalidCode { code, .. }) => {
            Json(json!({ "ok": false, "error": format!("invalid mode: {code}") })).into_response()
        }
        Err(e) => error(StatusCode::SERVICE_UNAVAILABLE, e),
    }
}

async fn webrtc_offer(
    State(cockpit): State<Arc<Cockpit>>,
    Json(offer): Json<SessionDescription>,
) -> Response {
    let Some(sessions) = &cockpit.sessions else {
        return error(StatusCode::NOT_FOUND, "video relay is not enabled");
    };
    match sessions.negotiate(offer).await {
        Ok(answer) => Json(answer).into_response(),
        Err(e) => {
            warn!(error = %e, "viewer negotiation failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

impl Cockpit {
    async fn station_connected(&self) -> bool {
        self.handoff
            .snapshot()
            .await
            .ok()
            .and_then(|snapshot| serde_json::from_str::<Value>(&snapshot).ok())
            .and_then(|v| v.get("station_connected").and_then(Value::as_bool))
            .unwrap_or(false)
    }

    /// Apply an operator command sent over the snapshot WebSocket.  Anything
    /// unrecognised is ignored.
    pub fn handle_upstream_message(&self, text: &str) {
        let Ok(msg) = serde_json::from_str::<UpstreamMessage>(text) else {
            return;
        };
        let result = match msg {
            UpstreamMessage::Estop { active } => self.handoff.set_estop(active),
            UpstreamMessage::CmdMode { mode } => self.handoff.set_mode(mode).map(|_| ()),
        };
        if let Err(e) = result {
            warn!(error = %e, "operator command rejected");
        }
    }
}

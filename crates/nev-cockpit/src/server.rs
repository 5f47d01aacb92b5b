//! [`CockpitServer`] – HTTP + WebSocket front door of the bridge.
//!
//! Listens on `0.0.0.0:8080` (configurable via [`CockpitServer::with_port`]).
//!
//! * `GET /ws` → snapshot stream plus operator commands.
//! * Everything else → the REST surface in [`crate::api`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use nev_middleware::CommandSender;
use nev_types::NevError;
use nev_video::SessionManager;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::api::{self, Cockpit};

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 8080;

/// Snapshots buffered per viewer before that viewer starts missing some.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 20;

/// A viewer that has seen no snapshot for this long gets the current one.
pub const RESEND_AFTER: Duration = Duration::from_secs(5);

/// # Example
///
/// ```rust,no_run
/// use nev_cockpit::CockpitServer;
/// use nev_middleware::command_channel;
///
/// #[tokio::main]
/// async fn main() {
///     let (handoff, _commands) = command_channel();
///     CockpitServer::new(handoff)
///         .with_port(8080)
///         .run()
///         .await
///         .expect("cockpit server failed");
/// }
/// ```
pub struct CockpitServer {
    cockpit: Cockpit,
    port: u16,
}

impl CockpitServer {
    pub fn new(handoff: CommandSender) -> Self {
        Self {
            cockpit: Cockpit {
                handoff,
                sessions: None,
                subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
            },
            port: DEFAULT_PORT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enable `POST /api/webrtc/offer`.
    pub fn with_sessions(mut self, sessions: Arc<SessionManager>) -> Self {
        self.cockpit.sessions = Some(sessions);
        self
    }

    pub fn with_subscriber_capacity(mut self, capacity: usize) -> Self {
        self.cockpit.subscriber_capacity = capacity.max(1);
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Full router: page, REST and `/ws`.
    pub fn router(self) -> Router {
        api::routes()
            .route("/ws", get(ws_upgrade))
            .with_state(Arc::new(self.cockpit))
    }

    /// Bind the configured port and serve forever.
    ///
    /// # Errors
    ///
    /// Returns [`NevError::Transport`] if the listener cannot bind.
    pub async fn run(self) -> Result<(), NevError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| NevError::Transport(format!("cockpit bind error on {addr}: {e}")))?;
        info!(port = self.port, "cockpit listening on http://localhost:{}", self.port);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), NevError> {
        axum::serve(listener, self.router())
            .await
            .map_err(|e| NevError::Transport(format!("cockpit server error: {e}")))
    }
}

// ---------------------------------------------------------------------------
// WebSocket: snapshot stream
// ---------------------------------------------------------------------------

async fn ws_upgrade(ws: WebSocketUpgrade, State(cockpit): State<Arc<Cockpit>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_snapshots(socket, cockpit))
}

async fn stream_snapshots(socket: WebSocket, cockpit: Arc<Cockpit>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut subscription = match cockpit.handoff.subscribe(cockpit.subscriber_capacity).await {
        Ok(subscription) => subscription,
        Err(e) => {
            debug!(error = %e, "viewer refused; control loop unavailable");
            return;
        }
    };
    info!("viewer connected");

    let mut open = match cockpit.handoff.snapshot().await {
        Ok(initial) => ws_tx.send(Message::Text(initial.into())).await.is_ok(),
        Err(_) => false,
    };

    while open {
        tokio::select! {
            pushed = tokio::time::timeout(RESEND_AFTER, subscription.receiver.recv()) => {
                let snapshot = match pushed {
                    Ok(Some(snapshot)) => snapshot.to_string(),
                    Ok(None) => break,
                    Err(_) => match cockpit.handoff.snapshot().await {
                        Ok(snapshot) => snapshot,
                        Err(_) => break,
                    },
                };
                open = ws_tx.send(Message::Text(snapshot.into())).await.is_ok();
            }
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => cockpit.handle_upstream_message(text.as_str()),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            }
        }
    }

    let _ = cockpit.handoff.unsubscribe(subscription.id);
    info!("viewer disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use nev_kernel::Fanout;
    use nev_middleware::{ControlCommand, command_channel};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    #[test]
    fn defaults() {
        let (handoff, _rx) = command_channel();
        let server = CockpitServer::new(handoff);
        assert_eq!(server.port(), DEFAULT_PORT);
        assert_eq!(server.cockpit.subscriber_capacity, 20);
        let server = server.with_port(9999).with_subscriber_capacity(0);
        assert_eq!(server.port(), 9999);
        assert_eq!(server.cockpit.subscriber_capacity, 1);
    }

    /// Serves a numbered snapshot per request and pushes one on subscribe.
    async fn start() -> (SocketAddr, tokio::sync::mpsc::UnboundedReceiver<ControlCommand>) {
        let (handoff, mut rx) = command_channel();
        let (seen_tx, seen_rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut fanout = Fanout::new();
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    ControlCommand::Snapshot { reply } => {
                        let _ = reply.send(r#"{"n":0}"#.to_string());
                    }
                    ControlCommand::Subscribe { capacity, reply } => {
                        let _ = reply.send(fanout.add(capacity));
                        fanout.push(Arc::from(r#"{"n":1}"#));
                    }
                    other => {
                        let _ = seen_tx.send(other);
                    }
                }
            }
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(CockpitServer::new(handoff).serve(listener));
        (addr, seen_rx)
    }

    #[tokio::test]
    async fn websocket_gets_initial_then_pushed_snapshots() {
        let (addr, mut seen) = start().await;
        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();

        let first = ws.next().await.unwrap().unwrap();
        assert_eq!(first.into_text().unwrap().as_str(), r#"{"n":0}"#);
        let second = ws.next().await.unwrap().unwrap();
        assert_eq!(second.into_text().unwrap().as_str(), r#"{"n":1}"#);

        ws.send(WsMessage::Text(
            r#"{"type":"estop","active":true}"#.to_string().into(),
        ))
        .await
        .unwrap();
        assert!(matches!(
            seen.recv().await,
            Some(ControlCommand::OperatorEstop { active: true })
        ));

        ws.close(None).await.unwrap();
        assert!(matches!(
            seen.recv().await,
            Some(ControlCommand::Unsubscribe { .. })
        ));
    }

    #[tokio::test]
    async fn plain_http_is_routed() {
        let (addr, _seen) = start().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /api/state HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with(r#"{"n":0}"#));
    }

    #[tokio::test]
    async fn large_request_head_still_upgrades() {
        let (addr, _seen) = start().await;
        let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
        let padding = "x".repeat(4096);
        request
            .headers_mut()
            .insert("x-padding", padding.parse().unwrap());

        let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();
        let first = ws.next().await.unwrap().unwrap();
        assert_eq!(first.into_text().unwrap().as_str(), r#"{"n":0}"#);
    }
}

//! Viewer session negotiation.
//!
//! The real-time transport itself (ICE, DTLS, RTP, encoding) lives behind
//! [`MediaTransport`] and [`PeerConnection`].  [`SessionManager`] ties each
//! peer's lifecycle to one relay track: the track is created when the offer
//! is accepted and removed when the peer fails, disconnects or closes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::VideoError;
use crate::relay::{TrackId, VideoRelay};
use crate::track::VideoTrack;

/// How long candidate gathering may take before a partial answer is sent.
pub const GATHER_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatheringState {
    New,
    Gathering,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// States after which the viewer's track is released.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Closed
        )
    }
}

/// One viewer connection owned by the media transport.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Hand over the track the transport's encoder will drain.
    async fn add_track(&self, track: VideoTrack) -> Result<(), VideoError>;
    async fn set_remote_description(&self, offer: SessionDescription) -> Result<(), VideoError>;
    /// Create the answer and install it as the local description.
    async fn create_answer(&self) -> Result<SessionDescription, VideoError>;
    /// Local description including whatever candidates are gathered so far.
    async fn local_description(&self) -> Option<SessionDescription>;
    fn gathering_state(&self) -> watch::Receiver<GatheringState>;
    fn connection_state(&self) -> watch::Receiver<ConnectionState>;
    async fn close(&self);
}

#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn new_peer(&self) -> Result<Arc<dyn PeerConnection>, VideoError>;
}

type Sessions = Arc<Mutex<HashMap<TrackId, Arc<dyn PeerConnection>>>>;

pub struct SessionManager {
    transport: Arc<dyn MediaTransport>,
    relay: Arc<VideoRelay>,
    sessions: Sessions,
    gather_timeout: Duration,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn MediaTransport>, relay: Arc<VideoRelay>) -> Self {
        Self {
            transport,
            relay,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            gather_timeout: GATHER_TIMEOUT,
        }
    }

    pub fn relay(&self) -> &Arc<VideoRelay> {
        &self.relay
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Accept a viewer's offer and return the answer.
    ///
    /// Gathering that has not completed within the timeout is not an error:
    /// the answer carries whatever candidates were found.
    pub async fn negotiate(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, VideoError> {
        let peer = self.transport.new_peer().await?;
        let track = self.relay.create_track();
        let id = track.id();

        let exchanged = match peer.add_track(track).await {
            Ok(()) => self.exchange(peer.as_ref(), offer).await,
            Err(e) => Err(e),
        };
        let answer = match exchanged {
            Ok(answer) => answer,
            Err(e) => {
                self.relay.remove_track(id);
                peer.close().await;
                return Err(e);
            }
        };

        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&peer));
        self.monitor(id, Arc::clone(&peer));

        let mut gathering = peer.gathering_state();
        let gathered = tokio::time::timeout(
            self.gather_timeout,
            gathering.wait_for(|s| *s == GatheringState::Complete),
        )
        .await
        .is_ok();
        if !gathered {
            warn!(track = %id, "candidate gathering timed out; sending partial answer");
        }

        info!(track = %id, peers = self.session_count(), "viewer session negotiated");
        Ok(peer.local_description().await.unwrap_or(answer))
    }

    async fn exchange(
        &self,
        peer: &dyn PeerConnection,
        offer: SessionDescription,
    ) -> Result<SessionDescription, VideoError> {
        peer.set_remote_description(offer).await?;
        peer.create_answer().await
    }

    /// Release the track once the peer reaches a terminal state.
    fn monitor(&self, id: TrackId, peer: Arc<dyn PeerConnection>) {
        let relay = Arc::clone(&self.relay);
        let sessions = Arc::clone(&self.sessions);
        let mut state = peer.connection_state();
        tokio::spawn(async move {
            let ended = state.wait_for(|s| s.is_terminal()).await.map(|s| *s);
            match ended {
                Ok(s) => info!(track = %id, state = ?s, "viewer session ended"),
                Err(_) => info!(track = %id, "viewer session dropped"),
            }
            if release(&relay, &sessions, id) {
                peer.close().await;
            }
        });
    }

    /// Close every session and clear the track registry.
    pub async fn close_all(&self) {
        let peers: Vec<_> = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, peer)| peer)
            .collect();
        for peer in &peers {
            peer.close().await;
        }
        self.relay.close_all();
        info!(closed = peers.len(), "viewer sessions closed");
    }
}

/// Drop the session entry and its track.  `true` if it was still registered.
fn release(relay: &VideoRelay, sessions: &Sessions, id: TrackId) -> bool {
    let removed = sessions
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&id)
        .is_some();
    relay.remove_track(id);
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakePeer {
        gathering: watch::Sender<GatheringState>,
        connection: watch::Sender<ConnectionState>,
        track: Mutex<Option<VideoTrack>>,
        local: Mutex<Option<SessionDescription>>,
        complete_gathering: bool,
        closed: AtomicBool,
    }

    impl FakePeer {
        fn new(complete_gathering: bool) -> Arc<Self> {
            Arc::new(Self {
                gathering: watch::channel(GatheringState::New).0,
                connection: watch::channel(ConnectionState::New).0,
                track: Mutex::new(None),
                local: Mutex::new(None),
                complete_gathering,
                closed: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl PeerConnection for FakePeer {
        async fn add_track(&self, track: VideoTrack) -> Result<(), VideoError> {
            *self.track.lock().unwrap() = Some(track);
            Ok(())
        }

        async fn set_remote_description(
            &self,
            offer: SessionDescription,
        ) -> Result<(), VideoError> {
            if offer.kind != "offer" {
                return Err(VideoError::Negotiation("expected an offer".into()));
            }
            Ok(())
        }

        async fn create_answer(&self) -> Result<SessionDescription, VideoError> {
            let answer = SessionDescription {
                sdp: "v=0 answer".into(),
                kind: "answer".into(),
            };
            *self.local.lock().unwrap() = Some(answer.clone());
            self.gathering.send_replace(GatheringState::Gathering);
            if self.complete_gathering {
                *self.local.lock().unwrap() = Some(SessionDescription {
                    sdp: "v=0 answer a=candidate".into(),
                    kind: "answer".into(),
                });
                self.gathering.send_replace(GatheringState::Complete);
            }
            Ok(answer)
        }

        async fn local_description(&self) -> Option<SessionDescription> {
            self.local.lock().unwrap().clone()
        }

        fn gathering_state(&self) -> watch::Receiver<GatheringState> {
            self.gathering.subscribe()
        }

        fn connection_state(&self) -> watch::Receiver<ConnectionState> {
            self.connection.subscribe()
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct FakeTransport {
        peer: Arc<FakePeer>,
    }

    #[async_trait]
    impl MediaTransport for FakeTransport {
        async fn new_peer(&self) -> Result<Arc<dyn PeerConnection>, VideoError> {
            Ok(self.peer.clone())
        }
    }

    fn manager(peer: &Arc<FakePeer>) -> SessionManager {
        SessionManager::new(
            Arc::new(FakeTransport { peer: peer.clone() }),
            Arc::new(VideoRelay::default()),
        )
    }

    fn offer() -> SessionDescription {
        SessionDescription {
            sdp: "v=0 offer".into(),
            kind: "offer".into(),
        }
    }

    #[tokio::test]
    async fn negotiation_registers_a_track_and_returns_gathered_answer() {
        let peer = FakePeer::new(true);
        let sessions = manager(&peer);

        let answer = sessions.negotiate(offer()).await.unwrap();
        assert_eq!(answer.kind, "answer");
        assert!(answer.sdp.contains("candidate"));
        assert_eq!(sessions.relay().track_count(), 1);
        assert_eq!(sessions.session_count(), 1);
        assert!(peer.track.lock().unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn gathering_timeout_returns_partial_answer() {
        let peer = FakePeer::new(false);
        let sessions = manager(&peer);

        let started = tokio::time::Instant::now();
        let answer = sessions.negotiate(offer()).await.unwrap();
        assert!(started.elapsed() >= GATHER_TIMEOUT);
        assert_eq!(answer.sdp, "v=0 answer");
        assert_eq!(sessions.relay().track_count(), 1);
    }

    #[tokio::test]
    async fn failed_exchange_releases_the_track() {
        let peer = FakePeer::new(true);
        let sessions = manager(&peer);
        let bad = SessionDescription {
            sdp: String::new(),
            kind: "answer".into(),
        };

        assert!(matches!(
            sessions.negotiate(bad).await,
            Err(VideoError::Negotiation(_))
        ));
        assert_eq!(sessions.relay().track_count(), 0);
        assert_eq!(sessions.session_count(), 0);
        assert!(peer.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failed_exchange_leaves_no_task_holding_the_peer() {
        let peer = FakePeer::new(true);
        let sessions = manager(&peer);
        let held = Arc::strong_count(&peer);
        let bad = SessionDescription {
            sdp: String::new(),
            kind: "pranswer".into(),
        };

        assert!(sessions.negotiate(bad).await.is_err());
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(Arc::strong_count(&peer), held);
        assert_eq!(peer.connection.receiver_count(), 0);
    }

    #[tokio::test]
    async fn terminal_connection_state_releases_the_track() {
        for terminal in [
            ConnectionState::Failed,
            ConnectionState::Disconnected,
            ConnectionState::Closed,
        ] {
            let peer = FakePeer::new(true);
            let sessions = manager(&peer);
            sessions.negotiate(offer()).await.unwrap();

            peer.connection.send_replace(ConnectionState::Connected);
            tokio::task::yield_now().await;
            assert_eq!(sessions.relay().track_count(), 1);

            peer.connection.send_replace(terminal);
            for _ in 0..100 {
                if sessions.relay().track_count() == 0 {
                    break;
                }
                tokio::task::yield_now().await;
            }
            assert_eq!(sessions.relay().track_count(), 0, "{terminal:?}");
            assert_eq!(sessions.session_count(), 0);
        }
    }

    #[tokio::test]
    async fn close_all_closes_peers_and_clears_tracks() {
        let peer = FakePeer::new(true);
        let sessions = manager(&peer);
        sessions.negotiate(offer()).await.unwrap();

        sessions.close_all().await;
        assert!(peer.closed.load(Ordering::SeqCst));
        assert_eq!(sessions.relay().track_count(), 0);
        assert_eq!(sessions.session_count(), 0);
    }
}

//! WebRTC [`MediaTransport`] built on the `webrtc` crate.
//!
//! Each viewer owns an H.264 [`Encoder`] and a static sample track.  A pump
//! task drains the viewer's [`VideoTrack`], encodes every frame on the
//! blocking pool and writes the access unit as one sample.  A fresh encoder
//! per viewer means every viewer starts on its own key frame.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_H264, MediaEngine};
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::VideoError;
use crate::frame::I420Frame;
use crate::session::{
    ConnectionState, GatheringState, MediaTransport, PeerConnection, SessionDescription,
};
use crate::track::{CLOCK_RATE, VideoTrack};

/// Sample duration used until two timestamps are known.
pub const DEFAULT_FRAME_DURATION: Duration = Duration::from_micros(33_333);

/// I420 to H.264 encoder owned by one viewer.
pub trait Encoder: Send {
    /// Encode one frame into an Annex-B access unit.  Empty while the
    /// encoder is still buffering.
    fn encode(&mut self, frame: &I420Frame) -> Result<Bytes, VideoError>;
}

/// Builds one [`Encoder`] per viewer.
pub type EncoderFactory = Arc<dyn Fn() -> Result<Box<dyn Encoder>, VideoError> + Send + Sync>;

pub struct WebRtcTransport {
    api: API,
    ice_servers: Vec<String>,
    encoders: EncoderFactory,
}

impl WebRtcTransport {
    /// Transport offering H.264 with the default interceptors.  No ICE
    /// servers: host candidates only.
    pub fn new(encoders: EncoderFactory) -> Result<Self, VideoError> {
        Ok(Self {
            api: build_api()?,
            ice_servers: Vec::new(),
            encoders,
        })
    }

    /// STUN/TURN URLs handed to every peer.
    pub fn with_ice_servers(mut self, urls: Vec<String>) -> Self {
        self.ice_servers = urls;
        self
    }
}

fn build_api() -> Result<API, VideoError> {
    let mut media = MediaEngine::default();
    media.register_default_codecs().map_err(negotiation)?;
    let registry = register_default_interceptors(Registry::new(), &mut media).map_err(negotiation)?;
    Ok(APIBuilder::new()
        .with_media_engine(media)
        .with_interceptor_registry(registry)
        .build())
}

fn negotiation(e: impl std::fmt::Display) -> VideoError {
    VideoError::Negotiation(e.to_string())
}

#[async_trait]
impl MediaTransport for WebRtcTransport {
    async fn new_peer(&self) -> Result<Arc<dyn PeerConnection>, VideoError> {
        let config = RTCConfiguration {
            ice_servers: if self.ice_servers.is_empty() {
                Vec::new()
            } else {
                vec![RTCIceServer {
                    urls: self.ice_servers.clone(),
                    ..Default::default()
                }]
            },
            ..Default::default()
        };
        let pc = Arc::new(self.api.new_peer_connection(config).await.map_err(negotiation)?);

        let (gathering_tx, gathering) = watch::channel(GatheringState::New);
        pc.on_ice_gathering_state_change(Box::new(move |s: RTCIceGathererState| {
            gathering_tx.send_replace(gathering_state(s));
            Box::pin(async {})
        }));
        let (connection_tx, connection) = watch::channel(ConnectionState::New);
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            debug!(state = %s, "peer connection state changed");
            connection_tx.send_replace(connection_state(s));
            Box::pin(async {})
        }));

        Ok(Arc::new(WebRtcPeer {
            pc,
            encoders: Arc::clone(&self.encoders),
            gathering,
            connection,
            pump: Mutex::new(None),
        }))
    }
}

fn gathering_state(state: RTCIceGathererState) -> GatheringState {
    match state {
        RTCIceGathererState::Gathering => GatheringState::Gathering,
        RTCIceGathererState::Complete | RTCIceGathererState::Closed => GatheringState::Complete,
        _ => GatheringState::New,
    }
}

fn connection_state(state: RTCPeerConnectionState) -> ConnectionState {
    match state {
        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
        RTCPeerConnectionState::Connected => ConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => ConnectionState::Failed,
        RTCPeerConnectionState::Closed => ConnectionState::Closed,
        _ => ConnectionState::New,
    }
}

struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    encoders: EncoderFactory,
    gathering: watch::Receiver<GatheringState>,
    connection: watch::Receiver<ConnectionState>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

fn session_description(desc: &RTCSessionDescription) -> SessionDescription {
    SessionDescription {
        sdp: desc.sdp.clone(),
        kind: desc.sdp_type.to_string(),
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn add_track(&self, track: VideoTrack) -> Result<(), VideoError> {
        let encoder = (self.encoders)()?;
        let local = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_owned(),
                clock_rate: CLOCK_RATE as u32,
                ..Default::default()
            },
            "video".to_owned(),
            "nev-camera".to_owned(),
        ));
        let sender = self
            .pc
            .add_track(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(negotiation)?;

        // Interceptors only run while RTCP is being read.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        let pump = tokio::spawn(pump(track, encoder, local));
        *self.pump.lock().unwrap_or_else(PoisonError::into_inner) = Some(pump);
        Ok(())
    }

    async fn set_remote_description(&self, offer: SessionDescription) -> Result<(), VideoError> {
        let value = serde_json::to_value(&offer).map_err(negotiation)?;
        let offer: RTCSessionDescription = serde_json::from_value(value).map_err(negotiation)?;
        self.pc.set_remote_description(offer).await.map_err(negotiation)
    }

    async fn create_answer(&self) -> Result<SessionDescription, VideoError> {
        let answer = self.pc.create_answer(None).await.map_err(negotiation)?;
        let out = session_description(&answer);
        self.pc.set_local_description(answer).await.map_err(negotiation)?;
        Ok(out)
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.pc.local_description().await.map(|d| session_description(&d))
    }

    fn gathering_state(&self) -> watch::Receiver<GatheringState> {
        self.gathering.clone()
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    async fn close(&self) {
        if let Some(pump) = self.pump.lock().unwrap_or_else(PoisonError::into_inner).take() {
            pump.abort();
        }
        if let Err(e) = self.pc.close().await {
            warn!(error = %e, "peer connection close failed");
        }
    }
}

/// Drain `track` into `out` until the track is removed from the relay.
async fn pump(mut track: VideoTrack, mut encoder: Box<dyn Encoder>, out: Arc<TrackLocalStaticSample>) {
    let id = track.id();
    let mut last_pts = None;
    let mut sent = 0u64;

    while let Some(frame) = track.recv().await {
        let pts = frame.pts;
        let encoded = tokio::task::spawn_blocking(move || {
            let unit = encoder.encode(&frame);
            (encoder, unit)
        })
        .await;
        let unit = match encoded {
            Ok((back, unit)) => {
                encoder = back;
                unit
            }
            Err(e) => {
                warn!(track = %id, error = %e, "encoder task failed; viewer stream stopped");
                return;
            }
        };

        let data = match unit {
            Ok(data) if data.is_empty() => continue,
            Ok(data) => data,
            Err(e) => {
                debug!(track = %id, error = %e, "encode failed; frame dropped");
                continue;
            }
        };

        let sample = Sample {
            data,
            duration: sample_duration(last_pts, pts),
            ..Default::default()
        };
        last_pts = Some(pts);
        if let Err(e) = out.write_sample(&sample).await {
            debug!(track = %id, error = %e, "sample write failed");
            continue;
        }
        sent += 1;
    }

    info!(track = %id, samples = sent, "viewer stream ended");
}

/// Wall time covered by a sample, from consecutive 90 kHz timestamps.
fn sample_duration(previous: Option<u64>, pts: u64) -> Duration {
    match previous {
        Some(prev) if pts > prev => Duration::from_micros((pts - prev) * 1_000_000 / CLOCK_RATE),
        _ => DEFAULT_FRAME_DURATION,
    }
}

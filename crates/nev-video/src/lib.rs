//! `nev-video` – Live camera relay.
//!
//! Compressed H.265 units from the vehicle are decoded on one dedicated
//! worker thread and fanned out to a bounded, drop-oldest queue per viewer.
//! Each viewer's [`VideoTrack`] is drained by the media transport at its own
//! pace.
//!
//! ```text
//! CameraSink ──▶ IngestSource ──▶ DecodeWorker ──▶ VideoRelay ──▶ FrameQueue ×N ──▶ VideoTrack
//! ```
//!
//! # Modules
//!
//! - [`frame`] – RGB24 frames and I420 conversion.
//! - [`queue`] – [`FrameQueue`], the per-viewer drop-oldest buffer.
//! - [`hevc`] – Annex-B splitting and NAL unit classification.
//! - [`ingest`] – the two ingestion adapters: every unit, or latest only.
//! - [`decoder`] – the [`Decoder`] seam and the [`DecodeWorker`] thread.
//! - [`relay`] – [`VideoRelay`], the track registry and fanout.
//! - [`track`] – [`VideoTrack`], the consumer side handed to a viewer.
//! - [`session`] – viewer negotiation over a pluggable [`MediaTransport`].
//! - [`rtc`] – the WebRTC transport and its per-viewer [`Encoder`] seam.
//! - `codec` – FFmpeg H.265 decoder and H.264 encoder (feature `ffmpeg`).

#[cfg(feature = "ffmpeg")]
pub mod codec;
pub mod decoder;
pub mod frame;
pub mod hevc;
pub mod ingest;
pub mod queue;
pub mod relay;
pub mod rtc;
pub mod session;
pub mod track;

use thiserror::Error;

pub use decoder::{DecodeWorker, Decoder, WorkerStats};
pub use frame::{I420Frame, VideoFrame};
pub use ingest::{IngestSource, LatestFrameIngest, StreamIngest, latest_ingest, stream_ingest};
pub use queue::{FrameQueue, QUEUE_DEPTH};
#[cfg(feature = "ffmpeg")]
pub use codec::{H264Encoder, HevcDecoder};
pub use relay::{TrackId, VideoRelay};
pub use rtc::{Encoder, EncoderFactory, WebRtcTransport};
pub use session::{
    ConnectionState, GatheringState, MediaTransport, PeerConnection, SessionDescription,
    SessionManager,
};
pub use track::VideoTrack;

#[derive(Error, Debug)]
pub enum VideoError {
    #[error("Decode Error: {0}")]
    Decode(String),

    #[error("Negotiation Error: {0}")]
    Negotiation(String),

    #[error("Video pipeline closed")]
    Closed,
}

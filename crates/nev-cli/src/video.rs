//! Camera relay wiring.
//!
//! ```text
//! VehicleLink ──▶ ingest adapter ──▶ DecodeWorker ──▶ VideoRelay ──▶ SessionManager
//! ```

use std::sync::Arc;
use std::time::Duration;

use nev_types::CameraSink;
use nev_video::{
    DecodeWorker, Decoder, EncoderFactory, IngestSource, LatestFrameIngest, QUEUE_DEPTH,
    SessionManager, VideoError, VideoRelay, WebRtcTransport, latest_ingest, stream_ingest,
};
use tracing::{info, warn};

use crate::config::{IngestMode, VideoConfig};

/// How long shutdown waits for the decode worker to drain.
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct VideoPipeline {
    camera: Arc<dyn CameraSink>,
    sessions: Arc<SessionManager>,
    worker: DecodeWorker,
    latest: Option<LatestFrameIngest>,
}

impl VideoPipeline {
    /// Start the decode worker behind the configured ingest adapter.
    pub fn start(
        cfg: &VideoConfig,
        decoder: Box<dyn Decoder>,
        encoders: EncoderFactory,
    ) -> Result<Self, VideoError> {
        let relay = Arc::new(VideoRelay::new(QUEUE_DEPTH));
        let transport = WebRtcTransport::new(encoders)?.with_ice_servers(cfg.ice_servers.clone());
        let sessions = Arc::new(SessionManager::new(Arc::new(transport), Arc::clone(&relay)));

        let (camera, source, latest): (Arc<dyn CameraSink>, Box<dyn IngestSource>, _) =
            match cfg.ingest {
                IngestMode::Stream => {
                    let (sink, source) = stream_ingest(cfg.backlog);
                    (Arc::new(sink), Box::new(source), None)
                }
                IngestMode::Latest => {
                    let pace = Duration::try_from_secs_f64(cfg.pace)
                        .unwrap_or(Duration::from_millis(33));
                    let (sink, source) = latest_ingest(pace);
                    (Arc::new(sink.clone()), Box::new(source), Some(sink))
                }
            };

        let worker = DecodeWorker::spawn(decoder, source, relay)?;
        info!(ingest = ?cfg.ingest, "camera relay started");
        Ok(Self {
            camera,
            sessions,
            worker,
            latest,
        })
    }

    /// Sink the vehicle link writes camera units into.
    pub fn camera(&self) -> Arc<dyn CameraSink> {
        Arc::clone(&self.camera)
    }

    pub fn sessions(&self) -> Arc<SessionManager> {
        Arc::clone(&self.sessions)
    }

    /// Close every viewer, end the ingest source and wait for the worker.
    /// The vehicle link must already be stopped.
    pub async fn stop(self) {
        self.sessions.close_all().await;
        if let Some(latest) = &self.latest {
            latest.close();
        }
        drop(self.camera);

        let worker = self.worker;
        let joined = tokio::time::timeout(
            JOIN_TIMEOUT,
            tokio::task::spawn_blocking(move || worker.join()),
        )
        .await;
        match joined {
            Ok(Ok(Ok(stats))) => info!(?stats, "camera relay stopped"),
            Ok(Ok(Err(e))) => warn!(error = %e, "decode worker failed"),
            Ok(Err(e)) => warn!(error = %e, "decode worker join task failed"),
            Err(_) => warn!("decode worker still draining at shutdown"),
        }
    }
}

/// FFmpeg decoder and per-viewer encoder factory.
#[cfg(feature = "ffmpeg")]
pub fn codecs() -> Result<(Box<dyn Decoder>, EncoderFactory), VideoError> {
    use nev_video::{Encoder, H264Encoder, HevcDecoder};

    let decoder = HevcDecoder::new()?;
    let encoders: EncoderFactory =
        Arc::new(|| Ok(Box::new(H264Encoder::new()?) as Box<dyn Encoder>));
    Ok((Box::new(decoder), encoders))
}

#[cfg(not(feature = "ffmpeg"))]
pub fn codecs() -> Result<(Box<dyn Decoder>, EncoderFactory), VideoError> {
    Err(VideoError::Decode(
        "built without the `ffmpeg` feature".to_string(),
    ))
}

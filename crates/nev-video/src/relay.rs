//! [`VideoRelay`] – registry of live viewer tracks.
//!
//! The registry belongs to the relay instance, and entries come and go with
//! viewer sessions: [`create_track`](VideoRelay::create_track) on
//! negotiation, [`remove_track`](VideoRelay::remove_track) when the viewer
//! fails or leaves.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};
use uuid::Uuid;

use crate::frame::VideoFrame;
use crate::queue::{FrameQueue, QUEUE_DEPTH};
use crate::track::VideoTrack;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackId(Uuid);

impl TrackId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug)]
pub struct VideoRelay {
    depth: usize,
    tracks: Mutex<HashMap<TrackId, Arc<FrameQueue>>>,
}

impl VideoRelay {
    /// A relay whose tracks each buffer `depth` frames.
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            tracks: Mutex::new(HashMap::new()),
        }
    }

    fn tracks(&self) -> MutexGuard<'_, HashMap<TrackId, Arc<FrameQueue>>> {
        self.tracks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new viewer track.
    pub fn create_track(&self) -> VideoTrack {
        let id = TrackId::new();
        let queue = Arc::new(FrameQueue::new(self.depth));
        let count = {
            let mut tracks = self.tracks();
            tracks.insert(id, Arc::clone(&queue));
            tracks.len()
        };
        info!(track = %id, active = count, "video track created");
        VideoTrack::new(id, queue)
    }

    /// Unregister `id` and close its queue.  Returns `false` if unknown.
    pub fn remove_track(&self, id: TrackId) -> bool {
        match self.tracks().remove(&id) {
            Some(queue) => {
                queue.close();
                info!(track = %id, "video track removed");
                true
            }
            None => false,
        }
    }

    /// Push `frame` to every registered track.  Returns the number of tracks.
    pub fn fanout(&self, frame: Arc<VideoFrame>) -> usize {
        let queues: Vec<_> = self.tracks().values().cloned().collect();
        for queue in &queues {
            if queue.push(Arc::clone(&frame)) {
                debug!("viewer queue full; oldest frame evicted");
            }
        }
        queues.len()
    }

    pub fn track_count(&self) -> usize {
        self.tracks().len()
    }

    /// Close and forget every track.
    pub fn close_all(&self) {
        let drained: Vec<_> = self.tracks().drain().collect();
        for (_, queue) in &drained {
            queue.close();
        }
        if !drained.is_empty() {
            info!(closed = drained.len(), "video tracks cleared");
        }
    }
}

impl Default for VideoRelay {
    fn default() -> Self {
        Self::new(QUEUE_DEPTH)
    }
}

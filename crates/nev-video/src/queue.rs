//! [`FrameQueue`] – bounded per-viewer frame buffer.
//!
//! A live view prefers fresh frames over complete ones: when the queue is
//! full the oldest queued frame is evicted to make room for the new one.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::frame::VideoFrame;

/// Frames buffered per viewer.
pub const QUEUE_DEPTH: usize = 5;

#[derive(Debug)]
pub struct FrameQueue {
    capacity: usize,
    frames: Mutex<VecDeque<Arc<VideoFrame>>>,
    notify: Notify,
    closed: AtomicBool,
    evicted: AtomicU64,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            evicted: AtomicU64::new(0),
        }
    }

    fn frames(&self) -> MutexGuard<'_, VecDeque<Arc<VideoFrame>>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue `frame`, evicting the oldest one if full.  Returns `true` when
    /// a frame was evicted.  Frames pushed after [`close`](Self::close) are
    /// discarded.
    pub fn push(&self, frame: Arc<VideoFrame>) -> bool {
        if self.is_closed() {
            return false;
        }
        let evicted = {
            let mut frames = self.frames();
            let evicted = if frames.len() >= self.capacity {
                frames.pop_front();
                true
            } else {
                false
            };
            frames.push_back(frame);
            evicted
        };
        if evicted {
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        evicted
    }

    pub fn try_pop(&self) -> Option<Arc<VideoFrame>> {
        self.frames().pop_front()
    }

    /// Wait for the next frame.  `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<Arc<VideoFrame>> {
        loop {
            let notified = self.notify.notified();
            if let Some(frame) = self.try_pop() {
                return Some(frame);
            }
            if self.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    /// Stop accepting frames and wake any waiting consumer.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.frames().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames().is_empty()
    }

    /// Frames dropped to backpressure so far.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(QUEUE_DEPTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// A 1×1 frame whose red channel carries `n`.
    fn numbered(n: u8) -> Arc<VideoFrame> {
        Arc::new(VideoFrame::rgb24(1, 1, vec![n, 0, 0]).unwrap())
    }

    fn number(frame: &VideoFrame) -> u8 {
        frame.rgb()[0]
    }

    #[test]
    fn sixth_frame_evicts_the_first() {
        let queue = FrameQueue::default();
        for n in 1..=5 {
            assert!(!queue.push(numbered(n)));
        }
        assert!(queue.push(numbered(6)));

        let drained: Vec<u8> = std::iter::from_fn(|| queue.try_pop())
            .map(|f| number(&f))
            .collect();
        assert_eq!(drained, vec![2, 3, 4, 5, 6]);
        assert_eq!(queue.evicted(), 1);
    }

    #[test]
    fn closed_queue_discards_pushes() {
        let queue = FrameQueue::default();
        queue.close();
        assert!(!queue.push(numbered(1)));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn pop_waits_for_a_frame() {
        let queue = Arc::new(FrameQueue::default());
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await.map(|f| number(&f)) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(numbered(7));
        assert_eq!(consumer.await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn close_wakes_a_waiting_consumer() {
        let queue = Arc::new(FrameQueue::default());
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await.is_none() })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();
        assert!(consumer.await.unwrap());
    }
}

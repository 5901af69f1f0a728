//! Room fan-out with bounded per-connection queues.
//!
//! Uses a tokio broadcast channel: every subscriber owns an independent
//! receiver that buffers up to `capacity` frames. A subscriber that falls
//! further behind loses its oldest frames (drop-oldest) and is told how many
//! it missed, so a slow connection never stalls the sender.
//!
//! Frames are encoded once into `Utf8Bytes`, which clone by reference count
//! and go out as WebSocket text messages without another copy.
//! Audience filtering happens on the receiving side.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Utf8Bytes;

use crate::operation::SessionId;
use crate::protocol::{ProtocolError, ServerEvent};

/// Which connections of a room should deliver a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Every connection, including the one that caused the event.
    Everyone,
    /// Every connection except the given session (diffs and cursor relays).
    AllExcept(SessionId),
}

/// One encoded server event addressed to part of a room.
#[derive(Debug, Clone)]
pub struct Frame {
    audience: Audience,
    text: Utf8Bytes,
}

impl Frame {
    pub fn new(audience: Audience, text: impl Into<Utf8Bytes>) -> Self {
        Self {
            audience,
            text: text.into(),
        }
    }

    /// Whether `session` should deliver this frame.
    pub fn is_for(&self, session: SessionId) -> bool {
        match self.audience {
            Audience::Everyone => true,
            Audience::AllExcept(excluded) => excluded != session,
        }
    }

    pub fn text(&self) -> &Utf8Bytes {
        &self.text
    }
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub subscribers: usize,
}

/// Counters updated on the hot path without locking.
struct AtomicBroadcastStats {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }
}

/// The broadcast group of a single room.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<Frame>>,
    /// Frames buffered per subscriber before the oldest are dropped
    capacity: usize,
    atomic_stats: Arc<AtomicBroadcastStats>,
}

impl BroadcastGroup {
    /// Create a group whose subscribers each buffer up to `capacity` frames.
    ///
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            atomic_stats: Arc::new(AtomicBroadcastStats::new()),
        }
    }

    /// Open a new subscriber queue. It sees only frames sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Frame>> {
        self.sender.subscribe()
    }

    /// Encode `event` once and send it to the room.
    ///
    /// Returns the number of subscriber queues the frame was placed in.
    pub fn send(&self, audience: Audience, event: &ServerEvent) -> Result<usize, ProtocolError> {
        let text = event.encode()?;
        Ok(self.send_frame(Arc::new(Frame::new(audience, text))))
    }

    /// Send a pre-built frame. Never blocks; with no subscribers the frame is discarded.
    pub fn send_frame(&self, frame: Arc<Frame>) -> usize {
        let count = self.sender.send(frame).unwrap_or(0);
        self.atomic_stats.frames_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Account for frames a lagging subscriber lost.
    pub fn record_dropped(&self, frames: u64) {
        self.atomic_stats
            .frames_dropped
            .fetch_add(frames, Ordering::Relaxed);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            frames_sent: self.atomic_stats.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.atomic_stats.frames_dropped.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

use crate::analysis::PixelBuffer;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::watch;

/// A camera preview frame handed to the scan engine
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Unique frame identifier
    pub id: u64,
    /// Timestamp when frame was captured
    pub timestamp: SystemTime,
    /// Decoded RGB pixels (shared ownership, never mutated)
    pub image: Arc<PixelBuffer>,
}

impl FrameData {
    pub fn new(id: u64, image: PixelBuffer) -> Self {
        Self {
            id,
            timestamp: SystemTime::now(),
            image: Arc::new(image),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Get frame age in milliseconds
    pub fn age_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.timestamp)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Latest-only frame mailbox.
///
/// A producer overwrites the slot on every push; consumers only ever observe the
/// newest frame, so a slow consumer drops intermediate frames instead of queueing.
#[derive(Clone)]
pub struct FrameSlot {
    sender: Arc<watch::Sender<Option<FrameData>>>,
    pushed: Arc<AtomicU64>,
}

impl FrameSlot {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender: Arc::new(sender),
            pushed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Replace the current frame, returning the frame that was overwritten
    pub fn push(&self, frame: FrameData) -> Option<FrameData> {
        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.sender.send_replace(Some(frame))
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<FrameData>> {
        self.sender.subscribe()
    }

    pub fn latest(&self) -> Option<FrameData> {
        self.sender.borrow().clone()
    }

    /// Total frames pushed since creation
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

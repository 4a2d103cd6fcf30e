mod cutout;
mod types;

pub use cutout::Cutout;
pub use types::{BoundingBox, Detection, DetectionEvent};

use crate::error::Result;
use crate::frame::FrameData;
use async_trait::async_trait;

/// Object detector collaborator.
///
/// An empty `DetectionEvent` is a normal outcome, not an error.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, frame: &FrameData) -> Result<DetectionEvent>;

    /// One-shot detection on a full resolution still
    async fn detect_still(&self, frame: &FrameData) -> Result<DetectionEvent> {
        self.detect(frame).await
    }
}

/// Barcode / QR decoder collaborator
pub trait CodeDecoder: Send + Sync {
    fn decode(&self, frame: &FrameData) -> Option<String>;
}

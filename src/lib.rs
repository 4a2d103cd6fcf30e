pub mod analysis;
pub mod camera;
pub mod capture;
pub mod config;
pub mod detection;
pub mod error;
pub mod events;
pub mod frame;
pub mod proximity;
pub mod upload;
pub mod zoom;

pub use analysis::{GlareDetector, GlareRegion, GlareReport, PixelBuffer};
pub use camera::{CameraControl, MockCamera};
pub use capture::{
    CaptureOrchestrator, CaptureOrchestratorBuilder, CompressedImage, ScanStats, ScannerState,
};
pub use config::ScanreadyConfig;
pub use detection::{BoundingBox, CodeDecoder, Cutout, Detection, DetectionEvent, Detector};
pub use error::{Result, ScanError};
pub use events::{EventBus, EventFilter, EventReceiver, NoticeKind, ScanEvent};
pub use frame::{FrameData, FrameSlot};
pub use proximity::{ProximityClassifier, ProximityState};
pub use upload::{ClassificationResult, ScanResult, UploadError, Uploader, ValidatingUploader};
pub use zoom::{ZoomController, ZoomDirection, ZoomMode, ZoomOutcome};

use super::compress::{compress, crop_and_upscale, CompressedImage};
use super::engine::Command;
use crate::camera::CameraControl;
use crate::config::{CaptureConfig, CompressionConfig};
use crate::detection::{BoundingBox, Detector};
use crate::upload::{ClassificationResult, UploadError, Uploader};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub(crate) const STAGE_PROCESSING: &str = "processing";
pub(crate) const STAGE_UPLOADING: &str = "uploading";

/// Everything the capture task needs, detached from the actor
pub(crate) struct PipelineContext {
    pub camera: Arc<dyn CameraControl>,
    pub detector: Arc<dyn Detector>,
    pub uploader: Arc<dyn Uploader>,
    pub capture: CaptureConfig,
    pub compression: CompressionConfig,
}

#[derive(Debug)]
pub(crate) enum CaptureOutcome {
    /// The still contained no detectable object
    NotDetected,
    /// Camera or image processing failure
    Failed { cause: String },
    Uploaded {
        response: ClassificationResult,
        image: Arc<CompressedImage>,
        bbox: BoundingBox,
    },
    UploadFailed(UploadError),
}

/// Still capture, re-detection, crop and compression, then upload.
///
/// Stage changes are reported back to the actor as they happen.
pub(crate) async fn run(
    ctx: &PipelineContext,
    code: &str,
    generation: u64,
    commands: &mpsc::Sender<Command>,
) -> CaptureOutcome {
    let still = match ctx.camera.capture().await {
        Ok(still) => still,
        Err(e) => {
            return CaptureOutcome::Failed {
                cause: e.to_string(),
            }
        }
    };

    if let Err(e) = ctx.camera.set_flashlight(false).await {
        warn!("Failed to turn flashlight off after capture: {}", e);
    }
    tokio::time::sleep(ctx.capture.flash_settle()).await;

    let _ = commands
        .send(Command::Stage {
            generation,
            label: STAGE_PROCESSING,
        })
        .await;

    let detection = match ctx.detector.detect_still(&still).await {
        Ok(detection) => detection,
        Err(e) => {
            return CaptureOutcome::Failed {
                cause: e.to_string(),
            }
        }
    };
    let Some(bbox) = detection.best().map(|d| d.bbox) else {
        debug!("No object in still {}", still.id);
        return CaptureOutcome::NotDetected;
    };

    let image = Arc::clone(&still.image);
    let padding = ctx.capture.crop_padding;
    let compression = ctx.compression.clone();
    let compressed = tokio::task::spawn_blocking(move || {
        let cropped = crop_and_upscale(&image, &bbox, padding)?;
        compress(&cropped, &compression)
    })
    .await;

    let compressed = match compressed {
        Ok(Ok(compressed)) => compressed,
        Ok(Err(e)) => {
            return CaptureOutcome::Failed {
                cause: e.to_string(),
            }
        }
        Err(e) => {
            return CaptureOutcome::Failed {
                cause: format!("image worker failed: {}", e),
            }
        }
    };
    debug!(
        "Compressed still {} to {} bytes at q{}",
        still.id,
        compressed.len(),
        compressed.quality
    );

    let _ = commands
        .send(Command::Stage {
            generation,
            label: STAGE_UPLOADING,
        })
        .await;

    match ctx.uploader.submit(code, &compressed).await {
        Ok(response) => CaptureOutcome::Uploaded {
            response,
            image: Arc::new(compressed),
            bbox,
        },
        Err(e) => CaptureOutcome::UploadFailed(e),
    }
}

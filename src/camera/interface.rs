use crate::error::CameraError;
use crate::frame::FrameData;
use async_trait::async_trait;

/// Hardware controls the engine needs from the camera stack
#[async_trait]
pub trait CameraControl: Send + Sync {
    async fn set_zoom_ratio(&self, ratio: f32) -> Result<(), CameraError>;

    /// Largest zoom ratio the device supports
    async fn max_zoom_ratio(&self) -> Result<f32, CameraError>;

    async fn set_flashlight(&self, on: bool) -> Result<(), CameraError>;

    /// Resolves once the focus and metering action completes
    async fn auto_focus(&self) -> Result<(), CameraError>;

    async fn set_exposure_compensation(&self, index: i32) -> Result<(), CameraError>;

    /// Take a full resolution still
    async fn capture(&self) -> Result<FrameData, CameraError>;
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Detection error: {0}")]
    Detection(#[from] DetectionError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl ScanError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<C: Into<String>, M: Into<String>>(component: C, message: M) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Failures reported by the camera collaborator
#[derive(Error, Debug, Clone)]
pub enum CameraError {
    #[error("Autofocus failed: {details}")]
    Focus { details: String },

    #[error("Still capture failed: {details}")]
    Capture { details: String },

    #[error("Camera control rejected command: {details}")]
    Control { details: String },
}

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Region of interest is empty")]
    EmptyRegion,
}

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Detector inference failed: {details}")]
    Inference { details: String },

    #[error("Degenerate bounding box ({left}, {top}, {right}, {bottom})")]
    DegenerateBox {
        left: f32,
        top: f32,
        right: f32,
        bottom: f32,
    },
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Crop region outside image bounds")]
    CropOutOfBounds,

    #[error("JPEG compression failed: {details}")]
    Compression { details: String },
}

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Event channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, ScanError>;

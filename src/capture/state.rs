use super::CompressedImage;
use crate::detection::BoundingBox;
use crate::upload::{ClassificationResult, ScanResult};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// User-visible scanner state
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ScannerState {
    #[default]
    Scanning,
    Processing {
        stage: String,
    },
    Success {
        result: ScanResult,
        image: Arc<CompressedImage>,
        response: ClassificationResult,
    },
    Error {
        cause: String,
        code: Option<u16>,
    },
}

impl ScannerState {
    pub fn is_scanning(&self) -> bool {
        matches!(self, ScannerState::Scanning)
    }

    pub fn is_processing(&self) -> bool {
        matches!(self, ScannerState::Processing { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScannerState::Scanning => "scanning",
            ScannerState::Processing { .. } => "processing",
            ScannerState::Success { .. } => "success",
            ScannerState::Error { .. } => "error",
        }
    }
}

/// One capture attempt, from countdown completion to outcome
#[derive(Debug, Clone)]
pub struct CaptureSession {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub code: String,
    pub bbox: Option<BoundingBox>,
    pub outcome: Option<String>,
}

impl CaptureSession {
    pub fn new(code: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            code,
            bbox: None,
            outcome: None,
        }
    }

    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds()
    }
}

/// Orchestrator counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub frames_analyzed: u64,
    pub countdowns_started: u64,
    pub countdowns_aborted: u64,
    pub captures_started: u64,
    pub captures_succeeded: u64,
    pub captures_failed: u64,
    pub soft_resets: u64,
}

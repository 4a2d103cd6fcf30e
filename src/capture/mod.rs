mod compress;
mod engine;
mod guard;
mod orchestrator;
mod pipeline;
mod state;

pub use compress::{compress, crop_and_upscale, CompressedImage};
pub use guard::{FlightGuard, SingleFlight};
pub use orchestrator::{CaptureOrchestrator, CaptureOrchestratorBuilder};
pub use state::{CaptureSession, ScanStats, ScannerState};

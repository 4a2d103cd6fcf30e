use super::engine::{Channels, Command, Engine, EngineSetup};
use super::state::{ScanStats, ScannerState};
use crate::camera::CameraControl;
use crate::config::ScanreadyConfig;
use crate::detection::{CodeDecoder, Cutout, Detection, Detector};
use crate::error::{Result, ScanError};
use crate::events::EventBus;
use crate::frame::{FrameData, FrameSlot};
use crate::proximity::ProximityState;
use crate::upload::Uploader;
use crate::zoom::{ZoomController, ZoomMode};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Coordinates the scan loop: frame analysis, proximity, zoom, countdown
/// and the capture pipeline. All session state lives in a single actor task;
/// this handle feeds it frames and commands and exposes its observable state.
pub struct CaptureOrchestrator {
    config: ScanreadyConfig,
    commands: mpsc::Sender<Command>,
    frames: FrameSlot,
    state: watch::Receiver<ScannerState>,
    proximity: watch::Receiver<ProximityState>,
    detections: watch::Receiver<Vec<Detection>>,
    stats: Arc<Mutex<ScanStats>>,
    zoom: ZoomController,
    event_bus: EventBus,
    shutdown: CancellationToken,
    pending: Option<(Engine, mpsc::Receiver<Command>)>,
    task: Option<JoinHandle<()>>,
}

impl CaptureOrchestrator {
    pub fn builder() -> CaptureOrchestratorBuilder {
        CaptureOrchestratorBuilder::new()
    }

    /// Initialize zoom and start the actor
    pub async fn start(&mut self) -> Result<()> {
        if self.task.is_some() {
            warn!("Capture orchestrator is already running");
            return Ok(());
        }

        let (engine, commands) = self.pending.take().ok_or_else(|| {
            ScanError::component("capture_orchestrator", "Orchestrator cannot be restarted")
        })?;

        let neutral = self.zoom.initialize().await;
        info!("Starting capture orchestrator (zoom {:.2})", neutral);

        let frames = self.frames.subscribe();
        let shutdown = self.shutdown.clone();
        self.task = Some(tokio::spawn(engine.run(commands, frames, shutdown)));
        Ok(())
    }

    /// Stop the actor and wait for it to finish
    pub async fn stop(&mut self) -> Result<()> {
        self.shutdown.cancel();
        self.zoom.cancel();
        if let Some(task) = self.task.take() {
            task.await.map_err(|e| {
                ScanError::component("capture_orchestrator", format!("Actor task failed: {}", e))
            })?;
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Offer a preview frame. Frames not yet analyzed are replaced.
    pub fn submit_frame(&self, frame: FrameData) {
        self.frames.push(frame);
    }

    /// Shared slot for producers that push frames directly
    pub fn frame_slot(&self) -> FrameSlot {
        self.frames.clone()
    }

    pub fn state(&self) -> ScannerState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ScannerState> {
        self.state.clone()
    }

    pub fn proximity(&self) -> ProximityState {
        *self.proximity.borrow()
    }

    pub fn subscribe_proximity(&self) -> watch::Receiver<ProximityState> {
        self.proximity.clone()
    }

    /// Detections shown in the overlay for the latest analyzed frame
    pub fn detections(&self) -> Vec<Detection> {
        self.detections.borrow().clone()
    }

    pub fn subscribe_detections(&self) -> watch::Receiver<Vec<Detection>> {
        self.detections.clone()
    }

    pub fn stats(&self) -> ScanStats {
        self.stats.lock().clone()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn config(&self) -> &ScanreadyConfig {
        &self.config
    }

    pub fn zoom(&self) -> &ZoomController {
        &self.zoom
    }

    /// Cancel any countdown or capture and return to scanning at neutral zoom
    pub async fn reset(&self) -> Result<()> {
        self.send(Command::Reset).await
    }

    /// While paused, no new countdown starts
    pub async fn set_paused(&self, paused: bool) -> Result<()> {
        self.send(Command::SetPaused(paused)).await
    }

    pub async fn update_cutout(&self, cutout: Cutout) -> Result<()> {
        self.send(Command::UpdateCutout(cutout)).await
    }

    /// Switch between automatic and manual zoom
    pub async fn toggle_manual_zoom(&self) -> ZoomMode {
        self.zoom.toggle_manual().await
    }

    /// Nudge the ratio in manual mode; `None` outside manual mode
    pub async fn step_manual_zoom(&self, delta: f32) -> Option<f32> {
        self.zoom.step_manual(delta).await
    }

    #[cfg(test)]
    pub(crate) async fn send_command(&self, command: Command) -> Result<()> {
        self.send(command).await
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).await.map_err(|_| {
            ScanError::component("capture_orchestrator", "Orchestrator is not running")
        })
    }
}

impl Drop for CaptureOrchestrator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Builder for [`CaptureOrchestrator`]
#[derive(Default)]
pub struct CaptureOrchestratorBuilder {
    config: Option<ScanreadyConfig>,
    camera: Option<Arc<dyn CameraControl>>,
    detector: Option<Arc<dyn Detector>>,
    decoder: Option<Arc<dyn CodeDecoder>>,
    uploader: Option<Arc<dyn Uploader>>,
    event_bus: Option<EventBus>,
    cutout: Option<Cutout>,
}

impl CaptureOrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: ScanreadyConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn camera(mut self, camera: Arc<dyn CameraControl>) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn detector(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn decoder(mut self, decoder: Arc<dyn CodeDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn cutout(mut self, cutout: Cutout) -> Self {
        self.cutout = Some(cutout);
        self
    }

    pub fn build(self) -> Result<CaptureOrchestrator> {
        let config = self.config.ok_or_else(|| {
            ScanError::component("capture_orchestrator_builder", "Config is required")
        })?;
        config.validate()?;

        let camera = self.camera.ok_or_else(|| {
            ScanError::component("capture_orchestrator_builder", "Camera is required")
        })?;
        let detector = self.detector.ok_or_else(|| {
            ScanError::component("capture_orchestrator_builder", "Detector is required")
        })?;
        let decoder = self.decoder.ok_or_else(|| {
            ScanError::component("capture_orchestrator_builder", "Code decoder is required")
        })?;
        let uploader = self.uploader.ok_or_else(|| {
            ScanError::component("capture_orchestrator_builder", "Uploader is required")
        })?;
        let event_bus = self
            .event_bus
            .unwrap_or_else(|| EventBus::new(config.system.event_bus_capacity));

        let zoom = ZoomController::new(
            config.zoom.clone(),
            Arc::clone(&camera),
            Some(event_bus.clone()),
        );

        let (state_tx, state_rx) = watch::channel(ScannerState::Scanning);
        let (proximity_tx, proximity_rx) = watch::channel(ProximityState::Undetected);
        let (detections_tx, detections_rx) = watch::channel(Vec::new());
        let (commands_tx, commands_rx) = mpsc::channel(config.system.command_capacity);
        let stats = Arc::new(Mutex::new(ScanStats::default()));

        let engine = Engine::new(EngineSetup {
            config: config.clone(),
            camera,
            detector,
            decoder,
            uploader,
            zoom: zoom.clone(),
            event_bus: event_bus.clone(),
            channels: Channels {
                state: state_tx,
                proximity: proximity_tx,
                detections: detections_tx,
            },
            stats: Arc::clone(&stats),
            commands: commands_tx.clone(),
            cutout: self.cutout,
        });

        Ok(CaptureOrchestrator {
            config,
            commands: commands_tx,
            frames: FrameSlot::new(),
            state: state_rx,
            proximity: proximity_rx,
            detections: detections_rx,
            stats,
            zoom,
            event_bus,
            shutdown: CancellationToken::new(),
            pending: Some((engine, commands_rx)),
            task: None,
        })
    }
}

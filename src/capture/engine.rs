use super::guard::{FlightGuard, SingleFlight};
use super::pipeline::{self, CaptureOutcome, PipelineContext};
use super::state::{CaptureSession, ScanStats, ScannerState};
use crate::camera::CameraControl;
use crate::config::ScanreadyConfig;
use crate::detection::{CodeDecoder, Cutout, Detection, Detector};
use crate::error::CameraError;
use crate::events::{EventBus, NoticeKind, ScanEvent};
use crate::frame::FrameData;
use crate::proximity::{ProximityClassifier, ProximityState};
use crate::upload::{ScanResult, Uploader};
use crate::zoom::{ConvergeHandle, ZoomController, ZoomDirection, ZoomMode};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Messages processed by the actor. Timer and task completions carry the
/// generation they were started under; stale generations are ignored.
#[derive(Debug)]
pub(crate) enum Command {
    FocusCompleted {
        generation: u64,
        result: Result<(), CameraError>,
    },
    CountdownElapsed {
        generation: u64,
    },
    DebounceElapsed {
        generation: u64,
    },
    Stage {
        generation: u64,
        label: &'static str,
    },
    CaptureFinished {
        generation: u64,
        outcome: CaptureOutcome,
    },
    AutoReset {
        generation: u64,
    },
    Reset,
    SetPaused(bool),
    UpdateCutout(Cutout),
}

struct Timer {
    generation: u64,
    token: CancellationToken,
}

impl Timer {
    fn cancel(&self) {
        self.token.cancel();
    }
}

enum Phase {
    Idle,
    CountingDown {
        timer: Timer,
        focused: bool,
    },
    Capturing {
        timer: Timer,
        session: CaptureSession,
        _guard: FlightGuard,
    },
}

/// Output channels owned by the actor
pub(crate) struct Channels {
    pub state: watch::Sender<ScannerState>,
    pub proximity: watch::Sender<ProximityState>,
    pub detections: watch::Sender<Vec<Detection>>,
}

pub(crate) struct EngineSetup {
    pub config: ScanreadyConfig,
    pub camera: Arc<dyn CameraControl>,
    pub detector: Arc<dyn Detector>,
    pub decoder: Arc<dyn CodeDecoder>,
    pub uploader: Arc<dyn Uploader>,
    pub zoom: ZoomController,
    pub event_bus: EventBus,
    pub channels: Channels,
    pub stats: Arc<Mutex<ScanStats>>,
    pub commands: mpsc::Sender<Command>,
    pub cutout: Option<Cutout>,
}

/// Single-writer owner of all scan session state
pub(crate) struct Engine {
    config: ScanreadyConfig,
    camera: Arc<dyn CameraControl>,
    detector: Arc<dyn Detector>,
    decoder: Arc<dyn CodeDecoder>,
    uploader: Arc<dyn Uploader>,
    classifier: ProximityClassifier,
    zoom: ZoomController,
    event_bus: EventBus,
    channels: Channels,
    stats: Arc<Mutex<ScanStats>>,
    commands: mpsc::Sender<Command>,
    flight: SingleFlight,

    cutout: Option<Cutout>,
    paused: bool,
    code: Option<String>,
    code_seen: bool,
    generation: u64,
    phase: Phase,
    debounce: Option<Timer>,
    auto_reset: Option<Timer>,
    zoom_loop: Option<(ZoomDirection, ConvergeHandle)>,
    glare_episode: bool,
}

impl Engine {
    pub(crate) fn new(setup: EngineSetup) -> Self {
        let classifier = ProximityClassifier::new(
            setup.config.proximity.clone(),
            setup.config.analysis.clone(),
        )
        .with_lighting(Arc::clone(&setup.camera))
        .with_event_bus(setup.event_bus.clone());

        Self {
            config: setup.config,
            camera: setup.camera,
            detector: setup.detector,
            decoder: setup.decoder,
            uploader: setup.uploader,
            classifier,
            zoom: setup.zoom,
            event_bus: setup.event_bus,
            channels: setup.channels,
            stats: setup.stats,
            commands: setup.commands,
            flight: SingleFlight::new(),
            cutout: setup.cutout,
            paused: false,
            code: None,
            code_seen: false,
            generation: 0,
            phase: Phase::Idle,
            debounce: None,
            auto_reset: None,
            zoom_loop: None,
            glare_episode: false,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut frames: watch::Receiver<Option<FrameData>>,
        shutdown: CancellationToken,
    ) {
        info!("Capture orchestrator started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(command) = commands.recv() => self.handle(command).await,
                changed = frames.changed() => {
                    if changed.is_err() {
                        debug!("Frame source closed");
                        break;
                    }
                    let frame = frames.borrow_and_update().clone();
                    if let Some(frame) = frame {
                        self.on_frame(frame).await;
                    }
                }
            }
        }

        self.cancel_timers();
        if let Some((_, handle)) = self.zoom_loop.take() {
            handle.cancel();
        }
        info!("Capture orchestrator stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::FocusCompleted { generation, result } => {
                self.on_focus_completed(generation, result).await
            }
            Command::CountdownElapsed { generation } => self.on_countdown_elapsed(generation),
            Command::DebounceElapsed { generation } => self.on_debounce_elapsed(generation).await,
            Command::Stage { generation, label } => self.on_stage(generation, label),
            Command::CaptureFinished {
                generation,
                outcome,
            } => self.on_capture_finished(generation, outcome).await,
            Command::AutoReset { generation } => {
                let current = self.auto_reset.as_ref().map(|t| t.generation);
                if current == Some(generation) {
                    self.auto_reset = None;
                    if matches!(*self.channels.state.borrow(), ScannerState::Error { .. }) {
                        info!("Auto reset after error");
                        self.soft_reset(false).await;
                    }
                }
            }
            Command::Reset => self.reset().await,
            Command::SetPaused(paused) => {
                debug!("Scanning paused: {}", paused);
                self.paused = paused;
            }
            Command::UpdateCutout(cutout) => {
                debug!("Cutout updated: {:?}", cutout);
                self.cutout = Some(cutout);
            }
        }
    }

    async fn on_frame(&mut self, frame: FrameData) {
        if !self.channels.state.borrow().is_scanning() {
            return;
        }

        let code = self.decoder.decode(&frame).filter(|c| !c.is_empty());
        self.code_seen = code.is_some();
        let Some(code) = code else {
            self.start_debounce();
            return;
        };
        self.code = Some(code);

        if matches!(self.phase, Phase::Capturing { .. }) {
            return;
        }
        self.stats.lock().frames_analyzed += 1;

        let event = match self.detector.detect(&frame).await {
            Ok(event) => event,
            Err(e) => {
                warn!("Detection failed on frame {}: {}", frame.id, e);
                self.lose_object().await;
                return;
            }
        };
        let Some(best) = event.best().cloned() else {
            self.lose_object().await;
            return;
        };
        let Some(cutout) = self.cutout else {
            debug!("No cutout configured, ignoring detection");
            self.lose_object().await;
            return;
        };

        let proximity = self.classifier.classify_detection(&frame, &best.bbox).await;
        debug!("Frame {} proximity {:?}", frame.id, proximity);

        if proximity.is_optimal() {
            self.channels.detections.send_replace(event.detections);
            let inside = cutout.contains(
                &best.bbox,
                frame.width(),
                frame.height(),
                self.config.capture.cutout_padding,
            );
            if inside {
                self.set_proximity(ProximityState::Optimal).await;
                if !self.paused {
                    self.start_countdown();
                }
            } else {
                self.set_proximity(ProximityState::Outside).await;
            }
        } else {
            self.channels.detections.send_replace(Vec::new());
            self.set_proximity(proximity).await;
        }
    }

    async fn lose_object(&mut self) {
        self.channels.detections.send_replace(Vec::new());
        self.set_proximity(ProximityState::Undetected).await;
    }

    async fn set_proximity(&mut self, state: ProximityState) {
        let previous = self.channels.proximity.send_replace(state);
        if previous == state {
            return;
        }
        debug!("Proximity {:?} -> {:?}", previous, state);
        self.event_bus.emit(ScanEvent::ProximityChanged {
            state,
            timestamp: SystemTime::now(),
        });

        if !state.is_optimal() {
            self.abort_countdown();
        }

        if state == ProximityState::Glared {
            if !self.glare_episode {
                self.glare_episode = true;
                let index = self.config.capture.glare_exposure_compensation;
                info!("Glare detected, requesting exposure compensation {}", index);
                if let Err(e) = self.camera.set_exposure_compensation(index).await {
                    warn!("Failed to set exposure compensation: {}", e);
                }
            }
        } else {
            self.glare_episode = false;
        }

        self.drive_zoom(state);
    }

    fn drive_zoom(&mut self, state: ProximityState) {
        if self.zoom.mode() == ZoomMode::Manual {
            return;
        }

        let direction = match state {
            ProximityState::TooClose => Some(ZoomDirection::Out),
            ProximityState::TooFar => Some(ZoomDirection::In),
            _ => None,
        };

        match direction {
            Some(direction) => {
                if let Some((running, handle)) = &self.zoom_loop {
                    if *running == direction && !handle.is_finished() {
                        return;
                    }
                }
                let proximity = self.channels.proximity.subscribe();
                let handle = self.zoom.converge(
                    direction,
                    move || *proximity.borrow(),
                    self.config.zoom.step_interval(),
                );
                self.zoom_loop = Some((direction, handle));
            }
            None => {
                if let Some((_, handle)) = self.zoom_loop.take() {
                    handle.cancel();
                }
            }
        }
    }

    fn next_timer(&mut self) -> Timer {
        self.generation += 1;
        Timer {
            generation: self.generation,
            token: CancellationToken::new(),
        }
    }

    /// Send `command` after `delay` unless `token` is cancelled first
    fn spawn_delayed(&self, delay: Duration, token: CancellationToken, command: Command) {
        let commands = self.commands.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = commands.send(command).await;
                }
            }
        });
    }

    fn start_debounce(&mut self) {
        if self.debounce.is_some() {
            return;
        }
        let timer = self.next_timer();
        self.spawn_delayed(
            self.config.capture.debounce(),
            timer.token.clone(),
            Command::DebounceElapsed {
                generation: timer.generation,
            },
        );
        self.debounce = Some(timer);
    }

    async fn on_debounce_elapsed(&mut self, generation: u64) {
        if self.debounce.as_ref().map(|t| t.generation) != Some(generation) {
            return;
        }
        self.debounce = None;
        if self.code_seen {
            return;
        }

        debug!("No code seen during debounce window");
        self.lose_object().await;
        if !self.channels.state.borrow().is_processing() {
            self.code = None;
        }
    }

    fn start_countdown(&mut self) {
        if !matches!(self.phase, Phase::Idle) || self.flight.is_busy() {
            return;
        }

        let timer = self.next_timer();
        debug!("Countdown {} started, requesting autofocus", timer.generation);
        self.stats.lock().countdowns_started += 1;

        let camera = Arc::clone(&self.camera);
        let commands = self.commands.clone();
        let token = timer.token.clone();
        let generation = timer.generation;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                result = camera.auto_focus() => {
                    let _ = commands.send(Command::FocusCompleted { generation, result }).await;
                }
            }
        });

        self.phase = Phase::CountingDown {
            timer,
            focused: false,
        };
    }

    fn abort_countdown(&mut self) {
        if let Phase::CountingDown { timer, .. } = &self.phase {
            debug!("Countdown {} aborted", timer.generation);
            timer.cancel();
            self.phase = Phase::Idle;
            self.stats.lock().countdowns_aborted += 1;
        }
    }

    async fn on_focus_completed(&mut self, generation: u64, result: Result<(), CameraError>) {
        let token = match &mut self.phase {
            Phase::CountingDown { timer, focused } if timer.generation == generation && !*focused => {
                *focused = true;
                timer.token.clone()
            }
            _ => return,
        };

        if let Err(e) = result {
            self.abort_countdown();
            self.fail(e.to_string(), None).await;
            return;
        }
        if !self.channels.proximity.borrow().is_optimal() {
            self.abort_countdown();
            return;
        }

        debug!("Focus complete, settling before capture");
        self.spawn_delayed(
            self.config.capture.settle(),
            token,
            Command::CountdownElapsed { generation },
        );
    }

    fn on_countdown_elapsed(&mut self, generation: u64) {
        let ready = matches!(
            &self.phase,
            Phase::CountingDown { timer, focused: true } if timer.generation == generation
        );
        if !ready {
            return;
        }
        if self.channels.proximity.borrow().is_optimal() {
            self.begin_capture();
        } else {
            self.abort_countdown();
        }
    }

    fn begin_capture(&mut self) {
        let Phase::CountingDown { timer, .. } = std::mem::replace(&mut self.phase, Phase::Idle)
        else {
            return;
        };

        let Some(code) = self.code.clone() else {
            warn!("Countdown finished without a code");
            timer.cancel();
            self.notice(NoticeKind::CodeNotDetected);
            self.publish_state(ScannerState::Scanning);
            return;
        };

        let Some(guard) = self.flight.try_acquire() else {
            warn!("Capture already in flight, skipping");
            timer.cancel();
            return;
        };

        let session = CaptureSession::new(code.clone());
        info!(
            "Capture {} started at {} for code {}",
            session.id, session.started_at, code
        );
        self.stats.lock().captures_started += 1;
        self.event_bus.emit(ScanEvent::CaptureTriggered {
            session_id: session.id.to_string(),
            timestamp: SystemTime::now(),
        });

        let ctx = PipelineContext {
            camera: Arc::clone(&self.camera),
            detector: Arc::clone(&self.detector),
            uploader: Arc::clone(&self.uploader),
            capture: self.config.capture.clone(),
            compression: self.config.compression.clone(),
        };
        let commands = self.commands.clone();
        let token = timer.token.clone();
        let generation = timer.generation;
        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = token.cancelled() => return,
                outcome = pipeline::run(&ctx, &code, generation, &commands) => outcome,
            };
            let _ = commands
                .send(Command::CaptureFinished {
                    generation,
                    outcome,
                })
                .await;
        });

        self.phase = Phase::Capturing {
            timer,
            session,
            _guard: guard,
        };
    }

    fn on_stage(&mut self, generation: u64, label: &'static str) {
        let session_id = match &self.phase {
            Phase::Capturing { timer, session, .. } if timer.generation == generation => {
                session.id.to_string()
            }
            _ => return,
        };
        self.publish_state(ScannerState::Processing {
            stage: label.to_string(),
        });
        self.event_bus.emit(ScanEvent::StageChanged {
            session_id,
            stage: label.to_string(),
        });
    }

    async fn on_capture_finished(&mut self, generation: u64, outcome: CaptureOutcome) {
        let current = matches!(
            &self.phase,
            Phase::Capturing { timer, .. } if timer.generation == generation
        );
        if !current {
            debug!("Ignoring stale capture result {}", generation);
            return;
        }
        // Dropping the phase releases the single-flight guard
        let Phase::Capturing { mut session, .. } = std::mem::replace(&mut self.phase, Phase::Idle)
        else {
            return;
        };

        let label = match outcome {
            CaptureOutcome::NotDetected => {
                self.notice(NoticeKind::CodeNotDetected);
                self.soft_reset(true).await;
                "not_detected"
            }
            CaptureOutcome::Failed { cause } => {
                self.fail(cause, None).await;
                "failed"
            }
            CaptureOutcome::Uploaded {
                response,
                image,
                bbox,
            } => {
                session.bbox = Some(bbox);
                let result = ScanResult::from_classification(&response);
                info!("Capture {} classified as {:?}", session.id, result);
                self.stats.lock().captures_succeeded += 1;
                self.publish_state(ScannerState::Success {
                    result,
                    image,
                    response,
                });
                "success"
            }
            CaptureOutcome::UploadFailed(e) if e.is_soft() => {
                let (kind, label) = match e.status {
                    None => (NoticeKind::CodeNotDetected, "no_code"),
                    Some(_) => (NoticeKind::InvalidCode, "invalid_code"),
                };
                self.notice(kind);
                self.soft_reset(true).await;
                label
            }
            CaptureOutcome::UploadFailed(e) => {
                self.fail(e.message, e.status).await;
                "upload_failed"
            }
        };

        session.outcome = Some(label.to_string());
        self.complete(&session);
    }

    fn complete(&self, session: &CaptureSession) {
        let outcome = session.outcome.as_deref().unwrap_or("unknown");
        info!(
            "Capture {} finished as {} after {} ms (box {:?})",
            session.id,
            outcome,
            session.elapsed_ms(),
            session.bbox
        );
        self.event_bus.emit(ScanEvent::CaptureCompleted {
            session_id: session.id.to_string(),
            outcome: outcome.to_string(),
        });
    }

    fn notice(&self, kind: NoticeKind) {
        self.event_bus.emit(ScanEvent::Notice {
            kind,
            timestamp: SystemTime::now(),
        });
    }

    fn publish_state(&self, state: ScannerState) {
        let previous = self.channels.state.send_replace(state);
        let current = self.channels.state.borrow();
        if previous.name() != current.name() {
            info!("Scanner state {} -> {}", previous.name(), current.name());
        }
    }

    fn cancel_timers(&mut self) {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::CountingDown { timer, .. } | Phase::Capturing { timer, .. } => timer.cancel(),
            Phase::Idle => {}
        }
        if let Some(timer) = self.debounce.take() {
            timer.cancel();
        }
        if let Some(timer) = self.auto_reset.take() {
            timer.cancel();
        }
    }

    /// Forget the current object and code
    async fn clear_session(&mut self) {
        self.cancel_timers();
        self.code = None;
        self.code_seen = false;
        self.lose_object().await;
    }

    /// Cancel zoom convergence and return to the neutral ratio
    async fn reset_zoom(&mut self) {
        if let Some((_, handle)) = self.zoom_loop.take() {
            handle.cancel();
        }
        self.zoom.reset().await;
    }

    async fn soft_reset(&mut self, flash_on: bool) {
        self.stats.lock().soft_resets += 1;
        self.clear_session().await;
        self.reset_zoom().await;
        self.publish_state(ScannerState::Scanning);
        if flash_on {
            if let Err(e) = self.camera.set_flashlight(true).await {
                warn!("Failed to turn flashlight on: {}", e);
            }
        }
        self.event_bus.emit(ScanEvent::SessionReset {
            timestamp: SystemTime::now(),
        });
    }

    async fn fail(&mut self, cause: String, code: Option<u16>) {
        error!("Capture failed ({:?}): {}", code, cause);
        self.stats.lock().captures_failed += 1;
        if let Err(e) = self.camera.set_flashlight(false).await {
            warn!("Failed to turn flashlight off: {}", e);
        }
        self.lose_object().await;
        self.event_bus.emit(ScanEvent::SystemError {
            component: "capture".to_string(),
            error: cause.clone(),
        });
        self.publish_state(ScannerState::Error { cause, code });

        if let Some(delay) = self.config.capture.auto_reset() {
            let timer = self.next_timer();
            self.spawn_delayed(
                delay,
                timer.token.clone(),
                Command::AutoReset {
                    generation: timer.generation,
                },
            );
            self.auto_reset = Some(timer);
        }
    }

    /// Host-requested reset: cancel everything and return to a neutral scan
    async fn reset(&mut self) {
        info!("Resetting scan session");
        self.clear_session().await;
        self.reset_zoom().await;
        if let Err(e) = self.camera.set_flashlight(false).await {
            warn!("Failed to turn flashlight off: {}", e);
        }
        self.publish_state(ScannerState::Scanning);
        self.event_bus.emit(ScanEvent::SessionReset {
            timestamp: SystemTime::now(),
        });
    }
}

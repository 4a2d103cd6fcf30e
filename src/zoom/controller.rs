use crate::camera::CameraControl;
use crate::config::ZoomConfig;
use crate::events::{EventBus, ScanEvent};
use crate::proximity::ProximityState;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const RATIO_EPSILON: f32 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomDirection {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomMode {
    Idle,
    Converging(ZoomDirection),
    Manual,
}

/// How a convergence loop ended
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZoomOutcome {
    ReachedOptimal,
    /// Stopped at the given clamped ratio
    ClampReached(f32),
    Cancelled,
    /// Manual mode was active
    Disabled,
}

/// Running convergence loop
pub struct ConvergeHandle {
    token: CancellationToken,
    handle: JoinHandle<ZoomOutcome>,
}

impl ConvergeHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn outcome(self) -> ZoomOutcome {
        self.handle.await.unwrap_or(ZoomOutcome::Cancelled)
    }
}

#[derive(Debug)]
struct ZoomSession {
    ratio: Option<f32>,
    min_ratio: f32,
    max_ratio: f32,
    device_cap: f32,
    mode: ZoomMode,
    generation: u64,
    token: Option<CancellationToken>,
}

impl ZoomSession {
    /// Preferred ratio held inside the automatic range
    fn neutral(&self, preferred: f32) -> f32 {
        preferred.min(self.max_ratio).max(self.min_ratio)
    }
}

struct Shared {
    config: ZoomConfig,
    camera: Arc<dyn CameraControl>,
    session: Mutex<ZoomSession>,
    // Serializes generation checks with the camera call that follows them
    apply_lock: tokio::sync::Mutex<()>,
    event_bus: Option<EventBus>,
}

impl Shared {
    fn emit(&self, event: ScanEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(event);
        }
    }

    async fn send_to_camera(&self, ratio: f32) {
        if let Err(e) = self.camera.set_zoom_ratio(ratio).await {
            warn!("Failed to apply zoom ratio {:.2}: {}", ratio, e);
        }
        self.emit(ScanEvent::ZoomChanged { ratio });
    }

    /// Apply `ratio` unless a newer generation took over
    async fn apply_if_current(&self, generation: u64, ratio: f32) -> bool {
        let _guard = self.apply_lock.lock().await;
        {
            let mut session = self.session.lock();
            if session.generation != generation {
                return false;
            }
            session.ratio = Some(ratio);
        }
        self.send_to_camera(ratio).await;
        true
    }

    /// Cancel any loop and invalidate its pending applications
    fn supersede(&self) {
        let mut session = self.session.lock();
        if let Some(token) = session.token.take() {
            token.cancel();
        }
        session.generation += 1;
        if let ZoomMode::Converging(_) = session.mode {
            session.mode = ZoomMode::Idle;
        }
    }

    async fn apply_now(&self, ratio: f32) {
        let _guard = self.apply_lock.lock().await;
        self.session.lock().ratio = Some(ratio);
        self.send_to_camera(ratio).await;
    }
}

/// Drives the camera zoom ratio toward optimal framing
#[derive(Clone)]
pub struct ZoomController {
    shared: Arc<Shared>,
}

impl ZoomController {
    pub fn new(
        config: ZoomConfig,
        camera: Arc<dyn CameraControl>,
        event_bus: Option<EventBus>,
    ) -> Self {
        let device_cap = config.max_ratio.max(config.manual_ceiling);
        let session = ZoomSession {
            ratio: None,
            min_ratio: config.min_ratio,
            max_ratio: config.max_ratio,
            device_cap,
            mode: ZoomMode::Idle,
            generation: 0,
            token: None,
        };
        Self {
            shared: Arc::new(Shared {
                config,
                camera,
                session: Mutex::new(session),
                apply_lock: tokio::sync::Mutex::new(()),
                event_bus,
            }),
        }
    }

    /// Read the device cap and apply the neutral ratio
    pub async fn initialize(&self) -> f32 {
        let cap = match self.shared.camera.max_zoom_ratio().await {
            Ok(cap) if cap > 0.0 => cap,
            Ok(cap) => {
                warn!("Camera reported invalid max zoom {}, using configured max", cap);
                self.shared.config.max_ratio
            }
            Err(e) => {
                warn!("Failed to read max zoom ratio: {}", e);
                self.shared.config.max_ratio
            }
        };

        {
            let mut session = self.shared.session.lock();
            session.device_cap = cap;
            session.max_ratio = self.shared.config.max_ratio.min(cap);
            session.min_ratio = self.shared.config.min_ratio.min(session.max_ratio);
            info!(
                "Zoom limits [{:.2}, {:.2}] (device cap {:.2})",
                session.min_ratio, session.max_ratio, cap
            );
        }

        self.reset().await
    }

    /// Neutral ratio: the preferred ratio clamped to the automatic range
    pub fn neutral_ratio(&self) -> f32 {
        let session = self.shared.session.lock();
        session.neutral(self.shared.config.preferred_ratio)
    }

    pub fn ratio(&self) -> Option<f32> {
        self.shared.session.lock().ratio
    }

    pub fn mode(&self) -> ZoomMode {
        self.shared.session.lock().mode
    }

    /// Effective automatic zoom range
    pub fn limits(&self) -> (f32, f32) {
        let session = self.shared.session.lock();
        (session.min_ratio, session.max_ratio)
    }

    /// Start a convergence loop, cancelling any loop already running.
    ///
    /// Each iteration re-polls proximity; the loop ends once `poll` reports
    /// [`ProximityState::Optimal`], on reaching a clamp, or when cancelled.
    pub fn converge<P>(&self, direction: ZoomDirection, poll: P, step: Duration) -> ConvergeHandle
    where
        P: Fn() -> ProximityState + Send + Sync + 'static,
    {
        let token = CancellationToken::new();

        let generation = {
            let mut session = self.shared.session.lock();
            if session.mode == ZoomMode::Manual {
                drop(session);
                return ConvergeHandle {
                    token,
                    handle: tokio::spawn(async { ZoomOutcome::Disabled }),
                };
            }
            if let Some(previous) = session.token.replace(token.clone()) {
                previous.cancel();
            }
            session.generation += 1;
            session.mode = ZoomMode::Converging(direction);
            session.generation
        };

        debug!("Zoom converge {:?} (generation {})", direction, generation);

        let shared = Arc::clone(&self.shared);
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            let outcome = converge_loop(&shared, generation, direction, poll, step, &loop_token).await;

            let mut session = shared.session.lock();
            if session.generation == generation {
                session.token = None;
                if let ZoomMode::Converging(_) = session.mode {
                    session.mode = ZoomMode::Idle;
                }
            }
            debug!("Zoom converge {:?} finished: {:?}", direction, outcome);
            outcome
        });

        ConvergeHandle { token, handle }
    }

    /// Cancel the running loop, if any
    pub fn cancel(&self) {
        self.shared.supersede();
    }

    /// Toggle manual mode, returning the new mode.
    ///
    /// Entering manual keeps the current ratio capped at the manual ceiling.
    pub async fn toggle_manual(&self) -> ZoomMode {
        let entering = self.mode() != ZoomMode::Manual;
        self.shared.supersede();

        if !entering {
            self.shared.session.lock().mode = ZoomMode::Idle;
            info!("Manual zoom disabled");
            return ZoomMode::Idle;
        }

        let ratio = {
            let mut session = self.shared.session.lock();
            session.mode = ZoomMode::Manual;
            let ceiling = self.shared.config.manual_ceiling.min(session.device_cap);
            session
                .ratio
                .unwrap_or(self.shared.config.preferred_ratio)
                .min(ceiling)
        };
        info!("Manual zoom enabled at {:.2}", ratio);
        self.shared.apply_now(ratio).await;
        ZoomMode::Manual
    }

    /// Nudge the ratio in manual mode; `None` when not manual
    pub async fn step_manual(&self, delta: f32) -> Option<f32> {
        let ratio = {
            let session = self.shared.session.lock();
            if session.mode != ZoomMode::Manual {
                return None;
            }
            let ceiling = self.shared.config.manual_ceiling.min(session.device_cap);
            let floor = session.min_ratio.min(ceiling);
            let current = session.ratio.unwrap_or(self.shared.config.preferred_ratio);
            (current + delta).clamp(floor, ceiling)
        };
        self.shared.apply_now(ratio).await;
        Some(ratio)
    }

    /// Cancel any loop and apply the neutral ratio
    pub async fn reset(&self) -> f32 {
        self.shared.supersede();
        let ratio = self.neutral_ratio();
        debug!("Zoom reset to {:.2}", ratio);
        self.shared.apply_now(ratio).await;
        ratio
    }
}

async fn converge_loop<P>(
    shared: &Shared,
    generation: u64,
    direction: ZoomDirection,
    poll: P,
    step: Duration,
    token: &CancellationToken,
) -> ZoomOutcome
where
    P: Fn() -> ProximityState,
{
    loop {
        if token.is_cancelled() {
            return ZoomOutcome::Cancelled;
        }
        if poll() == ProximityState::Optimal {
            return ZoomOutcome::ReachedOptimal;
        }

        let (current, min, max) = {
            let session = shared.session.lock();
            let current = session
                .ratio
                .unwrap_or_else(|| session.neutral(shared.config.preferred_ratio));
            (current, session.min_ratio, session.max_ratio)
        };

        let target = match direction {
            ZoomDirection::In => current * shared.config.zoom_in_factor,
            ZoomDirection::Out => current * shared.config.zoom_out_factor,
        };
        let clamped = target.clamp(min, max);

        if (clamped - current).abs() < RATIO_EPSILON {
            return ZoomOutcome::ClampReached(current);
        }

        if !shared.apply_if_current(generation, clamped).await {
            return ZoomOutcome::Cancelled;
        }

        if (clamped - target).abs() >= RATIO_EPSILON {
            shared.emit(ScanEvent::ZoomLimitReached { ratio: clamped });
            return ZoomOutcome::ClampReached(clamped);
        }

        tokio::select! {
            _ = token.cancelled() => return ZoomOutcome::Cancelled,
            _ = tokio::time::sleep(step) => {}
        }
    }
}

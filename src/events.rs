use crate::error::EventBusError;
use crate::proximity::ProximityState;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// User-facing notices raised on soft resets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeKind {
    /// The still did not contain a detectable object, or no code was read
    CodeNotDetected,
    /// The decoded code was rejected by the code domain policy
    InvalidCode,
}

impl NoticeKind {
    pub fn message(&self) -> &'static str {
        match self {
            NoticeKind::CodeNotDetected => "Code not detected, please try again",
            NoticeKind::InvalidCode => "This code is not supported",
        }
    }
}

/// Events emitted by the scan engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScanEvent {
    /// Proximity classification changed
    ProximityChanged {
        state: ProximityState,
        timestamp: SystemTime,
    },
    /// Glare was found in the region of interest
    GlareDetected {
        regions: usize,
        timestamp: SystemTime,
    },
    /// A zoom ratio was applied to the camera
    ZoomChanged { ratio: f32 },
    /// Convergence stopped at a clamp
    ZoomLimitReached { ratio: f32 },
    /// Countdown completed and a still capture started
    CaptureTriggered {
        session_id: String,
        timestamp: SystemTime,
    },
    /// Capture pipeline moved to a new processing stage
    StageChanged { session_id: String, stage: String },
    /// Capture session finished
    CaptureCompleted { session_id: String, outcome: String },
    /// A notice should be shown to the user
    Notice {
        kind: NoticeKind,
        timestamp: SystemTime,
    },
    /// Session returned to scanning
    SessionReset { timestamp: SystemTime },
    /// A component failed in a way that surfaced to the user
    SystemError { component: String, error: String },
}

impl ScanEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            ScanEvent::ProximityChanged { state, .. } => format!("Proximity {:?}", state),
            ScanEvent::GlareDetected { regions, .. } => {
                format!("Glare detected in {} region(s)", regions)
            }
            ScanEvent::ZoomChanged { ratio } => format!("Zoom ratio {:.2}", ratio),
            ScanEvent::ZoomLimitReached { ratio } => format!("Zoom limit reached at {:.2}", ratio),
            ScanEvent::CaptureTriggered { session_id, .. } => {
                format!("Capture triggered: {}", session_id)
            }
            ScanEvent::StageChanged { session_id, stage } => {
                format!("Capture {} stage: {}", session_id, stage)
            }
            ScanEvent::CaptureCompleted {
                session_id,
                outcome,
            } => format!("Capture completed: {} ({})", session_id, outcome),
            ScanEvent::Notice { kind, .. } => format!("Notice: {}", kind.message()),
            ScanEvent::SessionReset { .. } => "Session reset".to_string(),
            ScanEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            ScanEvent::ProximityChanged { .. } => "proximity_changed",
            ScanEvent::GlareDetected { .. } => "glare_detected",
            ScanEvent::ZoomChanged { .. } => "zoom_changed",
            ScanEvent::ZoomLimitReached { .. } => "zoom_limit_reached",
            ScanEvent::CaptureTriggered { .. } => "capture_triggered",
            ScanEvent::StageChanged { .. } => "stage_changed",
            ScanEvent::CaptureCompleted { .. } => "capture_completed",
            ScanEvent::Notice { .. } => "notice",
            ScanEvent::SessionReset { .. } => "session_reset",
            ScanEvent::SystemError { .. } => "system_error",
        }
    }
}

/// Broadcast bus for engine telemetry and notices
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ScanEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter attached
    pub fn subscribe_filtered(&self, filter: EventFilter, name: impl Into<String>) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter, name.into())
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: ScanEvent) -> Result<usize, EventBusError> {
        match &event {
            ScanEvent::CaptureTriggered { session_id, .. } => {
                info!("Capture triggered (session {})", session_id);
            }
            ScanEvent::SystemError { component, error } => {
                error!("System error in {}: {}", component, error);
            }
            ScanEvent::Notice { kind, .. } => {
                warn!("Notice: {}", kind.message());
            }
            _ => debug!("Event: {}", event.description()),
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Publish, ignoring the no-subscriber case
    pub fn emit(&self, event: ScanEvent) {
        let _ = self.publish(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    All,
    EventTypes(Vec<&'static str>),
    Custom(fn(&ScanEvent) -> bool),
}

impl EventFilter {
    pub fn matches(&self, event: &ScanEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Event receiver that skips events rejected by its filter
pub struct EventReceiver {
    receiver: broadcast::Receiver<ScanEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(receiver: broadcast::Receiver<ScanEvent>, filter: EventFilter, name: String) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Result<ScanEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Keep going from the oldest retained event
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<ScanEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_basic_operations() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let count = event_bus
            .publish(ScanEvent::ZoomChanged { ratio: 2.1 })
            .unwrap();
        assert_eq!(count, 1);

        match receiver.recv().await.unwrap() {
            ScanEvent::ZoomChanged { ratio } => assert_eq!(ratio, 2.1),
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_receiver_reports_closed_bus() {
        let event_bus = EventBus::new(4);
        let mut receiver = event_bus.subscribe_filtered(EventFilter::All, "closing");
        event_bus.emit(ScanEvent::ZoomChanged { ratio: 2.0 });
        drop(event_bus);

        assert!(matches!(receiver.recv().await, Ok(ScanEvent::ZoomChanged { .. })));
        assert!(matches!(
            receiver.recv().await,
            Err(EventBusError::ChannelClosed)
        ));
        assert!(matches!(receiver.try_recv(), Err(EventBusError::ChannelClosed)));
    }

    #[test]
    fn test_publish_without_subscribers_fails() {
        let event_bus = EventBus::new(4);
        assert!(event_bus
            .publish(ScanEvent::SessionReset {
                timestamp: SystemTime::now()
            })
            .is_err());
        // emit swallows the same failure
        event_bus.emit(ScanEvent::SessionReset {
            timestamp: SystemTime::now(),
        });
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let event_bus = EventBus::new(10);
        let mut filtered =
            event_bus.subscribe_filtered(EventFilter::EventTypes(vec!["notice"]), "test");

        event_bus.emit(ScanEvent::ZoomChanged { ratio: 2.0 });
        event_bus.emit(ScanEvent::Notice {
            kind: NoticeKind::InvalidCode,
            timestamp: SystemTime::now(),
        });

        let received = timeout(Duration::from_millis(100), filtered.recv())
            .await
            .unwrap()
            .unwrap();
        match received {
            ScanEvent::Notice { kind, .. } => assert_eq!(kind, NoticeKind::InvalidCode),
            other => panic!("Unexpected event: {:?}", other),
        }
        assert!(filtered.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_event_properties() {
        let event = ScanEvent::GlareDetected {
            regions: 2,
            timestamp: SystemTime::now(),
        };
        assert_eq!(event.event_type(), "glare_detected");
        assert!(event.description().contains("2 region"));
        assert!(EventFilter::All.matches(&event));
        assert!(EventFilter::Custom(|e| matches!(e, ScanEvent::GlareDetected { .. })).matches(&event));
    }
}

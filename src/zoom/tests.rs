use super::*;
use crate::{
    camera::{CameraControl, MockCamera},
    config::ZoomConfig,
    events::{EventBus, ScanEvent},
    proximity::ProximityState,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STEP: Duration = Duration::from_millis(1);

fn create_test_controller(max_zoom: f32, preferred: f32) -> (ZoomController, Arc<MockCamera>) {
    let camera = Arc::new(MockCamera::new(max_zoom));
    let config = ZoomConfig {
        preferred_ratio: preferred,
        ..ZoomConfig::default()
    };
    let controller = ZoomController::new(config, camera.clone() as Arc<dyn CameraControl>, None);
    (controller, camera)
}

#[tokio::test]
async fn test_initialize_applies_neutral_ratio() {
    let (controller, camera) = create_test_controller(10.0, 3.0);
    assert_eq!(controller.initialize().await, 3.0);
    assert_eq!(controller.ratio(), Some(3.0));
    assert_eq!(controller.limits(), (2.0, 3.0));
    assert_eq!(camera.zoom_history(), vec![3.0]);
}

#[tokio::test]
async fn test_device_cap_below_min_collapses_range() {
    let (controller, _camera) = create_test_controller(1.5, 3.0);
    assert_eq!(controller.initialize().await, 1.5);
    assert_eq!(controller.limits(), (1.5, 1.5));

    let outcome = controller
        .converge(ZoomDirection::In, || ProximityState::TooFar, STEP)
        .outcome()
        .await;
    assert_eq!(outcome, ZoomOutcome::ClampReached(1.5));
}

#[tokio::test]
async fn test_neutral_ratio_is_clamped_to_limits() {
    let (controller, camera) = create_test_controller(10.0, 3.5);
    assert_eq!(controller.initialize().await, 3.0);
    assert_eq!(camera.zoom_history(), vec![3.0]);

    let (controller, camera) = create_test_controller(10.0, 1.2);
    assert_eq!(controller.initialize().await, 2.0);
    assert_eq!(controller.reset().await, 2.0);
    assert_eq!(camera.zoom_history(), vec![2.0, 2.0]);
}

#[tokio::test]
async fn test_converge_in_stops_on_optimal() {
    let (controller, camera) = create_test_controller(10.0, 2.0);
    controller.initialize().await;

    let polls = Arc::new(AtomicUsize::new(0));
    let counter = polls.clone();
    let poll = move || {
        if counter.fetch_add(1, Ordering::SeqCst) < 3 {
            ProximityState::TooFar
        } else {
            ProximityState::Optimal
        }
    };

    let outcome = controller.converge(ZoomDirection::In, poll, STEP).outcome().await;
    assert_eq!(outcome, ZoomOutcome::ReachedOptimal);

    let history = camera.zoom_history();
    assert_eq!(history.len(), 4);
    assert!((history[1] - 2.1).abs() < 1e-4);
    assert!((history[3] - 2.0 * 1.05f32.powi(3)).abs() < 1e-3);
    assert_eq!(controller.mode(), ZoomMode::Idle);
}

#[tokio::test]
async fn test_converge_out_terminates_at_min_clamp() {
    let bus = EventBus::new(64);
    let mut events = bus.subscribe();
    let camera = Arc::new(MockCamera::new(10.0));
    let controller = ZoomController::new(
        ZoomConfig::default(),
        camera.clone() as Arc<dyn CameraControl>,
        Some(bus),
    );
    controller.initialize().await;

    let outcome = controller
        .converge(ZoomDirection::Out, || ProximityState::TooClose, STEP)
        .outcome()
        .await;
    assert_eq!(outcome, ZoomOutcome::ClampReached(2.0));

    let history = camera.zoom_history();
    assert!(history.windows(2).all(|w| w[1] < w[0]));
    assert!(history.iter().all(|r| (2.0..=3.0).contains(r)));
    assert_eq!(history.last(), Some(&2.0));

    let mut limit_events = 0;
    while let Ok(event) = events.try_recv() {
        if let ScanEvent::ZoomLimitReached { ratio } = event {
            assert_eq!(ratio, 2.0);
            limit_events += 1;
        }
    }
    assert_eq!(limit_events, 1);
}

#[tokio::test]
async fn test_converge_at_clamp_does_not_apply() {
    let (controller, camera) = create_test_controller(10.0, 3.0);
    controller.initialize().await;

    let outcome = controller
        .converge(ZoomDirection::In, || ProximityState::TooFar, STEP)
        .outcome()
        .await;
    assert_eq!(outcome, ZoomOutcome::ClampReached(3.0));
    assert_eq!(camera.zoom_history(), vec![3.0]);
}

#[tokio::test]
async fn test_new_loop_cancels_previous() {
    let (controller, _camera) = create_test_controller(10.0, 3.0);
    controller.initialize().await;

    let first = controller.converge(
        ZoomDirection::Out,
        || ProximityState::TooClose,
        Duration::from_millis(50),
    );
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = controller.converge(ZoomDirection::Out, || ProximityState::Optimal, STEP);

    assert_eq!(first.outcome().await, ZoomOutcome::Cancelled);
    assert_eq!(second.outcome().await, ZoomOutcome::ReachedOptimal);
}

#[tokio::test]
async fn test_reset_cancels_and_restores_neutral() {
    let (controller, camera) = create_test_controller(10.0, 3.0);
    controller.initialize().await;

    let handle = controller.converge(
        ZoomDirection::Out,
        || ProximityState::TooClose,
        Duration::from_millis(50),
    );
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(controller.reset().await, 3.0);

    assert_eq!(handle.outcome().await, ZoomOutcome::Cancelled);
    assert_eq!(controller.ratio(), Some(3.0));
    assert_eq!(camera.zoom_history().last(), Some(&3.0));
}

#[tokio::test]
async fn test_manual_mode_disables_convergence() {
    let (controller, camera) = create_test_controller(10.0, 3.0);
    controller.initialize().await;

    assert_eq!(controller.toggle_manual().await, ZoomMode::Manual);
    let outcome = controller
        .converge(ZoomDirection::In, || ProximityState::TooFar, STEP)
        .outcome()
        .await;
    assert_eq!(outcome, ZoomOutcome::Disabled);

    assert_eq!(controller.step_manual(0.5).await, Some(3.5));
    assert_eq!(controller.step_manual(0.5).await, Some(4.0));
    assert_eq!(controller.step_manual(0.5).await, Some(4.0));
    assert_eq!(controller.step_manual(-5.0).await, Some(2.0));
    assert_eq!(camera.zoom_history().last(), Some(&2.0));

    assert_eq!(controller.toggle_manual().await, ZoomMode::Idle);
    assert_eq!(controller.step_manual(0.5).await, None);
}

#[tokio::test]
async fn test_manual_entry_caps_ratio_at_ceiling() {
    let camera = Arc::new(MockCamera::new(10.0));
    let config = ZoomConfig {
        manual_ceiling: 2.5,
        ..ZoomConfig::default()
    };
    let controller = ZoomController::new(config, camera.clone() as Arc<dyn CameraControl>, None);
    controller.initialize().await;

    controller.toggle_manual().await;
    assert_eq!(controller.ratio(), Some(2.5));
    assert_eq!(camera.zoom_history(), vec![3.0, 2.5]);
}

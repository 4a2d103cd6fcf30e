use super::CameraControl;
use crate::analysis::PixelBuffer;
use crate::error::CameraError;
use crate::frame::FrameData;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Commands observed by [`MockCamera`], in call order
#[derive(Debug, Clone, PartialEq)]
pub enum CameraCall {
    Zoom(f32),
    Flash(bool),
    AutoFocus,
    Exposure(i32),
    Capture,
}

/// Camera double that records every command and returns scripted stills
pub struct MockCamera {
    max_zoom: f32,
    still: Mutex<Option<PixelBuffer>>,
    fail_capture: Mutex<Option<CameraError>>,
    fail_focus: Mutex<Option<CameraError>>,
    focus_delay: Duration,
    calls: Mutex<Vec<CameraCall>>,
    next_id: AtomicU64,
}

impl MockCamera {
    pub fn new(max_zoom: f32) -> Self {
        Self {
            max_zoom,
            still: Mutex::new(None),
            fail_capture: Mutex::new(None),
            fail_focus: Mutex::new(None),
            focus_delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1_000_000),
        }
    }

    pub fn with_still(self, still: PixelBuffer) -> Self {
        *self.still.lock() = Some(still);
        self
    }

    pub fn with_focus_delay(mut self, delay: Duration) -> Self {
        self.focus_delay = delay;
        self
    }

    /// Make every following capture fail with `error`
    pub fn fail_captures(&self, error: CameraError) {
        *self.fail_capture.lock() = Some(error);
    }

    /// Make every following autofocus request fail with `error`
    pub fn fail_focus(&self, error: CameraError) {
        *self.fail_focus.lock() = Some(error);
    }

    pub fn calls(&self) -> Vec<CameraCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&CameraCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| predicate(c)).count()
    }

    pub fn capture_count(&self) -> usize {
        self.count(|c| *c == CameraCall::Capture)
    }

    pub fn zoom_history(&self) -> Vec<f32> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                CameraCall::Zoom(r) => Some(*r),
                _ => None,
            })
            .collect()
    }

    pub fn last_flash(&self) -> Option<bool> {
        self.calls.lock().iter().rev().find_map(|c| match c {
            CameraCall::Flash(on) => Some(*on),
            _ => None,
        })
    }

    fn record(&self, call: CameraCall) {
        debug!("Mock camera: {:?}", call);
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl CameraControl for MockCamera {
    async fn set_zoom_ratio(&self, ratio: f32) -> Result<(), CameraError> {
        self.record(CameraCall::Zoom(ratio));
        Ok(())
    }

    async fn max_zoom_ratio(&self) -> Result<f32, CameraError> {
        Ok(self.max_zoom)
    }

    async fn set_flashlight(&self, on: bool) -> Result<(), CameraError> {
        self.record(CameraCall::Flash(on));
        Ok(())
    }

    async fn auto_focus(&self) -> Result<(), CameraError> {
        self.record(CameraCall::AutoFocus);
        if !self.focus_delay.is_zero() {
            tokio::time::sleep(self.focus_delay).await;
        }
        match self.fail_focus.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn set_exposure_compensation(&self, index: i32) -> Result<(), CameraError> {
        self.record(CameraCall::Exposure(index));
        Ok(())
    }

    async fn capture(&self) -> Result<FrameData, CameraError> {
        self.record(CameraCall::Capture);
        if let Some(error) = self.fail_capture.lock().clone() {
            return Err(error);
        }
        let still = self
            .still
            .lock()
            .clone()
            .ok_or_else(|| CameraError::Capture {
                details: "no still configured".to_string(),
            })?;
        Ok(FrameData::new(
            self.next_id.fetch_add(1, Ordering::Relaxed),
            still,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[tokio::test]
    async fn test_mock_records_calls() {
        let camera = MockCamera::new(8.0).with_still(RgbImage::new(4, 4));
        camera.set_zoom_ratio(2.0).await.unwrap();
        camera.set_flashlight(true).await.unwrap();
        let still = camera.capture().await.unwrap();

        assert_eq!(still.width(), 4);
        assert_eq!(camera.max_zoom_ratio().await.unwrap(), 8.0);
        assert_eq!(camera.zoom_history(), vec![2.0]);
        assert_eq!(camera.last_flash(), Some(true));
        assert_eq!(camera.capture_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_capture_failure() {
        let camera = MockCamera::new(3.0);
        assert!(camera.capture().await.is_err());

        let camera = MockCamera::new(3.0).with_still(RgbImage::new(2, 2));
        camera.fail_captures(CameraError::Capture {
            details: "sensor".into(),
        });
        assert!(matches!(
            camera.capture().await,
            Err(CameraError::Capture { .. })
        ));
    }
}

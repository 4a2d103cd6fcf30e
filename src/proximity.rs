use crate::analysis::{crop, is_too_dark, GlareDetector, PixelBuffer};
use crate::camera::CameraControl;
use crate::config::{AnalysisConfig, ProximityConfig};
use crate::detection::BoundingBox;
use crate::events::{EventBus, ScanEvent};
use crate::frame::FrameData;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

/// How the detected object sits relative to the ideal capture distance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProximityState {
    TooFar,
    TooClose,
    Optimal,
    /// Optimal size but not inside the cutout
    Outside,
    #[default]
    Undetected,
    Glared,
}

impl ProximityState {
    pub fn is_optimal(&self) -> bool {
        matches!(self, ProximityState::Optimal)
    }
}

struct RegionVerdict {
    glare_regions: usize,
    too_dark: bool,
}

/// Maps relative object width plus glare and darkness checks to a
/// [`ProximityState`]
pub struct ProximityClassifier {
    config: ProximityConfig,
    darkness_threshold: f64,
    glare: GlareDetector,
    lighting: Option<Arc<dyn CameraControl>>,
    event_bus: Option<EventBus>,
}

impl ProximityClassifier {
    pub fn new(config: ProximityConfig, analysis: AnalysisConfig) -> Self {
        Self {
            config,
            darkness_threshold: analysis.darkness_threshold,
            glare: GlareDetector::new(analysis),
            lighting: None,
            event_bus: None,
        }
    }

    /// Turn the flashlight on through `lighting` when the region is too dark
    pub fn with_lighting(mut self, lighting: Arc<dyn CameraControl>) -> Self {
        self.lighting = Some(lighting);
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Size-only verdict; `None` inside the ambiguous band
    fn size_band(&self, relative_size: f32) -> Option<ProximityState> {
        if !relative_size.is_finite() {
            return Some(ProximityState::Undetected);
        }
        if relative_size <= self.config.too_far_max {
            Some(ProximityState::TooFar)
        } else if relative_size >= self.config.too_close_min {
            Some(ProximityState::TooClose)
        } else {
            None
        }
    }

    /// Classify from the object's width relative to the frame and the cropped
    /// region of interest
    pub async fn classify(&self, relative_size: f32, roi: PixelBuffer) -> ProximityState {
        if let Some(state) = self.size_band(relative_size) {
            debug!("Relative size {:.3} -> {:?}", relative_size, state);
            return state;
        }
        self.analyze_region(relative_size, roi).await
    }

    /// Classify a detector box on `frame`, cropping the region only when the size
    /// alone is not decisive
    pub async fn classify_detection(&self, frame: &FrameData, bbox: &BoundingBox) -> ProximityState {
        if frame.width() == 0 {
            return ProximityState::Undetected;
        }
        let relative_size = bbox.width() / frame.width() as f32;
        if let Some(state) = self.size_band(relative_size) {
            debug!("Relative size {:.3} -> {:?}", relative_size, state);
            return state;
        }

        match crop(&frame.image, bbox) {
            Ok(roi) => self.analyze_region(relative_size, roi).await,
            Err(e) => {
                debug!("Cannot crop region for frame {}: {}", frame.id, e);
                ProximityState::Undetected
            }
        }
    }

    async fn analyze_region(&self, relative_size: f32, roi: PixelBuffer) -> ProximityState {
        if roi.width() == 0 || roi.height() == 0 {
            return ProximityState::Undetected;
        }

        let glare = self.glare.clone();
        let darkness_threshold = self.darkness_threshold;
        let verdict = tokio::task::spawn_blocking(move || {
            let report = glare.detect(&roi);
            RegionVerdict {
                glare_regions: report.regions.len(),
                too_dark: is_too_dark(&roi, darkness_threshold),
            }
        })
        .await;

        let verdict = match verdict {
            Ok(v) => v,
            Err(e) => {
                warn!("Region analysis failed: {}", e);
                return ProximityState::Undetected;
            }
        };

        if verdict.too_dark {
            debug!("Region too dark, requesting flashlight");
            if let Some(lighting) = &self.lighting {
                if let Err(e) = lighting.set_flashlight(true).await {
                    warn!("Failed to turn flashlight on: {}", e);
                }
            }
        }

        let state = if verdict.glare_regions > 0 {
            if let Some(bus) = &self.event_bus {
                bus.emit(ScanEvent::GlareDetected {
                    regions: verdict.glare_regions,
                    timestamp: SystemTime::now(),
                });
            }
            ProximityState::Glared
        } else {
            ProximityState::Optimal
        };

        debug!("Relative size {:.3} -> {:?}", relative_size, state);
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraCall, MockCamera};
    use image::{Rgb, RgbImage};

    fn classifier() -> ProximityClassifier {
        ProximityClassifier::new(ProximityConfig::default(), AnalysisConfig::default())
    }

    fn uniform(level: u8) -> PixelBuffer {
        RgbImage::from_pixel(60, 60, Rgb([level, level, level]))
    }

    #[tokio::test]
    async fn test_size_thresholds() {
        let c = classifier();
        assert_eq!(c.classify(0.2, uniform(180)).await, ProximityState::TooFar);
        assert_eq!(c.classify(0.31, uniform(180)).await, ProximityState::TooFar);
        assert_eq!(c.classify(0.45, uniform(180)).await, ProximityState::TooClose);
        assert_eq!(c.classify(0.8, uniform(180)).await, ProximityState::TooClose);
        assert_eq!(c.classify(0.38, uniform(180)).await, ProximityState::Optimal);
        assert_eq!(c.classify(f32::NAN, uniform(180)).await, ProximityState::Undetected);
    }

    #[tokio::test]
    async fn test_empty_region_is_undetected() {
        let c = classifier();
        assert_eq!(c.classify(0.38, RgbImage::new(0, 0)).await, ProximityState::Undetected);
    }

    #[tokio::test]
    async fn test_dark_region_turns_flash_on() {
        let camera = Arc::new(MockCamera::new(3.0));
        let c = classifier().with_lighting(camera.clone());

        assert_eq!(c.classify(0.38, uniform(60)).await, ProximityState::Optimal);
        assert_eq!(camera.calls(), vec![CameraCall::Flash(true)]);

        // Bright regions leave the flash alone
        c.classify(0.38, uniform(180)).await;
        assert_eq!(camera.count(|call| matches!(call, CameraCall::Flash(_))), 1);
    }

    #[tokio::test]
    async fn test_glare_region_is_glared() {
        let bus = EventBus::new(8);
        let mut events = bus.subscribe();
        let c = classifier().with_event_bus(bus.clone());

        let mut roi = RgbImage::from_pixel(120, 120, Rgb([150, 150, 150]));
        for y in 32..57 {
            for x in 40..65 {
                roi.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }

        assert_eq!(c.classify(0.4, roi).await, ProximityState::Glared);
        assert!(matches!(
            events.try_recv(),
            Ok(ScanEvent::GlareDetected { regions: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_classify_detection_uses_frame_width() {
        let c = classifier();
        let frame = FrameData::new(1, RgbImage::from_pixel(200, 200, Rgb([160, 160, 160])));

        let optimal = BoundingBox::new(62.0, 70.0, 138.0, 146.0).unwrap();
        assert_eq!(c.classify_detection(&frame, &optimal).await, ProximityState::Optimal);

        let far = BoundingBox::new(80.0, 80.0, 120.0, 120.0).unwrap();
        assert_eq!(c.classify_detection(&frame, &far).await, ProximityState::TooFar);

        let close = BoundingBox::new(10.0, 10.0, 190.0, 190.0).unwrap();
        assert_eq!(c.classify_detection(&frame, &close).await, ProximityState::TooClose);
    }
}

use crate::error::DetectionError;
use serde::{Deserialize, Serialize};

/// Axis-aligned box in image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl BoundingBox {
    /// Build a box, rejecting inverted or non-finite edges
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Result<Self, DetectionError> {
        let finite = [left, top, right, bottom].iter().all(|v| v.is_finite());
        if !finite || right < left || bottom < top {
            return Err(DetectionError::DegenerateBox {
                left,
                top,
                right,
                bottom,
            });
        }
        Ok(Self {
            left,
            top,
            right,
            bottom,
        })
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn center(&self) -> (f32, f32) {
        (
            (self.left + self.right) / 2.0,
            (self.top + self.bottom) / 2.0,
        )
    }

    /// Map from one coordinate space into another by scaling each axis
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            left: self.left * sx,
            top: self.top * sy,
            right: self.right * sx,
            bottom: self.bottom * sy,
        }
    }

    /// Grow the box by fixed amounts on every side
    pub fn expanded(&self, dx: f32, dy: f32) -> Self {
        Self {
            left: self.left - dx,
            top: self.top - dy,
            right: self.right + dx,
            bottom: self.bottom + dy,
        }
    }

    /// Intersect with `[0, width] x [0, height]`
    pub fn clamped(&self, width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        Self {
            left: self.left.clamp(0.0, w),
            top: self.top.clamp(0.0, h),
            right: self.right.clamp(0.0, w),
            bottom: self.bottom.clamp(0.0, h),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }
}

/// One detector hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub label: String,
    pub score: f32,
}

/// Detector output for one frame
#[derive(Debug, Clone, Default)]
pub struct DetectionEvent {
    pub frame_id: u64,
    pub image_width: u32,
    pub image_height: u32,
    pub detections: Vec<Detection>,
}

impl DetectionEvent {
    pub fn empty(frame_id: u64, image_width: u32, image_height: u32) -> Self {
        Self {
            frame_id,
            image_width,
            image_height,
            detections: Vec::new(),
        }
    }

    /// Highest scoring detection, if any
    pub fn best(&self) -> Option<&Detection> {
        self.detections
            .iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_box_rejects_degenerate_edges() {
        assert!(BoundingBox::new(10.0, 10.0, 5.0, 20.0).is_err());
        assert!(BoundingBox::new(0.0, 10.0, 5.0, 2.0).is_err());
        assert!(BoundingBox::new(0.0, f32::NAN, 5.0, 2.0).is_err());

        let bbox = BoundingBox::new(2.0, 4.0, 12.0, 8.0).unwrap();
        assert_eq!(bbox.width(), 10.0);
        assert_eq!(bbox.height(), 4.0);
        assert_eq!(bbox.center(), (7.0, 6.0));
    }

    #[test]
    fn test_clamp_and_expand() {
        let bbox = BoundingBox::new(5.0, 5.0, 95.0, 45.0).unwrap();
        let grown = bbox.expanded(10.0, 10.0).clamped(100, 50);
        assert_eq!(grown, BoundingBox::new(0.0, 0.0, 100.0, 50.0).unwrap());

        let outside = BoundingBox::new(120.0, 0.0, 130.0, 10.0)
            .unwrap()
            .clamped(100, 50);
        assert!(outside.is_empty());
    }

    #[test]
    fn test_best_detection_by_score() {
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
        let mut event = DetectionEvent::empty(1, 10, 10);
        assert!(event.best().is_none());
        event.detections = vec![
            Detection {
                bbox,
                label: "a".into(),
                score: 0.4,
            },
            Detection {
                bbox,
                label: "b".into(),
                score: 0.9,
            },
        ];
        assert_eq!(event.best().map(|d| d.label.as_str()), Some("b"));
    }
}

use super::BoundingBox;
use serde::{Deserialize, Serialize};

/// Framing guide drawn over the preview.
///
/// The cutout is centered horizontally and placed three fifths of the way down
/// the free vertical space of the container.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cutout {
    pub container_width: f32,
    pub container_height: f32,
    pub width: f32,
    pub height: f32,
}

impl Cutout {
    pub fn new(container_width: f32, container_height: f32, width: f32, height: f32) -> Self {
        Self {
            container_width,
            container_height,
            width,
            height,
        }
    }

    /// Cutout rectangle in container coordinates
    pub fn rect(&self) -> BoundingBox {
        let left = (self.container_width - self.width) / 2.0;
        let top = 3.0 * (self.container_height - self.height) / 5.0;
        BoundingBox {
            left,
            top,
            right: left + self.width,
            bottom: top + self.height,
        }
    }

    /// Whether a box detected on an `image_width x image_height` frame lies inside
    /// the cutout once mapped onto the container.
    ///
    /// Leading edges are relaxed by `(1 - padding)` and trailing edges by
    /// `(1 + padding)`.
    pub fn contains(
        &self,
        bbox: &BoundingBox,
        image_width: u32,
        image_height: u32,
        padding: f32,
    ) -> bool {
        if image_width == 0 || image_height == 0 {
            return false;
        }

        let mapped = bbox.scaled(
            self.container_width / image_width as f32,
            self.container_height / image_height as f32,
        );
        let cutout = self.rect();
        let lead = 1.0 - padding;
        let trail = 1.0 + padding;

        mapped.left >= cutout.left * lead
            && mapped.top >= cutout.top * lead
            && mapped.right <= cutout.right * trail
            && mapped.bottom <= cutout.bottom * trail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cutout_geometry() {
        let cutout = Cutout::new(200.0, 200.0, 120.0, 120.0);
        let rect = cutout.rect();
        assert_eq!(rect.left, 40.0);
        assert_eq!(rect.top, 48.0);
        assert_eq!(rect.right, 160.0);
        assert_eq!(rect.bottom, 168.0);
    }

    #[test]
    fn test_contains_with_padding() {
        let cutout = Cutout::new(200.0, 200.0, 120.0, 120.0);
        let inside = BoundingBox::new(62.0, 70.0, 138.0, 146.0).unwrap();
        assert!(cutout.contains(&inside, 200, 200, 0.10));

        // Just past the unpadded left edge but within the relaxed one
        let near_edge = BoundingBox::new(37.0, 70.0, 100.0, 146.0).unwrap();
        assert!(!cutout.contains(&near_edge, 200, 200, 0.0));
        assert!(cutout.contains(&near_edge, 200, 200, 0.10));

        let off = BoundingBox::new(0.0, 0.0, 30.0, 30.0).unwrap();
        assert!(!cutout.contains(&off, 200, 200, 0.10));
    }

    #[test]
    fn test_contains_maps_image_to_container() {
        // Frame is half the container resolution
        let cutout = Cutout::new(200.0, 200.0, 120.0, 120.0);
        let bbox = BoundingBox::new(31.0, 35.0, 69.0, 73.0).unwrap();
        assert!(cutout.contains(&bbox, 100, 100, 0.10));
        assert!(!cutout.contains(&bbox, 0, 100, 0.10));
    }
}

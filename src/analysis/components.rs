use super::PixelBuffer;
use rayon::prelude::*;
use serde::Serialize;

/// Summary of one 8-connected white region
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentStats {
    /// 1-based label, unique within one labeling pass
    pub label: u32,
    pub min_x: u32,
    pub min_y: u32,
    /// Inclusive
    pub max_x: u32,
    /// Inclusive
    pub max_y: u32,
    pub area: u32,
    pub centroid: (f32, f32),
}

impl ComponentStats {
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width() as f32 / self.height() as f32
    }
}

#[inline]
fn is_white(buf: &PixelBuffer, x: u32, y: u32) -> bool {
    buf.get_pixel(x, y)[0] == 255
}

/// Flood fill of rows `[start, end)` with its own visited set
fn label_band(binary: &PixelBuffer, start: u32, end: u32) -> Vec<ComponentStats> {
    let width = binary.width();
    let rows = (end - start) as usize;
    let mut visited = vec![false; rows * width as usize];
    let mut stack = Vec::new();
    let mut found = Vec::new();

    let index = |x: u32, y: u32| (y - start) as usize * width as usize + x as usize;

    for y in start..end {
        for x in 0..width {
            if visited[index(x, y)] || !is_white(binary, x, y) {
                continue;
            }

            visited[index(x, y)] = true;
            stack.push((x, y));
            let (mut min_x, mut min_y, mut max_x, mut max_y) = (x, y, x, y);
            let (mut area, mut sum_x, mut sum_y) = (0u32, 0u64, 0u64);

            while let Some((cx, cy)) = stack.pop() {
                area += 1;
                sum_x += cx as u64;
                sum_y += cy as u64;
                min_x = min_x.min(cx);
                min_y = min_y.min(cy);
                max_x = max_x.max(cx);
                max_y = max_y.max(cy);

                for ny in cy.saturating_sub(1)..=(cy + 1).min(end - 1) {
                    for nx in cx.saturating_sub(1)..=(cx + 1).min(width - 1) {
                        if ny < start {
                            continue;
                        }
                        let i = index(nx, ny);
                        if !visited[i] && is_white(binary, nx, ny) {
                            visited[i] = true;
                            stack.push((nx, ny));
                        }
                    }
                }
            }

            found.push(ComponentStats {
                label: 0,
                min_x,
                min_y,
                max_x,
                max_y,
                area,
                centroid: (
                    sum_x as f32 / area as f32,
                    sum_y as f32 / area as f32,
                ),
            });
        }
    }

    found
}

/// Label 8-connected white regions (red channel == 255) of a binary buffer.
///
/// Rows are split into `bands` horizontal bands labeled in parallel. A region
/// crossing a band boundary is reported once per band it touches. Results keep
/// band order and are relabeled `1..=n`.
pub fn label_components(binary: &PixelBuffer, bands: usize) -> (usize, Vec<ComponentStats>) {
    let (width, height) = binary.dimensions();
    if width == 0 || height == 0 {
        return (0, Vec::new());
    }

    let bands = bands.clamp(1, height as usize) as u32;
    let band_height = height / bands;

    let per_band: Vec<Vec<ComponentStats>> = (0..bands)
        .into_par_iter()
        .map(|band| {
            let start = band * band_height;
            let end = if band == bands - 1 {
                height
            } else {
                start + band_height
            };
            label_band(binary, start, end)
        })
        .collect();

    let components: Vec<ComponentStats> = per_band
        .into_iter()
        .flatten()
        .enumerate()
        .map(|(i, mut stats)| {
            stats.label = i as u32 + 1;
            stats
        })
        .collect();

    (components.len(), components)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn binary_with(w: u32, h: u32, white: impl IntoIterator<Item = (u32, u32)>) -> PixelBuffer {
        let mut buf = RgbImage::new(w, h);
        for (x, y) in white {
            buf.put_pixel(x, y, Rgb([255, 255, 255]));
        }
        buf
    }

    #[test]
    fn test_empty_image_has_no_components() {
        assert_eq!(label_components(&RgbImage::new(0, 0), 4), (0, vec![]));
        let (count, components) = label_components(&RgbImage::new(16, 16), 4);
        assert_eq!(count, 0);
        assert!(components.is_empty());
    }

    #[test]
    fn test_single_blob_area_and_centroid() {
        let pixels = (2..6).flat_map(|x| (3..7).map(move |y| (x, y)));
        let buf = binary_with(10, 10, pixels);

        let (count, components) = label_components(&buf, 1);
        assert_eq!(count, 1);
        let blob = &components[0];
        assert_eq!(blob.label, 1);
        assert_eq!(blob.area, 16);
        assert_eq!((blob.min_x, blob.min_y, blob.max_x, blob.max_y), (2, 3, 5, 6));
        assert_eq!((blob.width(), blob.height()), (4, 4));
        assert_eq!(blob.centroid, (3.5, 4.5));
    }

    #[test]
    fn test_diagonal_pixels_are_connected() {
        let buf = binary_with(4, 4, [(0, 0), (1, 1), (2, 2)]);
        let (count, components) = label_components(&buf, 1);
        assert_eq!(count, 1);
        assert_eq!(components[0].area, 3);
    }

    #[test]
    fn test_red_channel_must_be_saturated() {
        let mut buf = binary_with(4, 4, [(0, 0)]);
        buf.put_pixel(3, 3, Rgb([254, 255, 255]));
        let (count, _) = label_components(&buf, 1);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_band_boundary_splits_component() {
        let buf = binary_with(8, 8, (0..8).map(|y| (3, y)));

        let (whole, _) = label_components(&buf, 1);
        assert_eq!(whole, 1);

        let (count, components) = label_components(&buf, 2);
        assert_eq!(count, 2);
        assert_eq!(components[0].label, 1);
        assert_eq!((components[0].min_y, components[0].max_y), (0, 3));
        assert_eq!(components[1].label, 2);
        assert_eq!((components[1].min_y, components[1].max_y), (4, 7));
        assert!(components.iter().all(|c| c.area == 4));
    }

    #[test]
    fn test_last_band_takes_remainder_rows() {
        // 10 rows over 3 bands: 3, 3, 4
        let buf = binary_with(4, 10, [(0, 9), (2, 0)]);
        let (count, components) = label_components(&buf, 3);
        assert_eq!(count, 2);
        assert_eq!(components[0].min_y, 0);
        assert_eq!(components[1].min_y, 9);
    }
}

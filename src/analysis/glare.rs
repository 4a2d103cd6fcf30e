use super::components::{label_components, ComponentStats};
use super::pixel::{dilate, erode, threshold, to_grayscale, PixelBuffer};
use crate::config::AnalysisConfig;
use image::Rgb;
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use tracing::debug;

const OUTLINE: Rgb<u8> = Rgb([255, 0, 0]);

/// A component whose raw pixels are dominated by white
#[derive(Debug, Clone, PartialEq)]
pub struct GlareRegion {
    pub component: ComponentStats,
    pub white_proportion: f32,
}

/// Outcome of one glare pass
#[derive(Debug, Clone)]
pub struct GlareReport {
    /// Cleaned binary mask with every flagged region outlined in red
    pub annotated: PixelBuffer,
    pub is_glare: bool,
    pub regions: Vec<GlareRegion>,
}

/// Detects specular highlights: bright, compact, roughly square blobs whose
/// source pixels are nearly pure white.
#[derive(Debug, Clone)]
pub struct GlareDetector {
    config: AnalysisConfig,
}

impl GlareDetector {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn detect(&self, buf: &PixelBuffer) -> GlareReport {
        let cfg = &self.config;

        let gray = to_grayscale(buf);
        let binary = threshold(&gray, cfg.glare_brightness_threshold);
        let eroded = erode(&binary, cfg.morphology_iterations);
        let cleaned = dilate(&eroded, cfg.morphology_iterations);
        let (count, components) = label_components(&cleaned, cfg.label_bands);

        let mut annotated = cleaned;
        let mut regions = Vec::new();

        for component in components {
            let aspect = component.aspect_ratio();
            if aspect < cfg.glare_aspect_min
                || aspect > cfg.glare_aspect_max
                || component.area <= cfg.glare_min_area
            {
                continue;
            }

            let white_proportion = self.white_proportion(buf, &component);
            debug!(
                "Component {} area={} aspect={:.2} white={:.3}",
                component.label, component.area, aspect, white_proportion
            );
            if white_proportion > cfg.glare_dominance {
                draw_hollow_rect_mut(
                    &mut annotated,
                    Rect::at(component.min_x as i32, component.min_y as i32)
                        .of_size(component.width(), component.height()),
                    OUTLINE,
                );
                regions.push(GlareRegion {
                    component,
                    white_proportion,
                });
            }
        }

        debug!(
            "Glare pass: {} components, {} flagged",
            count,
            regions.len()
        );

        GlareReport {
            annotated,
            is_glare: !regions.is_empty(),
            regions,
        }
    }

    /// Fraction of raw pixels inside the component rectangle with every channel
    /// above the channel threshold
    fn white_proportion(&self, buf: &PixelBuffer, component: &ComponentStats) -> f32 {
        let level = self.config.glare_channel_threshold;
        let mut white = 0u32;
        for y in component.min_y..=component.max_y {
            for x in component.min_x..=component.max_x {
                let p = buf.get_pixel(x, y);
                if p[0] > level && p[1] > level && p[2] > level {
                    white += 1;
                }
            }
        }
        white as f32 / (component.width() * component.height()) as f32
    }
}

impl Default for GlareDetector {
    fn default() -> Self {
        Self::new(AnalysisConfig::default())
    }
}

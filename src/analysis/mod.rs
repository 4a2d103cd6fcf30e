mod components;
mod glare;
mod pixel;

pub use components::{label_components, ComponentStats};
pub use glare::{GlareDetector, GlareRegion, GlareReport};
pub use pixel::{
    average_brightness, crop, dilate, erode, is_too_dark, threshold, to_grayscale, PixelBuffer,
};

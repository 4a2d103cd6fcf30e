//! Stateless pixel routines. Every function returns a new buffer and leaves its
//! input untouched.

use crate::detection::BoundingBox;
use crate::error::AnalysisError;
use image::{GenericImageView, ImageBuffer, Rgb, RgbImage};

/// Owned row-major RGB8 image
pub type PixelBuffer = RgbImage;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

fn luminance(pixel: &Rgb<u8>) -> f32 {
    0.299 * pixel[0] as f32 + 0.587 * pixel[1] as f32 + 0.114 * pixel[2] as f32
}

/// Luminance replicated into all three channels
pub fn to_grayscale(buf: &PixelBuffer) -> PixelBuffer {
    ImageBuffer::from_fn(buf.width(), buf.height(), |x, y| {
        let gray = luminance(buf.get_pixel(x, y)) as u8;
        Rgb([gray, gray, gray])
    })
}

/// White where the red channel is at least `level`, black elsewhere
pub fn threshold(buf: &PixelBuffer, level: u8) -> PixelBuffer {
    ImageBuffer::from_fn(buf.width(), buf.height(), |x, y| {
        if buf.get_pixel(x, y)[0] >= level {
            WHITE
        } else {
            BLACK
        }
    })
}

#[derive(Clone, Copy)]
enum Morph {
    Erode,
    Dilate,
}

fn morph_pass(src: &PixelBuffer, op: Morph) -> PixelBuffer {
    let (w, h) = src.dimensions();
    if w < 3 || h < 3 {
        return src.clone();
    }

    ImageBuffer::from_fn(w, h, |x, y| {
        if x == 0 || y == 0 || x == w - 1 || y == h - 1 {
            return *src.get_pixel(x, y);
        }
        let mut value = src.get_pixel(x, y)[0];
        for ny in y - 1..=y + 1 {
            for nx in x - 1..=x + 1 {
                let n = src.get_pixel(nx, ny)[0];
                value = match op {
                    Morph::Erode => value.min(n),
                    Morph::Dilate => value.max(n),
                };
            }
        }
        Rgb([value, value, value])
    })
}

fn morph(buf: &PixelBuffer, iterations: u32, op: Morph) -> PixelBuffer {
    let mut out = buf.clone();
    for _ in 0..iterations {
        out = morph_pass(&out, op);
    }
    out
}

/// 3x3 minimum filter over interior pixels, repeated `iterations` times.
///
/// Border pixels are copied from the input; buffers narrower or shorter than
/// three pixels come back unchanged.
pub fn erode(buf: &PixelBuffer, iterations: u32) -> PixelBuffer {
    morph(buf, iterations, Morph::Erode)
}

/// 3x3 maximum filter, same border policy as [`erode`]
pub fn dilate(buf: &PixelBuffer, iterations: u32) -> PixelBuffer {
    morph(buf, iterations, Morph::Dilate)
}

/// Mean luminance, 0.0 for an empty buffer
pub fn average_brightness(buf: &PixelBuffer) -> f64 {
    let count = buf.width() as u64 * buf.height() as u64;
    if count == 0 {
        return 0.0;
    }
    let total: f64 = buf.pixels().map(|p| luminance(p) as f64).sum();
    total / count as f64
}

pub fn is_too_dark(buf: &PixelBuffer, threshold: f64) -> bool {
    average_brightness(buf) < threshold
}

/// Copy out the part of `buf` covered by `region`, clamped to the image
pub fn crop(buf: &PixelBuffer, region: &BoundingBox) -> Result<PixelBuffer, AnalysisError> {
    let clamped = region.clamped(buf.width(), buf.height());
    let x = clamped.left.floor() as u32;
    let y = clamped.top.floor() as u32;
    let right = clamped.right.ceil() as u32;
    let bottom = clamped.bottom.ceil() as u32;
    if right <= x || bottom <= y {
        return Err(AnalysisError::EmptyRegion);
    }
    Ok(buf.view(x, y, right - x, bottom - y).to_image())
}

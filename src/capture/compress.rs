use crate::analysis::{crop, PixelBuffer};
use crate::config::CompressionConfig;
use crate::detection::BoundingBox;
use crate::error::{CaptureError, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::ColorType;
use std::path::Path;
use tracing::debug;

/// JPEG ready for upload
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedImage {
    pub data: Vec<u8>,
    pub quality: u8,
    pub width: u32,
    pub height: u32,
}

impl CompressedImage {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Write the JPEG bytes to `path`
    pub async fn persist<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        tokio::fs::write(path.as_ref(), &self.data).await?;
        debug!(
            "Saved {} byte JPEG (q{}) to {}",
            self.len(),
            self.quality,
            path.as_ref().display()
        );
        Ok(())
    }
}

/// Crop the detected box with padding proportional to the still size, then
/// scale the crop back up to the still's width keeping its aspect ratio.
pub fn crop_and_upscale(
    still: &PixelBuffer,
    bbox: &BoundingBox,
    padding: f32,
) -> std::result::Result<PixelBuffer, CaptureError> {
    let (width, height) = still.dimensions();
    let region = bbox.expanded(width as f32 * padding, height as f32 * padding);
    let cropped = crop(still, &region).map_err(|_| CaptureError::CropOutOfBounds)?;

    let scale = width as f32 / cropped.width() as f32;
    let target_height = ((cropped.height() as f32 * scale) as u32).max(1);
    debug!(
        "Cropped {}x{} from {}x{}, upscaling to {}x{}",
        cropped.width(),
        cropped.height(),
        width,
        height,
        width,
        target_height
    );

    Ok(imageops::resize(&cropped, width, target_height, FilterType::Triangle))
}

fn encode_jpeg(image: &PixelBuffer, quality: u8) -> std::result::Result<Vec<u8>, CaptureError> {
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    encoder
        .encode(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)
        .map_err(|e| CaptureError::Compression {
            details: e.to_string(),
        })?;
    Ok(buf)
}

/// Graduated quality decrement based on how far `size` overshoots `target`
pub(crate) fn next_quality(quality: u8, size: usize, target: u64, floor: u8) -> u8 {
    let overshoot = size as f64 / target as f64;
    let step = if overshoot > 8.0 {
        30
    } else if overshoot > 4.0 {
        20
    } else if overshoot > 2.0 {
        15
    } else if overshoot > 1.5 {
        10
    } else {
        5
    };
    quality.saturating_sub(step).clamp(floor, 100)
}

/// Encode toward `target_bytes`.
///
/// A full quality encode is returned as-is when it already fits. Otherwise the
/// quality starts from the configured level (lower for very large rasters) and
/// steps down until the result fits or the floor quality has been tried; the
/// floor result is returned even if it is still too large.
pub fn compress(
    image: &PixelBuffer,
    config: &CompressionConfig,
) -> std::result::Result<CompressedImage, CaptureError> {
    compress_with(image, config, encode_jpeg)
}

fn compress_with<E>(
    image: &PixelBuffer,
    config: &CompressionConfig,
    mut encode: E,
) -> std::result::Result<CompressedImage, CaptureError>
where
    E: FnMut(&PixelBuffer, u8) -> std::result::Result<Vec<u8>, CaptureError>,
{
    let pack = |data: Vec<u8>, quality: u8| CompressedImage {
        data,
        quality,
        width: image.width(),
        height: image.height(),
    };

    let full = encode(image, 100)?;
    if (full.len() as u64) < config.target_bytes {
        return Ok(pack(full, 100));
    }

    let raw_size = image.as_raw().len() as u64;
    let mut quality = if raw_size > config.large_image_threshold_bytes {
        config.large_image_quality
    } else {
        config.initial_quality
    }
    .max(config.floor_quality);

    loop {
        let data = encode(image, quality)?;
        debug!("JPEG q{} -> {} bytes", quality, data.len());

        if data.len() as u64 <= config.target_bytes || quality <= config.floor_quality {
            return Ok(pack(data, quality));
        }
        quality = next_quality(quality, data.len(), config.target_bytes, config.floor_quality);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn noise(width: u32, height: u32) -> PixelBuffer {
        let mut state = 0x2545_f491u32;
        RgbImage::from_fn(width, height, |_, _| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let [r, g, b, _] = state.to_le_bytes();
            Rgb([r, g, b])
        })
    }

    #[test]
    fn test_quality_steps() {
        assert_eq!(next_quality(92, 9_000, 1_000, 75), 75);
        assert_eq!(next_quality(100, 5_000, 1_000, 0), 80);
        assert_eq!(next_quality(92, 2_500, 1_000, 75), 77);
        assert_eq!(next_quality(92, 1_800, 1_000, 75), 82);
        assert_eq!(next_quality(92, 1_200, 1_000, 75), 87);
        assert_eq!(next_quality(78, 1_200, 1_000, 75), 75);
    }

    #[test]
    fn test_small_image_kept_at_full_quality() {
        let image = RgbImage::from_pixel(64, 64, Rgb([120, 130, 140]));
        let out = compress(&image, &CompressionConfig::default()).unwrap();
        assert_eq!(out.quality, 100);
        assert_eq!((out.width, out.height), (64, 64));
        assert_eq!(&out.data[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_compression_respects_target_or_floor() {
        let image = noise(256, 256);
        let config = CompressionConfig {
            target_bytes: 40_000,
            ..CompressionConfig::default()
        };
        let out = compress(&image, &config).unwrap();
        assert!(out.quality <= config.initial_quality);
        assert!(out.quality >= config.floor_quality);
        assert!(out.len() as u64 <= config.target_bytes || out.quality == config.floor_quality);
    }

    #[test]
    fn test_unreachable_target_stops_at_floor() {
        let image = noise(128, 128);
        let config = CompressionConfig {
            target_bytes: 10,
            ..CompressionConfig::default()
        };
        let out = compress(&image, &config).unwrap();
        assert_eq!(out.quality, config.floor_quality);
        assert!(!out.is_empty());
    }

    /// Compress with the real encoder, recording each quality tried
    fn compress_traced(image: &PixelBuffer, config: &CompressionConfig) -> (CompressedImage, Vec<u8>) {
        let mut tried = Vec::new();
        let out = compress_with(image, config, |image, quality| {
            tried.push(quality);
            encode_jpeg(image, quality)
        })
        .unwrap();
        (out, tried)
    }

    fn assert_step_down(tried: &[u8], floor: u8) {
        for pair in tried[1..].windows(2) {
            let step = pair[0] - pair[1];
            assert!(
                [30, 20, 15, 10, 5].contains(&step) || pair[1] == floor,
                "unexpected step {:?}",
                pair
            );
        }
    }

    #[test]
    fn test_multi_megabyte_still_steps_down_to_target() {
        let config = CompressionConfig::default();

        // 9.2 MB raster, below the large image threshold
        let image = noise(1800, 1700);
        let (out, tried) = compress_traced(&image, &config);

        assert_eq!(tried[0], 100);
        assert_eq!(tried[1], config.initial_quality);
        assert_step_down(&tried, config.floor_quality);
        assert_eq!(tried.last(), Some(&out.quality));
        assert!(out.quality >= config.floor_quality);
        assert!(out.len() as u64 <= config.target_bytes || out.quality == config.floor_quality);
        assert_eq!((out.width, out.height), (1800, 1700));

        // 10.8 MB raster starts from the large image quality
        let image = noise(2000, 1800);
        let (out, tried) = compress_traced(&image, &config);

        assert_eq!(tried[1], config.large_image_quality);
        assert_step_down(&tried, config.floor_quality);
        assert!(tried.iter().all(|q| *q >= config.floor_quality));
        assert!(out.len() as u64 <= config.target_bytes || out.quality == config.floor_quality);
    }

    #[test]
    fn test_crop_and_upscale_dimensions() {
        let still = RgbImage::from_pixel(200, 100, Rgb([10, 20, 30]));
        let bbox = BoundingBox::new(50.0, 20.0, 150.0, 80.0).unwrap();
        let out = crop_and_upscale(&still, &bbox, 0.05).unwrap();
        // 120x70 crop scaled by 200/120
        assert_eq!(out.dimensions(), (200, 116));

        let outside = BoundingBox::new(300.0, 0.0, 320.0, 10.0).unwrap();
        assert!(matches!(
            crop_and_upscale(&still, &outside, 0.0),
            Err(CaptureError::CropOutOfBounds)
        ));
    }

    #[tokio::test]
    async fn test_persist_writes_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.jpg");
        let image = compress(
            &RgbImage::from_pixel(8, 8, Rgb([1, 2, 3])),
            &CompressionConfig::default(),
        )
        .unwrap();
        image.persist(&path).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), image.data);
    }
}

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ScanreadyConfig {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub proximity: ProximityConfig,
    #[serde(default)]
    pub zoom: ZoomConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnalysisConfig {
    /// Gray level at or above which a pixel counts as a glare candidate
    #[serde(default = "default_glare_brightness_threshold")]
    pub glare_brightness_threshold: u8,

    /// Minimum component area (pixels) considered for glare
    #[serde(default = "default_glare_min_area")]
    pub glare_min_area: u32,

    /// Per-channel level a raw pixel must exceed to count as white
    #[serde(default = "default_glare_channel_threshold")]
    pub glare_channel_threshold: u8,

    /// Fraction of white raw pixels inside a component box that flags glare
    #[serde(default = "default_glare_dominance")]
    pub glare_dominance: f32,

    /// Accepted component aspect ratio (width / height) range
    #[serde(default = "default_glare_aspect_min")]
    pub glare_aspect_min: f32,
    #[serde(default = "default_glare_aspect_max")]
    pub glare_aspect_max: f32,

    /// Erosion and dilation passes applied before labeling
    #[serde(default = "default_morphology_iterations")]
    pub morphology_iterations: u32,

    /// Horizontal bands used for parallel component labeling
    #[serde(default = "default_label_bands")]
    pub label_bands: usize,

    /// Average brightness below which the region is too dark
    #[serde(default = "default_darkness_threshold")]
    pub darkness_threshold: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProximityConfig {
    /// Relative object width at or below which the object is too far
    #[serde(default = "default_too_far_max")]
    pub too_far_max: f32,

    /// Relative object width at or above which the object is too close
    #[serde(default = "default_too_close_min")]
    pub too_close_min: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ZoomConfig {
    #[serde(default = "default_min_ratio")]
    pub min_ratio: f32,

    /// Upper bound for automatic zoom (further capped by the device)
    #[serde(default = "default_max_ratio")]
    pub max_ratio: f32,

    /// Neutral ratio applied on start and on session reset
    #[serde(default = "default_preferred_ratio")]
    pub preferred_ratio: f32,

    /// Ceiling applied when switching to manual zoom
    #[serde(default = "default_manual_ceiling")]
    pub manual_ceiling: f32,

    #[serde(default = "default_manual_step")]
    pub manual_step: f32,

    #[serde(default = "default_zoom_in_factor")]
    pub zoom_in_factor: f32,

    #[serde(default = "default_zoom_out_factor")]
    pub zoom_out_factor: f32,

    #[serde(default = "default_step_interval_ms")]
    pub step_interval_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CaptureConfig {
    /// Delay before clearing detection state after a frame without a code
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Settle time between focus completion and capture
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Wait after switching the flash off before processing the still
    #[serde(default = "default_flash_settle_ms")]
    pub flash_settle_ms: u64,

    /// Fractional padding applied to the cutout edges when testing framing
    #[serde(default = "default_cutout_padding")]
    pub cutout_padding: f32,

    /// Fractional padding (of image size) around the detected box when cropping
    #[serde(default = "default_crop_padding")]
    pub crop_padding: f32,

    /// Exposure compensation index requested when glare is detected
    #[serde(default = "default_glare_exposure_compensation")]
    pub glare_exposure_compensation: i32,

    /// Automatic return to scanning after an error (0 disables)
    #[serde(default)]
    pub auto_reset_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CompressionConfig {
    /// Target size of the uploaded JPEG in bytes
    #[serde(default = "default_target_bytes")]
    pub target_bytes: u64,

    /// Lowest JPEG quality the compression loop will use
    #[serde(default = "default_floor_quality")]
    pub floor_quality: u8,

    #[serde(default = "default_initial_quality")]
    pub initial_quality: u8,

    /// Starting quality for images whose raw size exceeds the threshold below
    #[serde(default = "default_large_image_quality")]
    pub large_image_quality: u8,

    #[serde(default = "default_large_image_threshold_bytes")]
    pub large_image_threshold_bytes: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UploadConfig {
    /// Code domains accepted for classification (`www.` is ignored)
    #[serde(default = "default_allowed_domains")]
    pub allowed_domains: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Orchestrator command queue depth
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
}

impl ScanreadyConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("scanready.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default(
                "analysis.glare_brightness_threshold",
                default_glare_brightness_threshold() as i64,
            )?
            .set_default("analysis.glare_min_area", default_glare_min_area() as i64)?
            .set_default(
                "analysis.glare_channel_threshold",
                default_glare_channel_threshold() as i64,
            )?
            .set_default("analysis.glare_dominance", default_glare_dominance() as f64)?
            .set_default("analysis.glare_aspect_min", default_glare_aspect_min() as f64)?
            .set_default("analysis.glare_aspect_max", default_glare_aspect_max() as f64)?
            .set_default(
                "analysis.morphology_iterations",
                default_morphology_iterations() as i64,
            )?
            .set_default("analysis.label_bands", default_label_bands() as i64)?
            .set_default("analysis.darkness_threshold", default_darkness_threshold())?
            .set_default("proximity.too_far_max", default_too_far_max() as f64)?
            .set_default("proximity.too_close_min", default_too_close_min() as f64)?
            .set_default("zoom.min_ratio", default_min_ratio() as f64)?
            .set_default("zoom.max_ratio", default_max_ratio() as f64)?
            .set_default("zoom.preferred_ratio", default_preferred_ratio() as f64)?
            .set_default("zoom.manual_ceiling", default_manual_ceiling() as f64)?
            .set_default("zoom.manual_step", default_manual_step() as f64)?
            .set_default("zoom.zoom_in_factor", default_zoom_in_factor() as f64)?
            .set_default("zoom.zoom_out_factor", default_zoom_out_factor() as f64)?
            .set_default("zoom.step_interval_ms", default_step_interval_ms() as i64)?
            .set_default("capture.debounce_ms", default_debounce_ms() as i64)?
            .set_default("capture.settle_ms", default_settle_ms() as i64)?
            .set_default("capture.flash_settle_ms", default_flash_settle_ms() as i64)?
            .set_default("capture.cutout_padding", default_cutout_padding() as f64)?
            .set_default("capture.crop_padding", default_crop_padding() as f64)?
            .set_default(
                "capture.glare_exposure_compensation",
                default_glare_exposure_compensation() as i64,
            )?
            .set_default("capture.auto_reset_ms", 0i64)?
            .set_default("compression.target_bytes", default_target_bytes() as i64)?
            .set_default("compression.floor_quality", default_floor_quality() as i64)?
            .set_default("compression.initial_quality", default_initial_quality() as i64)?
            .set_default(
                "compression.large_image_quality",
                default_large_image_quality() as i64,
            )?
            .set_default(
                "compression.large_image_threshold_bytes",
                default_large_image_threshold_bytes() as i64,
            )?
            .set_default("upload.allowed_domains", default_allowed_domains())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default("system.command_capacity", default_command_capacity() as i64)?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // SCANREADY_ZOOM__MAX_RATIO=2.5
            .add_source(
                Environment::with_prefix("SCANREADY")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: ScanreadyConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let analysis = &self.analysis;
        if !(0.0..=1.0).contains(&analysis.glare_dominance) {
            return Err(ConfigError::Message(
                "Glare dominance must be within [0, 1]".to_string(),
            ));
        }

        if analysis.glare_aspect_min <= 0.0 || analysis.glare_aspect_min > analysis.glare_aspect_max
        {
            return Err(ConfigError::Message(
                "Glare aspect range must be positive and ordered".to_string(),
            ));
        }

        if analysis.label_bands == 0 {
            return Err(ConfigError::Message(
                "Label bands must be greater than 0".to_string(),
            ));
        }

        let proximity = &self.proximity;
        if proximity.too_far_max <= 0.0 || proximity.too_far_max >= proximity.too_close_min {
            return Err(ConfigError::Message(
                "Proximity band must satisfy 0 < too_far_max < too_close_min".to_string(),
            ));
        }

        let zoom = &self.zoom;
        if zoom.min_ratio <= 0.0 || zoom.min_ratio > zoom.max_ratio {
            return Err(ConfigError::Message(
                "Zoom ratios must satisfy 0 < min_ratio <= max_ratio".to_string(),
            ));
        }

        if zoom.preferred_ratio < zoom.min_ratio || zoom.preferred_ratio > zoom.max_ratio {
            return Err(ConfigError::Message(
                "Preferred zoom ratio must lie within [min_ratio, max_ratio]".to_string(),
            ));
        }

        if zoom.zoom_in_factor <= 1.0 || zoom.zoom_out_factor >= 1.0 || zoom.zoom_out_factor <= 0.0
        {
            return Err(ConfigError::Message(
                "Zoom factors must satisfy in > 1 and 0 < out < 1".to_string(),
            ));
        }

        if zoom.manual_ceiling < zoom.min_ratio {
            return Err(ConfigError::Message(
                "Manual zoom ceiling must not be below min_ratio".to_string(),
            ));
        }

        if zoom.step_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Zoom step interval must be greater than 0".to_string(),
            ));
        }

        let capture = &self.capture;
        if capture.settle_ms == 0 || capture.debounce_ms == 0 {
            return Err(ConfigError::Message(
                "Capture settle and debounce delays must be greater than 0".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&capture.cutout_padding) || !(0.0..0.5).contains(&capture.crop_padding)
        {
            return Err(ConfigError::Message(
                "Cutout padding must be within [0, 1) and crop padding within [0, 0.5)"
                    .to_string(),
            ));
        }

        let compression = &self.compression;
        if compression.target_bytes == 0 {
            return Err(ConfigError::Message(
                "Compression target must be greater than 0".to_string(),
            ));
        }

        if compression.floor_quality == 0
            || compression.floor_quality > compression.initial_quality
            || compression.initial_quality > 100
            || compression.large_image_quality > 100
        {
            return Err(ConfigError::Message(
                "JPEG qualities must satisfy 0 < floor <= initial <= 100".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 || self.system.command_capacity == 0 {
            return Err(ConfigError::Message(
                "Channel capacities must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl ZoomConfig {
    pub fn step_interval(&self) -> Duration {
        Duration::from_millis(self.step_interval_ms)
    }
}

impl CaptureConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn flash_settle(&self) -> Duration {
        Duration::from_millis(self.flash_settle_ms)
    }

    pub fn auto_reset(&self) -> Option<Duration> {
        (self.auto_reset_ms > 0).then(|| Duration::from_millis(self.auto_reset_ms))
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            glare_brightness_threshold: default_glare_brightness_threshold(),
            glare_min_area: default_glare_min_area(),
            glare_channel_threshold: default_glare_channel_threshold(),
            glare_dominance: default_glare_dominance(),
            glare_aspect_min: default_glare_aspect_min(),
            glare_aspect_max: default_glare_aspect_max(),
            morphology_iterations: default_morphology_iterations(),
            label_bands: default_label_bands(),
            darkness_threshold: default_darkness_threshold(),
        }
    }
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            too_far_max: default_too_far_max(),
            too_close_min: default_too_close_min(),
        }
    }
}

impl Default for ZoomConfig {
    fn default() -> Self {
        Self {
            min_ratio: default_min_ratio(),
            max_ratio: default_max_ratio(),
            preferred_ratio: default_preferred_ratio(),
            manual_ceiling: default_manual_ceiling(),
            manual_step: default_manual_step(),
            zoom_in_factor: default_zoom_in_factor(),
            zoom_out_factor: default_zoom_out_factor(),
            step_interval_ms: default_step_interval_ms(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            settle_ms: default_settle_ms(),
            flash_settle_ms: default_flash_settle_ms(),
            cutout_padding: default_cutout_padding(),
            crop_padding: default_crop_padding(),
            glare_exposure_compensation: default_glare_exposure_compensation(),
            auto_reset_ms: 0,
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            target_bytes: default_target_bytes(),
            floor_quality: default_floor_quality(),
            initial_quality: default_initial_quality(),
            large_image_quality: default_large_image_quality(),
            large_image_threshold_bytes: default_large_image_threshold_bytes(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            allowed_domains: default_allowed_domains(),
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            event_bus_capacity: default_event_bus_capacity(),
            command_capacity: default_command_capacity(),
        }
    }
}

// Default value functions
fn default_glare_brightness_threshold() -> u8 {
    254
}
fn default_glare_min_area() -> u32 {
    300
}
fn default_glare_channel_threshold() -> u8 {
    200
}
fn default_glare_dominance() -> f32 {
    0.85
}
fn default_glare_aspect_min() -> f32 {
    0.6
}
fn default_glare_aspect_max() -> f32 {
    2.25
}
fn default_morphology_iterations() -> u32 {
    2
}
fn default_label_bands() -> usize {
    4
}
fn default_darkness_threshold() -> f64 {
    110.0
}

fn default_too_far_max() -> f32 {
    0.31
}
fn default_too_close_min() -> f32 {
    0.45
}

fn default_min_ratio() -> f32 {
    2.0
}
fn default_max_ratio() -> f32 {
    3.0
}
fn default_preferred_ratio() -> f32 {
    3.0
}
fn default_manual_ceiling() -> f32 {
    4.0
}
fn default_manual_step() -> f32 {
    0.5
}
fn default_zoom_in_factor() -> f32 {
    1.05
}
fn default_zoom_out_factor() -> f32 {
    0.96
}
fn default_step_interval_ms() -> u64 {
    20
}

fn default_debounce_ms() -> u64 {
    200
}
fn default_settle_ms() -> u64 {
    1000
}
fn default_flash_settle_ms() -> u64 {
    100
}
fn default_cutout_padding() -> f32 {
    0.10
}
fn default_crop_padding() -> f32 {
    0.05
}
fn default_glare_exposure_compensation() -> i32 {
    -5
}

fn default_target_bytes() -> u64 {
    1_572_864 // 1.5 MiB
}
fn default_floor_quality() -> u8 {
    75
}
fn default_initial_quality() -> u8 {
    92
}
fn default_large_image_quality() -> u8 {
    85
}
fn default_large_image_threshold_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_allowed_domains() -> Vec<String> {
    vec![
        "qtru.st".to_string(),
        "ahm.to".to_string(),
        "qtr.pw".to_string(),
    ]
}

fn default_event_bus_capacity() -> usize {
    100
}
fn default_command_capacity() -> usize {
    64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ScanreadyConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.analysis.glare_brightness_threshold, 254);
        assert_eq!(config.zoom.step_interval(), Duration::from_millis(20));
        assert_eq!(config.capture.auto_reset(), None);
    }

    #[test]
    fn test_config_validation() {
        let mut config = ScanreadyConfig::default();

        config.proximity.too_far_max = 0.5; // Above too_close_min
        assert!(config.validate().is_err());
        config.proximity.too_far_max = 0.31;

        config.zoom.min_ratio = 3.5;
        assert!(config.validate().is_err());
        config.zoom.min_ratio = 2.0;

        config.zoom.preferred_ratio = 3.5;
        assert!(config.validate().is_err());
        config.zoom.preferred_ratio = 1.5;
        assert!(config.validate().is_err());
        config.zoom.preferred_ratio = 2.0;

        config.compression.floor_quality = 95;
        assert!(config.validate().is_err());
        config.compression.floor_quality = 75;

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[zoom]\nmax_ratio = 2.5\n\n[capture]\nsettle_ms = 500\nauto_reset_ms = 1500"
        )
        .unwrap();

        let config = ScanreadyConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.zoom.max_ratio, 2.5);
        assert_eq!(config.zoom.min_ratio, 2.0);
        assert_eq!(config.capture.settle(), Duration::from_millis(500));
        assert_eq!(config.capture.auto_reset(), Some(Duration::from_millis(1500)));
        assert_eq!(config.upload.allowed_domains.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_serializes_to_toml() {
        let rendered = toml::to_string_pretty(&ScanreadyConfig::default()).unwrap();
        assert!(rendered.contains("[analysis]"));
        assert!(rendered.contains("glare_min_area = 300"));

        let parsed: ScanreadyConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.compression.floor_quality, 75);
    }
}

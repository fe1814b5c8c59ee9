//! Application Configuration
//!
//! Operator settings (model locations, engine thresholds, logging) stored in
//! TOML format. Page behaviour itself is fixed and not configurable here.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Model storage and download settings
    pub models: ModelSettings,
    /// Text recognition engine settings
    pub ocr: OcrSettings,
    /// Object detection engine settings
    pub detection: DetectionSettings,
    /// Canvas rendering settings
    pub render: RenderSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

/// Where models live and how they are fetched
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Override for the models directory (defaults to the data dir)
    pub dir: Option<PathBuf>,
    /// Refuse network downloads
    pub offline: bool,
    /// Download URL for the object detection model (YOLOv8-style ONNX export)
    pub detector_url: Option<String>,
    /// Try GPU execution providers before falling back to CPU
    pub use_gpu: bool,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            dir: None,
            offline: false,
            detector_url: None,
            use_gpu: false,
        }
    }
}

/// PaddleOCR pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Longest side the detection model sees
    pub det_target_size: u32,
    /// Probability map binarisation threshold
    pub det_threshold: f32,
    /// Minimum mean probability for a text box
    pub box_threshold: f32,
    /// Box expansion ratio applied to detected regions
    pub unclip_ratio: f32,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            det_target_size: 960,
            det_threshold: 0.3,
            box_threshold: 0.6,
            unclip_ratio: 1.5,
        }
    }
}

/// Object detector tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Square model input size in pixels
    pub input_size: u32,
    /// Minimum class score for a prediction (0.0 - 1.0)
    pub score_threshold: f32,
    /// IoU above which overlapping boxes of one class are suppressed
    pub iou_threshold: f32,
    /// Maximum number of predictions returned
    pub max_detections: usize,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            input_size: 640,
            score_threshold: 0.5,
            iou_threshold: 0.5,
            max_detections: 20,
        }
    }
}

/// Canvas rendering settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// TrueType font used for detection labels (system fonts are searched if unset)
    pub font_path: Option<PathBuf>,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive, overridden by RUST_LOG
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file {:?}", path))?;
    Ok(())
}

/// Load the configuration at `path`, writing the defaults there first if the
/// file does not exist yet
pub fn load_or_create_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        return load_config(path);
    }

    let config = AppConfig::default();
    save_config(&config, path)?;
    Ok(config)
}

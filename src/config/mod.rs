//! Application Configuration
//!
//! User settings and preferences stored in TOML format. Every section has
//! defaults, so a config file only needs the keys it changes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::overlay::draw::BoxStyle;
use crate::vision::postprocess::DbParams;
use crate::vision::PaddleOcrConfig;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Capture settings
    pub capture: CaptureSettings,
    /// OCR settings
    pub vision: VisionSettings,
    /// Annotation settings
    pub overlay: OverlaySettings,
    /// Window settings
    pub display: DisplaySettings,
}

/// Capture-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Device index, device path, file path or stream URL
    pub source: String,
    /// Requested frame width
    pub width: u32,
    /// Requested frame height
    pub height: u32,
    /// ffmpeg executable, looked up on PATH when not absolute
    pub ffmpeg_path: PathBuf,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            source: "0".to_string(),
            width: 640,
            height: 480,
            ffmpeg_path: PathBuf::from("ffmpeg"),
        }
    }
}

/// OCR-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionSettings {
    /// Frames are resized to this width before recognition
    pub processing_width: u32,
    /// Use the CUDA execution provider when available
    pub use_gpu: bool,
    /// Recognition languages
    pub languages: Vec<String>,
    /// Drop readings below this confidence (0.0 - 1.0); 0.0 keeps every reading
    pub min_confidence: f32,
    /// Pixel probability above which a pixel counts as text
    pub det_threshold: f32,
    /// Minimum mean probability for a text region
    pub box_threshold: f32,
    /// How far detected regions are grown back out
    pub unclip_ratio: f32,
    /// Model cache directory, defaults to the platform data dir
    pub models_dir: Option<PathBuf>,
}

impl Default for VisionSettings {
    fn default() -> Self {
        let db = DbParams::default();
        Self {
            processing_width: 640,
            use_gpu: true,
            languages: vec!["en".to_string()],
            min_confidence: 0.0,
            det_threshold: db.threshold,
            box_threshold: db.box_threshold,
            unclip_ratio: db.unclip_ratio,
            models_dir: None,
        }
    }
}

impl VisionSettings {
    /// OCR engine configuration for these settings
    pub fn ocr_config(&self) -> PaddleOcrConfig {
        PaddleOcrConfig {
            languages: self.languages.clone(),
            use_gpu: self.use_gpu,
            min_confidence: self.min_confidence,
            db: DbParams {
                threshold: self.det_threshold,
                box_threshold: self.box_threshold,
                unclip_ratio: self.unclip_ratio,
                ..DbParams::default()
            },
            ..PaddleOcrConfig::default()
        }
    }
}

/// Annotation-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    /// Box and label color [R, G, B]
    pub color: [u8; 3],
    /// Box outline thickness in pixels
    pub thickness: u32,
    /// Gap between a label and the top of its box
    pub label_offset: i32,
    /// Label glyph height in pixels
    pub font_scale: f32,
    /// TrueType font for labels, system fonts are tried when unset
    pub font_path: Option<PathBuf>,
    /// JPEG quality of annotated frames (1 - 100)
    pub jpeg_quality: u8,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        let style = BoxStyle::default();
        Self {
            color: style.color,
            thickness: style.thickness,
            label_offset: style.label_offset,
            font_scale: style.font_scale,
            font_path: None,
            jpeg_quality: 90,
        }
    }
}

impl OverlaySettings {
    pub fn box_style(&self) -> BoxStyle {
        BoxStyle {
            color: self.color,
            thickness: self.thickness,
            label_offset: self.label_offset,
            font_scale: self.font_scale,
        }
    }
}

/// Window settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    /// Title of the camera window
    pub window_title: String,
    /// Show the recognized plates below the image
    pub show_plate_list: bool,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            window_title: "ANPR Camera".to_string(),
            show_plate_list: true,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Load `path`, or the default config file when `path` is `None`
///
/// An explicitly given file must exist and parse. A missing default file is
/// created from the built-in defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => {
            load_config(path).with_context(|| format!("Failed to load config {:?}", path))
        }
        None => load_or_create(&crate::storage::get_config_dir()?.join("config.toml")),
    }
}

/// Load `path`, writing the defaults there first if it does not exist
///
/// Failing to write the file is not an error; the defaults are still used.
pub fn load_or_create(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        info!("Loading config from {:?}", path);
        return load_config(path).with_context(|| format!("Failed to load config {:?}", path));
    }

    let config = AppConfig::default();
    match save_config(&config, path) {
        Ok(()) => info!("No config file found, wrote defaults to {:?}", path),
        Err(e) => warn!("No config file found, could not write {:?}: {:#}", path, e),
    }
    Ok(config)
}

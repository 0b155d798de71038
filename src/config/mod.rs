//! Application Configuration
//!
//! Inspection settings stored in TOML format.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::analysis::fusion::FusionSettings;
use crate::capture::CaptureSettings;
use crate::vision::codes::CodeSettings;
use crate::vision::locate::LocatorSettings;
use crate::vision::preprocess::PreprocessSettings;
use crate::vision::rectify::RectifySettings;
use crate::vision::tesseract::TesseractSettings;
use crate::vision::text::TextSettings;
use crate::vision::yolo::ModelSettings;
use crate::vision::OcrBackend;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Session settings
    pub inspection: InspectionSettings,
    /// Photometric preprocessing
    pub preprocess: PreprocessSettings,
    /// Label localization
    pub locator: LocatorSettings,
    /// Perspective correction
    pub rectify: RectifySettings,
    /// Text region filtering
    pub text: TextSettings,
    /// Barcode and object filtering
    pub codes: CodeSettings,
    /// Confidence scoring
    pub fusion: FusionSettings,
    /// Frame acquisition
    pub capture: CaptureSettings,
    /// Catalog and result files
    pub storage: StorageSettings,
    /// OCR backend
    pub ocr: OcrSettings,
    /// Text region and object detector models
    pub models: ModelSettings,
}

/// Validation session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectionSettings {
    /// Attempts per armed label before the session is exhausted
    pub max_attempts: u32,
    /// Keywords used when no label is armed or the armed entry has none
    pub default_keywords: Vec<String>,
}

impl Default for InspectionSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            default_keywords: Vec::new(),
        }
    }
}

/// File locations; relative paths resolve against the working directory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Reference catalog JSON file
    pub catalog_path: Option<PathBuf>,
    /// JSON-lines file receiving every inspection result
    pub results_path: Option<PathBuf>,
}

/// OCR backend selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    pub backend: OcrBackend,
    /// Upright each region with the backend's orientation detection before OCR
    pub detect_orientation: bool,
    #[serde(flatten)]
    pub tesseract: TesseractSettings,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            backend: OcrBackend::default(),
            detect_orientation: true,
            tesseract: TesseractSettings::default(),
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
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

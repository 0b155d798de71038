//! OCR and orientation backed by the `tesseract` executable
//!
//! Each call writes the region to a temporary PNG and reads tesseract's
//! stdout. Nothing is retried; a failing call degrades only the region it
//! was made for.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capture::frame::{Frame, PixelFormat};
use crate::vision::backends::{OcrEngine, OrientationEstimator};

/// Tesseract invocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseractSettings {
    /// Path to or name of the executable
    pub tesseract_path: PathBuf,
    /// `--psm` for recognition
    pub page_segmentation_mode: u8,
    /// `--oem`
    pub engine_mode: u8,
}

impl Default for TesseractSettings {
    fn default() -> Self {
        Self {
            tesseract_path: PathBuf::from("tesseract"),
            page_segmentation_mode: 6,
            engine_mode: 3,
        }
    }
}

/// Runs the tesseract command line tool
#[derive(Debug, Clone, Default)]
pub struct TesseractCli {
    settings: TesseractSettings,
}

impl TesseractCli {
    pub fn new(settings: TesseractSettings) -> Self {
        Self { settings }
    }

    fn write_png(region: &Frame, dir: &Path) -> Result<PathBuf> {
        let path = dir.join("region.png");
        match region.format() {
            PixelFormat::Gray8 => region.to_gray().save(&path),
            _ => region.to_rgb().save(&path),
        }
        .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    fn run(&self, region: &Frame, args: &[&str]) -> Result<String> {
        if region.is_empty() {
            bail!("empty region");
        }

        let dir = tempfile::tempdir().context("Failed to create temp dir for OCR")?;
        let input = Self::write_png(region, dir.path())?;

        let output = Command::new(&self.settings.tesseract_path)
            .arg(&input)
            .arg("stdout")
            .args(args)
            .output()
            .with_context(|| format!("Failed to run {}", self.settings.tesseract_path.display()))?;

        if !output.status.success() {
            bail!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl OcrEngine for TesseractCli {
    fn recognize(&self, region: &Frame, language_hint: &str) -> Result<String> {
        let oem = self.settings.engine_mode.to_string();
        let psm = self.settings.page_segmentation_mode.to_string();
        let mut args = vec!["--oem", oem.as_str(), "--psm", psm.as_str()];
        if !language_hint.is_empty() {
            args.extend(["-l", language_hint]);
        }

        let text = self.run(region, &args)?;
        debug!("tesseract read {} chars", text.len());
        Ok(text)
    }
}

impl OrientationEstimator for TesseractCli {
    fn estimate(&self, region: &Frame) -> Result<f32> {
        let report = self.run(region, &["--psm", "0"])?;
        parse_rotate(&report).context("No rotation in orientation report")
    }
}

/// Extract the `Rotate: N` value from an orientation report
pub fn parse_rotate(report: &str) -> Option<f32> {
    report
        .lines()
        .find_map(|line| line.trim().strip_prefix("Rotate:"))
        .and_then(|value| value.trim().parse::<f32>().ok())
}

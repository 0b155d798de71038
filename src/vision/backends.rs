//! Collaborator interfaces for the extraction stages
//!
//! Detector inference, character recognition and symbol decoding are
//! provided by external engines. The pipeline only sees these traits, so a
//! backend can be swapped without touching the stages that call it.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::capture::frame::Frame;
use crate::vision::geometry::Rectangle;

/// Candidate text-bearing box from a detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextCandidate {
    pub bbox: Rectangle,
    pub confidence: f32,
    pub class_id: u32,
}

/// Decoded barcode symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedBarcode {
    /// Symbology name, e.g. "EAN13" or "CODE128"
    pub symbology: String,
    pub data: String,
    pub bbox: Rectangle,
    /// Outline points as reported by the decoder
    #[serde(default)]
    pub polygon: Vec<(i32, i32)>,
}

/// Generic object detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectCandidate {
    pub bbox: Rectangle,
    pub confidence: f32,
    pub class_label: String,
}

/// Finds text-bearing sub-regions of a frame
pub trait TextRegionDetector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Vec<TextCandidate>>;

    fn name(&self) -> &'static str {
        short_type_name::<Self>()
    }
}

/// Recognizes the characters in a frame region
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, region: &Frame, language_hint: &str) -> Result<String>;

    fn name(&self) -> &'static str {
        short_type_name::<Self>()
    }
}

/// Estimates the counter-clockwise rotation (degrees) that makes a region upright
pub trait OrientationEstimator: Send + Sync {
    fn estimate(&self, region: &Frame) -> Result<f32>;

    fn name(&self) -> &'static str {
        short_type_name::<Self>()
    }
}

/// Decodes barcodes in a grayscale frame
pub trait BarcodeDecoder: Send + Sync {
    fn decode(&self, frame: &Frame) -> Result<Vec<DecodedBarcode>>;

    fn name(&self) -> &'static str {
        short_type_name::<Self>()
    }
}

/// Detects generic objects
pub trait ObjectDetector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Vec<ObjectCandidate>>;

    fn name(&self) -> &'static str {
        short_type_name::<Self>()
    }
}

/// Type name without its module path, used to report the wired backends
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

/// Treats the whole frame as a single text region
///
/// Used when no detector model is configured, so OCR still runs over the
/// rectified label.
#[derive(Debug, Clone, Copy, Default)]
pub struct WholeFrameTextDetector;

impl TextRegionDetector for WholeFrameTextDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<TextCandidate>> {
        if frame.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![TextCandidate {
            bbox: Rectangle::new(0, 0, frame.width(), frame.height()),
            confidence: 1.0,
            class_id: 0,
        }])
    }
}

/// Reports every region as already upright
#[derive(Debug, Clone, Copy, Default)]
pub struct UprightOrientation;

impl OrientationEstimator for UprightOrientation {
    fn estimate(&self, _region: &Frame) -> Result<f32> {
        Ok(0.0)
    }
}

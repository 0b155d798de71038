//! Vision Layer
//!
//! Per-frame image stages of the inspection pipeline:
//! - Photometric preprocessing
//! - Label localization and perspective rectification
//! - Text, barcode and object extraction through pluggable backends

pub mod annotate;
pub mod backends;
pub mod barcode;
pub mod codes;
pub mod geometry;
pub mod locate;
pub mod preprocess;
pub mod rectify;
pub mod tesseract;
pub mod text;
pub mod yolo;

pub use barcode::RxingBarcodeDecoder;
pub use backends::{
    BarcodeDecoder, DecodedBarcode, ObjectCandidate, ObjectDetector, OcrEngine, OrientationEstimator,
    TextCandidate, TextRegionDetector, UprightOrientation, WholeFrameTextDetector,
};
pub use codes::{CodeAndObjectExtractor, CodeExtraction, CodeSettings};
pub use geometry::Rectangle;
pub use locate::{LocatorSettings, RegionLocator};
pub use preprocess::{FramePreprocessor, FrameQuality, PreprocessSettings};
pub use rectify::{Homography, PerspectiveRectifier, RectifySettings};
pub use tesseract::{TesseractCli, TesseractSettings};
pub use text::{TextExtraction, TextExtractor, TextRegion, TextSettings};
pub use yolo::{ModelSettings, YoloDetector};

use crate::error::StageFailure;

/// OCR backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrBackend {
    /// No OCR; text modality always comes back empty
    #[default]
    None,
    /// The `tesseract` command line tool
    Tesseract,
}

/// Barcode backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarcodeBackend {
    /// No decoding; the barcode modality always comes back empty
    None,
    /// The rxing multi-format decoder
    #[default]
    Rxing,
}

/// Result of a stage that degrades instead of failing
///
/// `value` is always usable. When the stage could not do its work, `value`
/// is the stage's fallback and `cause` says why.
#[derive(Debug, Clone)]
pub struct StageOutput<T> {
    pub value: T,
    pub cause: Option<StageFailure>,
}

impl<T> StageOutput<T> {
    pub fn ok(value: T) -> Self {
        Self { value, cause: None }
    }

    pub fn degraded(value: T, cause: StageFailure) -> Self {
        Self {
            value,
            cause: Some(cause),
        }
    }

    /// Split into the value and its recorded cause
    pub fn into_parts(self) -> (T, Option<StageFailure>) {
        (self.value, self.cause)
    }
}

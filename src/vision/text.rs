//! Text region detection and OCR orchestration

use image::{ImageBuffer, Pixel};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::capture::frame::{Frame, PixelFormat};
use crate::error::{Modality, StageFailure};
use crate::vision::backends::{OcrEngine, OrientationEstimator, TextCandidate, TextRegionDetector};
use crate::vision::geometry::Rectangle;
use crate::vision::StageOutput;

/// Text extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextSettings {
    /// Minimum candidate box area in pixels
    pub min_area: u64,
    /// Minimum width/height ratio
    pub min_aspect: f32,
    /// Maximum width/height ratio
    pub max_aspect: f32,
    /// Detector confidence floor
    pub min_confidence: f32,
    /// Pixels added around each box before OCR
    pub padding: u32,
    /// Language hint passed to the OCR engine
    pub language: String,
}

impl Default for TextSettings {
    fn default() -> Self {
        Self {
            min_area: 100,
            min_aspect: 0.1,
            max_aspect: 10.0,
            min_confidence: 0.4,
            padding: 5,
            language: "swe+eng".to_string(),
        }
    }
}

/// Recognized text of one region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRegion {
    pub text: String,
    /// Detector box in frame coordinates
    pub bbox: Rectangle,
    pub confidence: f32,
    /// Counter-clockwise correction applied before OCR, in degrees
    pub angle: f32,
}

/// All text read from a frame, in reading order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextExtraction {
    /// Region texts joined top to bottom with newlines
    pub full_text: String,
    pub regions: Vec<TextRegion>,
}

/// Detects text regions, uprights them and runs OCR on each
pub struct TextExtractor {
    detector: Box<dyn TextRegionDetector>,
    ocr: Box<dyn OcrEngine>,
    orientation: Box<dyn OrientationEstimator>,
    settings: TextSettings,
}

impl TextExtractor {
    pub fn new(
        detector: Box<dyn TextRegionDetector>,
        ocr: Box<dyn OcrEngine>,
        orientation: Box<dyn OrientationEstimator>,
        settings: TextSettings,
    ) -> Self {
        Self {
            detector,
            ocr,
            orientation,
            settings,
        }
    }

    pub fn settings(&self) -> &TextSettings {
        &self.settings
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    pub fn ocr_name(&self) -> &'static str {
        self.ocr.name()
    }

    pub fn orientation_name(&self) -> &'static str {
        self.orientation.name()
    }

    /// Extract text, yielding an empty result when detection fails
    pub fn extract(&self, frame: &Frame) -> StageOutput<TextExtraction> {
        match self.try_extract(frame) {
            Ok(extraction) => StageOutput::ok(extraction),
            Err(cause) => {
                warn!("Text extraction degraded: {}", cause);
                StageOutput::degraded(TextExtraction::default(), cause)
            }
        }
    }

    /// Extract text from a frame
    ///
    /// An empty frame yields an empty extraction. Only a detector failure is
    /// an error; a region whose OCR fails is left out.
    pub fn try_extract(&self, frame: &Frame) -> Result<TextExtraction, StageFailure> {
        if frame.is_empty() {
            return Ok(TextExtraction::default());
        }

        let candidates = self
            .detector
            .detect(frame)
            .map_err(|e| StageFailure::degraded(Modality::Text, format!("detector failed: {:#}", e)))?;

        let total = candidates.len();
        let mut accepted: Vec<TextCandidate> = candidates
            .into_iter()
            .filter(|c| self.accepts(c))
            .collect();
        // Stable, so equal tops keep detector order
        accepted.sort_by_key(|c| c.bbox.y);

        debug!("{} of {} text candidates passed filtering", accepted.len(), total);

        let mut regions = Vec::with_capacity(accepted.len());
        for candidate in accepted {
            if let Some(region) = self.read_region(frame, &candidate) {
                regions.push(region);
            }
        }

        let full_text = regions
            .iter()
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        Ok(TextExtraction { full_text, regions })
    }

    /// Area, aspect and confidence filter, all bounds inclusive
    fn accepts(&self, candidate: &TextCandidate) -> bool {
        let aspect = candidate.bbox.aspect_ratio();
        candidate.bbox.area() >= self.settings.min_area
            && aspect >= self.settings.min_aspect
            && aspect <= self.settings.max_aspect
            && candidate.confidence >= self.settings.min_confidence
    }

    fn read_region(&self, frame: &Frame, candidate: &TextCandidate) -> Option<TextRegion> {
        let window = candidate
            .bbox
            .padded(self.settings.padding, frame.width(), frame.height());
        if !window.is_valid() {
            return None;
        }
        let crop = frame.crop(&window);

        let angle = match self.orientation.estimate(&crop) {
            Ok(angle) => angle,
            Err(e) => {
                debug!("Orientation estimate failed, assuming upright: {:#}", e);
                0.0
            }
        };
        let upright = if angle != 0.0 { rotate(&crop, angle) } else { crop };

        let raw = match self.ocr.recognize(&upright, &self.settings.language) {
            Ok(text) => text,
            Err(e) => {
                warn!("OCR failed for region {:?}: {:#}", candidate.bbox, e);
                return None;
            }
        };

        let text = clean_text(&raw);
        if text.chars().count() <= 1 {
            return None;
        }

        Some(TextRegion {
            text,
            bbox: candidate.bbox,
            confidence: candidate.confidence,
            angle,
        })
    }
}

/// Keep alphanumerics and whitespace, then collapse whitespace runs
pub fn clean_text(raw: &str) -> String {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Rotate counter-clockwise about the center, keeping the size
///
/// Pixels mapped from outside the crop repeat the nearest edge pixel, so dark
/// text next to the border does not pick up a white band.
fn rotate(frame: &Frame, degrees: f32) -> Frame {
    match frame.format() {
        PixelFormat::Gray8 => Frame::from_gray(rotate_replicate(&frame.to_gray(), degrees)),
        _ => Frame::from_rgb(rotate_replicate(&frame.to_rgb(), degrees)),
    }
}

/// Inverse-mapped bilinear rotation with clamped source coordinates
fn rotate_replicate<P: Pixel<Subpixel = u8>>(
    image: &ImageBuffer<P, Vec<u8>>,
    degrees: f32,
) -> ImageBuffer<P, Vec<u8>> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let (sin, cos) = degrees.to_radians().sin_cos();
    let cx = (width / 2) as f32;
    let cy = (height / 2) as f32;
    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;
    let channels = P::CHANNEL_COUNT as usize;

    ImageBuffer::from_fn(width, height, |x, y| {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        let sx = (cos * dx - sin * dy + cx).clamp(0.0, max_x);
        let sy = (sin * dx + cos * dy + cy).clamp(0.0, max_y);

        let x0 = sx.floor() as u32;
        let y0 = sy.floor() as u32;
        let x1 = (x0 + 1).min(width - 1);
        let y1 = (y0 + 1).min(height - 1);
        let fx = sx - x0 as f32;
        let fy = sy - y0 as f32;

        let tl = image.get_pixel(x0, y0).channels();
        let tr = image.get_pixel(x1, y0).channels();
        let bl = image.get_pixel(x0, y1).channels();
        let br = image.get_pixel(x1, y1).channels();

        let mut out = [0u8; 4];
        for c in 0..channels {
            let top = tl[c] as f32 * (1.0 - fx) + tr[c] as f32 * fx;
            let bottom = bl[c] as f32 * (1.0 - fx) + br[c] as f32 * fx;
            out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
        }
        *P::from_slice(&out[..channels])
    })
}

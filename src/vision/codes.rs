//! Barcode decoding and object detection over the rectified label

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::capture::frame::Frame;
use crate::error::{Modality, StageFailure};
use crate::inspection::record::DetectionRecord;
use crate::vision::backends::{BarcodeDecoder, ObjectDetector};
use crate::vision::BarcodeBackend;

/// Barcode/object extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeSettings {
    pub barcode_backend: BarcodeBackend,
    /// Object hits below this confidence are discarded
    pub object_confidence_threshold: f32,
}

impl Default for CodeSettings {
    fn default() -> Self {
        Self {
            barcode_backend: BarcodeBackend::default(),
            object_confidence_threshold: 0.5,
        }
    }
}

/// Barcode and object hits of one frame
#[derive(Debug, Clone, Default)]
pub struct CodeExtraction {
    /// `DetectionRecord::BarcodeHit` records in decoder order
    pub barcodes: Vec<DetectionRecord>,
    /// `DetectionRecord::ObjectHit` records in detector order
    pub objects: Vec<DetectionRecord>,
    /// One entry per modality whose collaborator failed
    pub degraded: Vec<StageFailure>,
}

impl CodeExtraction {
    /// Data of the first decoded barcode
    pub fn first_barcode(&self) -> Option<&str> {
        self.barcodes.iter().find_map(|record| match record {
            DetectionRecord::BarcodeHit { data, .. } => Some(data.as_str()),
            _ => None,
        })
    }
}

/// Runs the configured barcode decoder and object detector
///
/// Either collaborator may be absent, in which case that modality simply
/// yields nothing.
pub struct CodeAndObjectExtractor {
    decoder: Option<Box<dyn BarcodeDecoder>>,
    detector: Option<Box<dyn ObjectDetector>>,
    settings: CodeSettings,
}

impl CodeAndObjectExtractor {
    pub fn new(
        decoder: Option<Box<dyn BarcodeDecoder>>,
        detector: Option<Box<dyn ObjectDetector>>,
        settings: CodeSettings,
    ) -> Self {
        Self {
            decoder,
            detector,
            settings,
        }
    }

    /// Extractor with no collaborators
    pub fn disabled() -> Self {
        Self::new(None, None, CodeSettings::default())
    }

    pub fn decoder_name(&self) -> Option<&'static str> {
        self.decoder.as_ref().map(|d| d.name())
    }

    pub fn object_detector_name(&self) -> Option<&'static str> {
        self.detector.as_ref().map(|d| d.name())
    }

    /// Extract both modalities; a failing collaborator empties only its own list
    pub fn extract(&self, frame: &Frame) -> CodeExtraction {
        let mut extraction = CodeExtraction::default();

        match self.try_decode(frame) {
            Ok(barcodes) => extraction.barcodes = barcodes,
            Err(cause) => {
                warn!("{}", cause);
                extraction.degraded.push(cause);
            }
        }

        match self.try_detect(frame) {
            Ok(objects) => extraction.objects = objects,
            Err(cause) => {
                warn!("{}", cause);
                extraction.degraded.push(cause);
            }
        }

        debug!(
            "Code extraction: {} barcodes, {} objects",
            extraction.barcodes.len(),
            extraction.objects.len()
        );
        extraction
    }

    /// Decode barcodes over the grayscale plane
    pub fn try_decode(&self, frame: &Frame) -> Result<Vec<DetectionRecord>, StageFailure> {
        let Some(decoder) = &self.decoder else {
            return Ok(Vec::new());
        };
        if frame.is_empty() {
            return Ok(Vec::new());
        }

        let gray = Frame::from_gray(frame.to_gray());
        let decoded = decoder
            .decode(&gray)
            .map_err(|e| StageFailure::degraded(Modality::Barcode, format!("{:#}", e)))?;

        Ok(decoded
            .into_iter()
            .filter_map(|hit| {
                let record = DetectionRecord::barcode(hit.bbox, hit.data, hit.symbology, hit.polygon);
                if record.is_none() {
                    debug!("Dropping barcode with degenerate box {:?}", hit.bbox);
                }
                record
            })
            .collect())
    }

    /// Detect objects, keeping hits at or above the confidence threshold
    pub fn try_detect(&self, frame: &Frame) -> Result<Vec<DetectionRecord>, StageFailure> {
        let Some(detector) = &self.detector else {
            return Ok(Vec::new());
        };
        if frame.is_empty() {
            return Ok(Vec::new());
        }

        let candidates = detector
            .detect(frame)
            .map_err(|e| StageFailure::degraded(Modality::Object, format!("{:#}", e)))?;

        Ok(candidates
            .into_iter()
            .filter(|c| c.confidence >= self.settings.object_confidence_threshold)
            .filter_map(|c| DetectionRecord::object(c.bbox, c.confidence, c.class_label))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{barcode, blank_frame, object, StubBarcodes, StubObjects};
    use crate::vision::geometry::Rectangle;

    #[test]
    fn test_object_threshold() {
        let extractor = CodeAndObjectExtractor::new(
            None,
            Some(Box::new(StubObjects::new(vec![
                object("bottle", 0.49),
                object("label", 0.5),
                object("cap", 0.93),
            ]))),
            CodeSettings::default(),
        );
        let extraction = extractor.extract(&blank_frame(50, 50, 255));
        let labels: Vec<_> = extraction
            .objects
            .iter()
            .filter_map(|o| match o {
                DetectionRecord::ObjectHit { class_label, .. } => Some(class_label.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(labels, vec!["label", "cap"]);
    }

    #[test]
    fn test_all_barcodes_retained() {
        let extractor = CodeAndObjectExtractor::new(
            Some(Box::new(StubBarcodes::new(vec![
                barcode("7350012345678", Rectangle::new(1, 1, 30, 10)),
                barcode("7350012345678", Rectangle::new(1, 20, 30, 10)),
                barcode("broken", Rectangle::new(1, 40, 0, 10)),
            ]))),
            None,
            CodeSettings::default(),
        );
        let extraction = extractor.extract(&blank_frame(50, 60, 255));
        assert_eq!(extraction.barcodes.len(), 2);
        assert_eq!(extraction.first_barcode(), Some("7350012345678"));
        assert!(extraction.degraded.is_empty());
    }

    #[test]
    fn test_failure_degrades_one_modality() {
        let extractor = CodeAndObjectExtractor::new(
            Some(Box::new(StubBarcodes::failing())),
            Some(Box::new(StubObjects::new(vec![object("label", 0.8)]))),
            CodeSettings::default(),
        );
        let extraction = extractor.extract(&blank_frame(50, 50, 255));
        assert!(extraction.barcodes.is_empty());
        assert_eq!(extraction.objects.len(), 1);
        assert!(matches!(
            extraction.degraded.as_slice(),
            [StageFailure::ExtractionDegraded { modality: Modality::Barcode, .. }]
        ));
    }

    #[test]
    fn test_disabled_extractor_is_empty() {
        let extraction = CodeAndObjectExtractor::disabled().extract(&blank_frame(10, 10, 0));
        assert!(extraction.barcodes.is_empty());
        assert!(extraction.objects.is_empty());
        assert!(extraction.degraded.is_empty());
        assert_eq!(extraction.first_barcode(), None);
    }
}

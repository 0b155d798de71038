//! Detection records and inspection results

use serde::{Deserialize, Serialize};

use crate::error::StageFailure;
use crate::vision::geometry::Rectangle;
use crate::vision::preprocess::FrameQuality;

/// One detection of a pipeline run
///
/// Construct through [`DetectionRecord::text`], [`DetectionRecord::barcode`]
/// and [`DetectionRecord::object`], which refuse empty regions and clamp
/// confidences into `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectionRecord {
    TextRegion {
        region: Rectangle,
        confidence: f32,
        text: String,
    },
    BarcodeHit {
        region: Rectangle,
        confidence: f32,
        data: String,
        symbology: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        polygon: Vec<(i32, i32)>,
    },
    ObjectHit {
        region: Rectangle,
        confidence: f32,
        class_label: String,
    },
}

fn unit(confidence: f32) -> f32 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

impl DetectionRecord {
    pub fn text(region: Rectangle, confidence: f32, text: String) -> Option<Self> {
        region.is_valid().then(|| DetectionRecord::TextRegion {
            region,
            confidence: unit(confidence),
            text,
        })
    }

    /// A decoded barcode; decoding success is treated as full confidence
    pub fn barcode(region: Rectangle, data: String, symbology: String, polygon: Vec<(i32, i32)>) -> Option<Self> {
        region.is_valid().then(|| DetectionRecord::BarcodeHit {
            region,
            confidence: 1.0,
            data,
            symbology,
            polygon,
        })
    }

    pub fn object(region: Rectangle, confidence: f32, class_label: String) -> Option<Self> {
        region.is_valid().then(|| DetectionRecord::ObjectHit {
            region,
            confidence: unit(confidence),
            class_label,
        })
    }

    pub fn region(&self) -> &Rectangle {
        match self {
            DetectionRecord::TextRegion { region, .. }
            | DetectionRecord::BarcodeHit { region, .. }
            | DetectionRecord::ObjectHit { region, .. } => region,
        }
    }

    pub fn confidence(&self) -> f32 {
        match self {
            DetectionRecord::TextRegion { confidence, .. }
            | DetectionRecord::BarcodeHit { confidence, .. }
            | DetectionRecord::ObjectHit { confidence, .. } => *confidence,
        }
    }
}

/// Outcome of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InspectionResult {
    pub success: bool,
    /// Fused confidence in `[0, 1]`
    pub confidence: f32,
    /// Recognized text in reading order
    pub text: String,
    /// Data of the first decoded barcode, empty if none
    pub barcode: String,
    pub objects: Vec<DetectionRecord>,
    pub text_regions: Vec<DetectionRecord>,
    pub barcodes: Vec<DetectionRecord>,
    /// Located label, with its outline when it was rectified
    pub label_region: Option<Rectangle>,
    /// Why the run did not produce a usable read
    pub error: Option<String>,
    /// Stages that fell back during the run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degradations: Vec<StageFailure>,
    pub quality: FrameQuality,
    pub elapsed_ms: f64,
}

impl InspectionResult {
    /// Result of a run that stopped at `cause`
    pub fn failed(cause: StageFailure) -> Self {
        Self {
            error: Some(cause.to_string()),
            degradations: vec![cause],
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_reject_empty_regions() {
        assert!(DetectionRecord::text(Rectangle::new(0, 0, 0, 5), 0.5, "x".to_string()).is_none());
        assert!(DetectionRecord::object(Rectangle::new(0, 0, 5, 0), 0.5, "x".to_string()).is_none());
        assert!(
            DetectionRecord::barcode(Rectangle::default(), "1".to_string(), "EAN13".to_string(), vec![])
                .is_none()
        );
    }

    #[test]
    fn test_record_confidence_clamped() {
        let record = DetectionRecord::object(Rectangle::new(0, 0, 5, 5), 1.7, "cap".to_string()).unwrap();
        assert_eq!(record.confidence(), 1.0);
        let record = DetectionRecord::text(Rectangle::new(0, 0, 5, 5), f32::NAN, "ab".to_string()).unwrap();
        assert_eq!(record.confidence(), 0.0);
    }

    #[test]
    fn test_record_serializes_with_kind_tag() {
        let record = DetectionRecord::barcode(
            Rectangle::new(1, 2, 3, 4),
            "7350012345678".to_string(),
            "EAN13".to_string(),
            vec![],
        )
        .unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "barcode_hit");
        assert_eq!(json["data"], "7350012345678");
        assert_eq!(json["region"]["width"], 3);
    }

    #[test]
    fn test_failed_result() {
        let result = InspectionResult::failed(StageFailure::RegionNotFound("no contours in frame".to_string()));
        assert!(!result.success);
        assert_eq!(result.confidence, 0.0);
        assert!(result.error.as_deref().unwrap().contains("no contours"));
        assert_eq!(result.degradations.len(), 1);
    }
}

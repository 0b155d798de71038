//! Single-shot inspection pipeline
//!
//! preprocess -> locate -> rectify -> (text, codes/objects) -> fusion
//!
//! A run never fails for frame-processing reasons. Each stage either succeeds
//! or falls back and records why, and the run always ends in an
//! [`InspectionResult`].

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::analysis::fusion::ConfidenceFusion;
use crate::capture::frame::Frame;
use crate::config::AppConfig;
use crate::error::StageFailure;
use crate::inspection::record::{DetectionRecord, InspectionResult};
use crate::inspection::stats::{RunningStatistics, StatisticsSnapshot};
use crate::storage::sink::StatisticsSink;
use crate::vision::backends::{
    BarcodeDecoder, ObjectDetector, OrientationEstimator, TextRegionDetector, UprightOrientation,
    WholeFrameTextDetector,
};
use crate::vision::barcode::RxingBarcodeDecoder;
use crate::vision::codes::CodeAndObjectExtractor;
use crate::vision::locate::{LocatorSettings, RegionLocator};
use crate::vision::preprocess::{FramePreprocessor, PreprocessSettings};
use crate::vision::rectify::{PerspectiveRectifier, RectifySettings};
use crate::vision::tesseract::TesseractCli;
use crate::vision::text::{TextExtraction, TextExtractor};
use crate::vision::yolo::{resolve_model_path, YoloDetector};
use crate::vision::{BarcodeBackend, OcrBackend};

/// A pipeline run together with the frame the extractors saw
#[derive(Debug, Clone)]
pub struct Inspection {
    pub result: InspectionResult,
    /// Rectified label, the axis-aligned crop when rectification was skipped,
    /// or the preprocessed frame when no label was found
    pub label: Frame,
}

/// Collaborators a pipeline runs with, by type name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendSummary {
    pub text_detector: Option<&'static str>,
    pub ocr: Option<&'static str>,
    pub orientation: Option<&'static str>,
    pub barcode: Option<&'static str>,
    pub objects: Option<&'static str>,
}

impl fmt::Display for BackendSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = |n: Option<&'static str>| n.unwrap_or("none");
        write!(
            f,
            "text detector: {}, OCR: {}, orientation: {}, barcode: {}, objects: {}",
            name(self.text_detector),
            name(self.ocr),
            name(self.orientation),
            name(self.barcode),
            name(self.objects)
        )
    }
}

/// Stateless per-frame inspection
///
/// Only the shared statistics and the registered sinks see side effects.
pub struct Pipeline {
    preprocessor: FramePreprocessor,
    locator: RegionLocator,
    rectifier: PerspectiveRectifier,
    text: Option<TextExtractor>,
    codes: CodeAndObjectExtractor,
    fusion: ConfidenceFusion,
    stats: Arc<RunningStatistics>,
    sinks: Vec<Box<dyn StatisticsSink>>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Inspect one frame
    pub fn run(&self, frame: &Frame) -> InspectionResult {
        self.inspect(frame).result
    }

    /// Inspect one frame, keeping the label frame for review
    pub fn inspect(&self, frame: &Frame) -> Inspection {
        self.inspect_with(frame, &self.fusion, None)
    }

    /// Inspect with a session-specific fusion reference
    pub(crate) fn inspect_with(&self, frame: &Frame, fusion: &ConfidenceFusion, session: Option<Uuid>) -> Inspection {
        let start = Instant::now();
        let mut inspection = self.analyze(frame, fusion);
        inspection.result.elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        debug!(
            "Pipeline run took {:.1}ms: success={}, confidence={:.2}",
            inspection.result.elapsed_ms, inspection.result.success, inspection.result.confidence
        );

        self.complete(&inspection.result, session);
        inspection
    }

    pub fn fusion(&self) -> &ConfidenceFusion {
        &self.fusion
    }

    pub fn backends(&self) -> BackendSummary {
        BackendSummary {
            text_detector: self.text.as_ref().map(|t| t.detector_name()),
            ocr: self.text.as_ref().map(|t| t.ocr_name()),
            orientation: self.text.as_ref().map(|t| t.orientation_name()),
            barcode: self.codes.decoder_name(),
            objects: self.codes.object_detector_name(),
        }
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.stats.snapshot()
    }

    /// Shared counters, for reporting from other threads
    pub fn statistics_handle(&self) -> Arc<RunningStatistics> {
        Arc::clone(&self.stats)
    }

    fn analyze(&self, frame: &Frame, fusion: &ConfidenceFusion) -> Inspection {
        if frame.is_empty() {
            return Inspection {
                result: InspectionResult::failed(StageFailure::EmptyFrame),
                label: Frame::empty(),
            };
        }

        let quality = self.preprocessor.quality(frame);
        let mut degradations = Vec::new();

        let (enhanced, cause) = self.preprocessor.enhance(frame).into_parts();
        degradations.extend(cause);

        let region = match self.locator.locate(&enhanced) {
            Ok(region) => region,
            Err(cause) => {
                debug!("No label in frame: {}", cause);
                degradations.push(cause.clone());
                let mut result = InspectionResult::failed(cause);
                result.degradations = degradations;
                result.quality = quality;
                return Inspection { result, label: enhanced };
            }
        };

        let (label, label_region) = match self
            .rectifier
            .find_quad(&enhanced, &region)
            .and_then(|quad| Ok((quad, self.rectifier.warp_quad(&enhanced, &quad)?)))
        {
            Ok((quad, rectified)) => {
                let polygon = quad.map(|(x, y)| (x.round() as i32, y.round() as i32));
                (rectified, region.with_polygon(polygon))
            }
            Err(cause) => {
                debug!("Using axis-aligned crop: {}", cause);
                degradations.push(cause);
                (enhanced.crop(&region), region)
            }
        };

        let text = match &self.text {
            Some(extractor) => {
                let (text, cause) = extractor.extract(&label).into_parts();
                degradations.extend(cause);
                text
            }
            None => TextExtraction::default(),
        };

        let codes = self.codes.extract(&label);
        degradations.extend(codes.degraded.iter().cloned());

        let barcode_present = !codes.barcodes.is_empty();
        let verdict = fusion.fuse(&text.full_text, barcode_present, &codes.objects);

        let error = if verdict.success {
            None
        } else if text.full_text.is_empty() && !barcode_present {
            Some("no text or barcode read from label".to_string())
        } else {
            Some(format!(
                "confidence {:.2} below threshold {:.2}",
                verdict.confidence,
                fusion.settings().min_confidence
            ))
        };

        let text_regions = text
            .regions
            .iter()
            .filter_map(|r| DetectionRecord::text(r.bbox, r.confidence, r.text.clone()))
            .collect();

        let result = InspectionResult {
            success: verdict.success,
            confidence: verdict.confidence,
            text: text.full_text,
            barcode: codes.first_barcode().unwrap_or_default().to_string(),
            objects: codes.objects,
            text_regions,
            barcodes: codes.barcodes,
            label_region: Some(label_region),
            error,
            degradations,
            quality,
            elapsed_ms: 0.0,
        };

        Inspection { result, label }
    }

    /// Count the run and hand it to every sink, exactly once
    fn complete(&self, result: &InspectionResult, session: Option<Uuid>) {
        self.stats.record(result.success);
        for sink in &self.sinks {
            if let Err(e) = sink.record(result, session) {
                warn!("Statistics sink failed: {:#}", e);
            }
        }
    }
}

/// Assembles a [`Pipeline`]; unset parts take their defaults
#[derive(Default)]
pub struct PipelineBuilder {
    preprocess: PreprocessSettings,
    locator: LocatorSettings,
    rectify: RectifySettings,
    text: Option<TextExtractor>,
    codes: Option<CodeAndObjectExtractor>,
    fusion: Option<ConfidenceFusion>,
    stats: Option<Arc<RunningStatistics>>,
    sinks: Vec<Box<dyn StatisticsSink>>,
}

impl PipelineBuilder {
    /// Settings and backends from the application config
    ///
    /// Text extraction runs only with an OCR backend. Its regions come from
    /// the text model when one is configured, otherwise OCR reads the whole
    /// label. Fails when a configured model cannot be loaded.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let text = match config.ocr.backend {
            OcrBackend::None => None,
            OcrBackend::Tesseract => {
                let tesseract = TesseractCli::new(config.ocr.tesseract.clone());
                let detector: Box<dyn TextRegionDetector> = match &config.models.text_model {
                    Some(path) => Box::new(YoloDetector::load(
                        &resolve_model_path(path)?,
                        Vec::new(),
                        &config.models,
                    )?),
                    None => Box::new(WholeFrameTextDetector),
                };
                let orientation: Box<dyn OrientationEstimator> = if config.ocr.detect_orientation {
                    Box::new(tesseract.clone())
                } else {
                    Box::new(UprightOrientation)
                };
                Some(TextExtractor::new(
                    detector,
                    Box::new(tesseract),
                    orientation,
                    config.text.clone(),
                ))
            }
        };

        let decoder: Option<Box<dyn BarcodeDecoder>> = match config.codes.barcode_backend {
            BarcodeBackend::None => None,
            BarcodeBackend::Rxing => Some(Box::new(RxingBarcodeDecoder)),
        };
        let objects: Option<Box<dyn ObjectDetector>> = match &config.models.object_model {
            Some(path) => Some(Box::new(YoloDetector::load(
                &resolve_model_path(path)?,
                config.models.object_classes.clone(),
                &config.models,
            )?)),
            None => None,
        };

        Ok(Self {
            preprocess: config.preprocess.clone(),
            locator: config.locator.clone(),
            rectify: config.rectify.clone(),
            text,
            codes: Some(CodeAndObjectExtractor::new(decoder, objects, config.codes.clone())),
            fusion: Some(ConfidenceFusion::new(
                config.fusion.clone(),
                &config.inspection.default_keywords,
            )),
            stats: None,
            sinks: Vec::new(),
        })
    }

    pub fn preprocess(mut self, settings: PreprocessSettings) -> Self {
        self.preprocess = settings;
        self
    }

    pub fn locator(mut self, settings: LocatorSettings) -> Self {
        self.locator = settings;
        self
    }

    pub fn rectify(mut self, settings: RectifySettings) -> Self {
        self.rectify = settings;
        self
    }

    pub fn text_extractor(mut self, extractor: TextExtractor) -> Self {
        self.text = Some(extractor);
        self
    }

    pub fn code_extractor(mut self, extractor: CodeAndObjectExtractor) -> Self {
        self.codes = Some(extractor);
        self
    }

    pub fn fusion(mut self, fusion: ConfidenceFusion) -> Self {
        self.fusion = Some(fusion);
        self
    }

    /// Share counters with other pipelines
    pub fn statistics(mut self, stats: Arc<RunningStatistics>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn sink(mut self, sink: Box<dyn StatisticsSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            preprocessor: FramePreprocessor::new(self.preprocess),
            locator: RegionLocator::new(self.locator),
            rectifier: PerspectiveRectifier::new(self.rectify),
            text: self.text,
            codes: self.codes.unwrap_or_else(CodeAndObjectExtractor::disabled),
            fusion: self.fusion.unwrap_or_default(),
            stats: self.stats.unwrap_or_default(),
            sinks: self.sinks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::fusion::FusionSettings;
    use crate::test_utils::{barcode, blank_frame, frame_with_rect, MemorySink, ScriptedOcr, StubBarcodes};
    use crate::vision::geometry::Rectangle;
    use crate::vision::text::TextSettings;

    fn ocr_pipeline(responses: Vec<Result<&'static str, &'static str>>, keywords: &[&str]) -> PipelineBuilder {
        Pipeline::builder()
            .text_extractor(TextExtractor::new(
                Box::new(WholeFrameTextDetector),
                Box::new(ScriptedOcr::new(responses)),
                Box::new(UprightOrientation),
                TextSettings::default(),
            ))
            .fusion(ConfidenceFusion::new(FusionSettings::default(), keywords.iter().copied()))
    }

    #[test]
    fn test_label_read_and_accepted() {
        let pipeline = ocr_pipeline(vec![Ok("PRODUKT: ABC-123")], &["PRODUKT"]).build();
        let frame = frame_with_rect(200, 150, (50, 40, 80, 60));

        let inspection = pipeline.inspect(&frame);
        let result = &inspection.result;
        assert!(result.success, "{:?}", result);
        assert!((result.confidence - 0.6).abs() < 1e-5);
        assert_eq!(result.text, "PRODUKT ABC123");
        assert!(result.error.is_none());
        assert_eq!(result.text_regions.len(), 1);

        let region = result.label_region.unwrap();
        assert!(region.x.abs_diff(50) <= 3 && region.y.abs_diff(40) <= 3);
        assert!(!inspection.label.is_empty());
    }

    #[test]
    fn test_no_label_is_a_failed_result() {
        let pipeline = ocr_pipeline(vec![Ok("never read")], &[]).build();
        let result = pipeline.run(&blank_frame(160, 120, 255));

        assert!(!result.success);
        assert_eq!(result.confidence, 0.0);
        assert!(result.error.as_deref().unwrap().contains("label region not found"));
        assert!(result.label_region.is_none());
        assert!(matches!(result.degradations.as_slice(), [StageFailure::RegionNotFound(_)]));
    }

    #[test]
    fn test_empty_frame() {
        let result = Pipeline::builder().build().run(&Frame::empty());
        assert!(!result.success);
        assert_eq!(result.degradations, vec![StageFailure::EmptyFrame]);
    }

    #[test]
    fn test_barcode_only_passes() {
        let pipeline = Pipeline::builder()
            .code_extractor(CodeAndObjectExtractor::new(
                Some(Box::new(StubBarcodes::new(vec![barcode(
                    "7350012345678",
                    Rectangle::new(2, 2, 20, 10),
                )]))),
                None,
                Default::default(),
            ))
            .build();

        let result = pipeline.run(&frame_with_rect(200, 150, (50, 40, 80, 60)));
        assert!(result.success);
        assert_eq!(result.barcode, "7350012345678");
        assert!((result.confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_ocr_failure_is_recorded_not_raised() {
        let pipeline = ocr_pipeline(vec![Err("tesseract crashed")], &["PRODUKT"]).build();
        let result = pipeline.run(&frame_with_rect(200, 150, (50, 40, 80, 60)));

        assert!(!result.success);
        assert_eq!(result.text, "");
        assert_eq!(result.error.as_deref(), Some("no text or barcode read from label"));
    }

    #[test]
    fn test_statistics_and_sinks_once_per_run() {
        let sink = Arc::new(MemorySink::default());
        let stats = Arc::new(RunningStatistics::new());
        let pipeline = ocr_pipeline(vec![Ok("PRODUKT: ABC-123")], &["PRODUKT"])
            .statistics(Arc::clone(&stats))
            .sink(Box::new(Arc::clone(&sink)))
            .build();

        pipeline.run(&frame_with_rect(200, 150, (50, 40, 80, 60)));
        pipeline.run(&blank_frame(100, 100, 255));
        pipeline.run(&Frame::empty());

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.passed, 1);
        assert_eq!(snapshot.failed, 2);
        assert_eq!(pipeline.statistics(), snapshot);
        assert_eq!(sink.results().len(), 3);
    }

    #[test]
    fn test_from_config_without_ocr() {
        let pipeline = PipelineBuilder::from_config(&AppConfig::default()).unwrap().build();
        let result = pipeline.run(&frame_with_rect(200, 150, (50, 40, 80, 60)));
        assert!(!result.success);
        assert!(result.label_region.is_some());

        let backends = pipeline.backends();
        assert_eq!(backends.ocr, None);
        assert_eq!(backends.orientation, None);
        assert_eq!(backends.barcode, Some("RxingBarcodeDecoder"));
        assert_eq!(backends.objects, None);
    }

    #[test]
    fn test_from_config_tesseract_detects_orientation() {
        let mut config = AppConfig::default();
        config.ocr.backend = OcrBackend::Tesseract;

        let backends = PipelineBuilder::from_config(&config).unwrap().build().backends();
        assert_eq!(backends.text_detector, Some("WholeFrameTextDetector"));
        assert_eq!(backends.ocr, Some("TesseractCli"));
        assert_eq!(backends.orientation, Some("TesseractCli"));
    }

    #[test]
    fn test_from_config_orientation_can_be_disabled() {
        let mut config = AppConfig::default();
        config.ocr.backend = OcrBackend::Tesseract;
        config.ocr.detect_orientation = false;
        config.codes.barcode_backend = BarcodeBackend::None;

        let backends = PipelineBuilder::from_config(&config).unwrap().build().backends();
        assert_eq!(backends.orientation, Some("UprightOrientation"));
        assert_eq!(backends.barcode, None);
        assert_eq!(
            backends.to_string(),
            "text detector: WholeFrameTextDetector, OCR: TesseractCli, orientation: UprightOrientation, barcode: none, objects: none"
        );
    }

    #[test]
    fn test_from_config_missing_model_is_an_error() {
        let mut config = AppConfig::default();
        config.models.object_model = Some(std::path::PathBuf::from("/nonexistent/objects.onnx"));
        assert!(PipelineBuilder::from_config(&config).is_err());
    }
}

//! Shared fixtures for unit tests

use std::collections::VecDeque;

use anyhow::{anyhow, Result};
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_polygon_mut};
use imageproc::point::Point;
use imageproc::rect::Rect;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::capture::frame::Frame;
use crate::capture::FrameSource;
use crate::inspection::record::InspectionResult;
use crate::storage::catalog::LabelEntry;
use crate::storage::sink::StatisticsSink;
use crate::vision::backends::{
    BarcodeDecoder, DecodedBarcode, ObjectCandidate, ObjectDetector, OcrEngine, OrientationEstimator,
    TextCandidate, TextRegionDetector,
};
use crate::vision::geometry::Rectangle;

const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

/// Uniform RGB frame
pub fn blank_frame(width: u32, height: u32, value: u8) -> Frame {
    Frame::from_rgb(RgbImage::from_pixel(width, height, Rgb([value, value, value])))
}

/// White frame with a filled black rectangle `(x, y, w, h)`
pub fn frame_with_rect(width: u32, height: u32, rect: (i32, i32, u32, u32)) -> Frame {
    let mut image = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    let (x, y, w, h) = rect;
    draw_filled_rect_mut(&mut image, Rect::at(x, y).of_size(w, h), BLACK);
    Frame::from_rgb(image)
}

/// Fill `(x, y, w, h)` of a grayscale image
pub fn fill_rect(image: &mut GrayImage, rect: (i32, i32, u32, u32), value: u8) {
    let (x, y, w, h) = rect;
    draw_filled_rect_mut(image, Rect::at(x, y).of_size(w, h), Luma([value]));
}

/// White frame with a filled black quadrilateral
pub fn frame_with_quad(width: u32, height: u32, corners: [(i32, i32); 4]) -> Frame {
    let mut image = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    let points: Vec<Point<i32>> = corners.iter().map(|&(x, y)| Point::new(x, y)).collect();
    draw_polygon_mut(&mut image, &points, BLACK);
    Frame::from_rgb(image)
}

/// White frame with a filled black disc
pub fn frame_with_circle(width: u32, height: u32, center: (i32, i32), radius: i32) -> Frame {
    let mut image = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    draw_filled_circle_mut(&mut image, center, radius, BLACK);
    Frame::from_rgb(image)
}

pub fn candidate(x: u32, y: u32, width: u32, height: u32, confidence: f32) -> TextCandidate {
    TextCandidate {
        bbox: Rectangle::new(x, y, width, height),
        confidence,
        class_id: 0,
    }
}

/// Detector returning a fixed candidate list
pub struct StubTextDetector {
    candidates: Option<Vec<TextCandidate>>,
}

impl StubTextDetector {
    pub fn new(candidates: Vec<TextCandidate>) -> Self {
        Self {
            candidates: Some(candidates),
        }
    }

    pub fn failing() -> Self {
        Self { candidates: None }
    }
}

impl TextRegionDetector for StubTextDetector {
    fn detect(&self, _frame: &Frame) -> Result<Vec<TextCandidate>> {
        self.candidates
            .clone()
            .ok_or_else(|| anyhow!("detector model not loaded"))
    }
}

/// OCR engine answering from a script, in call order
pub struct ScriptedOcr {
    responses: Mutex<VecDeque<Result<&'static str, &'static str>>>,
}

impl ScriptedOcr {
    pub fn new(responses: Vec<Result<&'static str, &'static str>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }
}

impl OcrEngine for ScriptedOcr {
    fn recognize(&self, _region: &Frame, _language_hint: &str) -> Result<String> {
        match self.responses.lock().pop_front() {
            Some(Ok(text)) => Ok(text.to_string()),
            Some(Err(reason)) => Err(anyhow!(reason)),
            None => Err(anyhow!("no scripted OCR response left")),
        }
    }
}

/// Orientation estimator with a fixed answer
pub struct FixedOrientation(pub f32);

impl OrientationEstimator for FixedOrientation {
    fn estimate(&self, _region: &Frame) -> Result<f32> {
        Ok(self.0)
    }
}

pub fn barcode(data: &str, bbox: Rectangle) -> DecodedBarcode {
    DecodedBarcode {
        symbology: "EAN13".to_string(),
        data: data.to_string(),
        bbox,
        polygon: Vec::new(),
    }
}

pub fn object(label: &str, confidence: f32) -> ObjectCandidate {
    ObjectCandidate {
        bbox: Rectangle::new(5, 5, 20, 20),
        confidence,
        class_label: label.to_string(),
    }
}

pub struct StubBarcodes {
    barcodes: Option<Vec<DecodedBarcode>>,
}

impl StubBarcodes {
    pub fn new(barcodes: Vec<DecodedBarcode>) -> Self {
        Self {
            barcodes: Some(barcodes),
        }
    }

    pub fn failing() -> Self {
        Self { barcodes: None }
    }
}

impl BarcodeDecoder for StubBarcodes {
    fn decode(&self, _frame: &Frame) -> Result<Vec<DecodedBarcode>> {
        self.barcodes.clone().ok_or_else(|| anyhow!("decoder unavailable"))
    }
}

pub struct StubObjects {
    objects: Vec<ObjectCandidate>,
}

impl StubObjects {
    pub fn new(objects: Vec<ObjectCandidate>) -> Self {
        Self { objects }
    }
}

impl ObjectDetector for StubObjects {
    fn detect(&self, _frame: &Frame) -> Result<Vec<ObjectCandidate>> {
        Ok(self.objects.clone())
    }
}

/// Sink keeping results in memory
#[derive(Default)]
pub struct MemorySink {
    results: Mutex<Vec<(InspectionResult, Option<Uuid>)>>,
}

impl MemorySink {
    pub fn results(&self) -> Vec<InspectionResult> {
        self.results.lock().iter().map(|(r, _)| r.clone()).collect()
    }

    pub fn sessions(&self) -> Vec<Option<Uuid>> {
        self.results.lock().iter().map(|(_, s)| *s).collect()
    }
}

impl StatisticsSink for MemorySink {
    fn record(&self, result: &InspectionResult, session: Option<Uuid>) -> Result<()> {
        self.results.lock().push((result.clone(), session));
        Ok(())
    }
}

/// Frame source handing out a fixed list, optionally forever
pub struct VecSource {
    frames: VecDeque<Frame>,
    repeat: Option<Frame>,
}

impl VecSource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into(),
            repeat: None,
        }
    }

    pub fn repeating(frame: Frame) -> Self {
        Self {
            frames: VecDeque::new(),
            repeat: Some(frame),
        }
    }
}

impl FrameSource for VecSource {
    fn get_frame(&mut self) -> Option<Frame> {
        self.frames.pop_front().or_else(|| self.repeat.clone())
    }
}

pub fn label_entry(id: &str, customer_id: &str, keywords: &[&str]) -> LabelEntry {
    LabelEntry {
        id: id.to_string(),
        customer_id: customer_id.to_string(),
        name: format!("Label {}", id),
        article_number: None,
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        reference_text: None,
    }
}

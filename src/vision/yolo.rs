//! YOLO detectors running on ONNX Runtime
//!
//! One detector type serves both the text region model and the generic
//! object model. Both are YOLOv8-style exports with a single output head of
//! shape `[1, 4 + classes, anchors]`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use image::imageops::{self, FilterType};
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::capture::frame::Frame;
use crate::vision::backends::{ObjectCandidate, ObjectDetector, TextCandidate, TextRegionDetector};
use crate::vision::geometry::Rectangle;

/// Detector model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Text region model; OCR reads the whole label when unset
    pub text_model: Option<PathBuf>,
    /// Object model; object detection is off when unset
    pub object_model: Option<PathBuf>,
    /// Object class names indexed by class id
    pub object_classes: Vec<String>,
    /// Square network input side in pixels
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
    pub intra_threads: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            text_model: None,
            object_model: None,
            object_classes: Vec::new(),
            input_size: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: 100,
            intra_threads: 4,
        }
    }
}

/// Resolve a configured model path
///
/// Relative paths that do not exist from the working directory are looked up
/// in the `models` folder of the application data directory.
pub fn resolve_model_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() || path.exists() {
        return Ok(path.to_path_buf());
    }
    Ok(crate::storage::get_data_dir()?.join("models").join(path))
}

/// One box after thresholding and suppression, in frame coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: Rectangle,
    pub confidence: f32,
    pub class_id: usize,
}

/// YOLO model behind an ONNX Runtime session
pub struct YoloDetector {
    session: Mutex<Session>,
    input_name: String,
    class_names: Vec<String>,
    settings: ModelSettings,
}

impl YoloDetector {
    /// Load a model file
    pub fn load(model_path: &Path, class_names: Vec<String>, settings: &ModelSettings) -> Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(settings.intra_threads)?
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load ONNX model {}", model_path.display()))?;

        let input_names: Vec<String> = session.inputs.iter().map(|input| input.name.clone()).collect();
        let output_names: Vec<String> = session.outputs.iter().map(|output| output.name.clone()).collect();
        info!("Model loaded. Inputs: {:?}, Outputs: {:?}", input_names, output_names);

        let Some(input_name) = input_names.into_iter().next() else {
            bail!("Model {} has no inputs", model_path.display());
        };

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            class_names,
            settings: settings.clone(),
        })
    }

    /// Run the model on a frame
    pub fn infer(&self, frame: &Frame) -> Result<Vec<Detection>> {
        if frame.is_empty() {
            return Ok(Vec::new());
        }

        let size = self.settings.input_size;
        let resized = imageops::resize(&frame.to_rgb(), size, size, FilterType::Triangle);

        let mut input = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                input[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
            }
        }

        let shape = input.shape().to_vec();
        let (data, _offset) = input.into_raw_vec_and_offset();
        let input_value = ort::value::Value::from_array((shape.as_slice(), data))?;

        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![self.input_name.as_str() => input_value])?;
        let (output_shape, output_data) = outputs[0].try_extract_tensor::<f32>()?;
        let dims: Vec<i64> = output_shape.iter().copied().collect();

        let scale = (
            frame.width() as f32 / size as f32,
            frame.height() as f32 / size as f32,
        );
        let detections = decode_output(&dims, output_data, scale, frame.dimensions(), &self.settings)?;
        debug!("YOLO kept {} detections", detections.len());
        Ok(detections)
    }

    fn class_label(&self, class_id: usize) -> String {
        self.class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }
}

impl ObjectDetector for YoloDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<ObjectCandidate>> {
        Ok(self
            .infer(frame)?
            .into_iter()
            .map(|d| ObjectCandidate {
                class_label: self.class_label(d.class_id),
                bbox: d.bbox,
                confidence: d.confidence,
            })
            .collect())
    }
}

impl TextRegionDetector for YoloDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<TextCandidate>> {
        Ok(self
            .infer(frame)?
            .into_iter()
            .map(|d| TextCandidate {
                bbox: d.bbox,
                confidence: d.confidence,
                class_id: d.class_id as u32,
            })
            .collect())
    }
}

/// Decode a YOLOv8 output head into frame-space detections
///
/// Accepts `[1, 4 + classes, anchors]` and its transpose. Box centres and
/// sizes are in network input pixels and are scaled by `scale` into the
/// frame, then clipped to `frame_size`. Per-class non-maximum suppression
/// keeps the most confident box of every overlapping group.
pub fn decode_output(
    shape: &[i64],
    data: &[f32],
    scale: (f32, f32),
    frame_size: (u32, u32),
    settings: &ModelSettings,
) -> Result<Vec<Detection>> {
    let [batch, rows, cols] = shape else {
        bail!("Unexpected YOLO output shape {:?}", shape);
    };
    if *batch != 1 || *rows <= 0 || *cols <= 0 {
        bail!("Unexpected YOLO output shape {:?}", shape);
    }

    let (rows, cols) = (*rows as usize, *cols as usize);
    // Anchors outnumber features in every YOLOv8 export
    let channels_first = rows <= cols;
    let (features, anchors) = if channels_first { (rows, cols) } else { (cols, rows) };
    if features <= 4 {
        bail!("YOLO output has no class scores: {:?}", shape);
    }
    if data.len() != features * anchors {
        bail!("YOLO output holds {} values, shape {:?}", data.len(), shape);
    }

    let value = |feature: usize, anchor: usize| {
        if channels_first {
            data[feature * anchors + anchor]
        } else {
            data[anchor * features + feature]
        }
    };

    let (frame_width, frame_height) = frame_size;
    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let (class_id, confidence) = (4..features)
            .map(|f| (f - 4, value(f, anchor)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
        if confidence < settings.confidence_threshold {
            continue;
        }

        let (cx, cy) = (value(0, anchor), value(1, anchor));
        let (w, h) = (value(2, anchor), value(3, anchor));
        let bbox = Rectangle::from_corners(
            (cx - w / 2.0) * scale.0,
            (cy - h / 2.0) * scale.1,
            (cx + w / 2.0) * scale.0,
            (cy + h / 2.0) * scale.1,
        )
        .clamp_to(frame_width, frame_height);

        if bbox.is_valid() {
            candidates.push(Detection {
                bbox,
                confidence,
                class_id,
            });
        }
    }

    Ok(suppress(candidates, settings.iou_threshold, settings.max_detections))
}

/// Greedy per-class non-maximum suppression, most confident first
fn suppress(mut candidates: Vec<Detection>, iou_threshold: f32, max_detections: usize) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::new();

    'outer: for candidate in candidates {
        if kept.len() >= max_detections {
            break;
        }
        for k in &kept {
            if k.class_id == candidate.class_id && iou(&k.bbox, &candidate.bbox) > iou_threshold {
                continue 'outer;
            }
        }
        kept.push(candidate);
    }
    kept
}

fn iou(a: &Rectangle, b: &Rectangle) -> f32 {
    let overlap_w = a.right().min(b.right()).saturating_sub(a.x.max(b.x));
    let overlap_h = a.bottom().min(b.bottom()).saturating_sub(a.y.max(b.y));
    let intersection = overlap_w as u64 * overlap_h as u64;
    let union = a.area() + b.area() - intersection;
    if union == 0 {
        return 0.0;
    }
    intersection as f32 / union as f32
}

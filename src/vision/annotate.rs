//! Review overlays for operators
//!
//! Draws onto RGB copies; the frames themselves are never modified.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

use crate::capture::frame::Frame;
use crate::inspection::record::{DetectionRecord, InspectionResult};
use crate::vision::geometry::Rectangle;

const PASS: Rgb<u8> = Rgb([0, 200, 0]);
const FAIL: Rgb<u8> = Rgb([220, 0, 0]);
const TEXT: Rgb<u8> = Rgb([0, 120, 255]);
const BARCODE: Rgb<u8> = Rgb([255, 140, 0]);
const OBJECT: Rgb<u8> = Rgb([230, 200, 0]);

/// Outline the located label on the camera frame
///
/// Green when the inspection passed, red otherwise. The rectified outline is
/// drawn as well when the label was found as a quadrilateral.
pub fn annotate_frame(frame: &Frame, result: &InspectionResult) -> RgbImage {
    let mut canvas = frame.to_rgb();
    let color = if result.success { PASS } else { FAIL };

    if let Some(region) = &result.label_region {
        outline(&mut canvas, region, color);
        if let Some(polygon) = &region.polygon {
            draw_closed_path(&mut canvas, polygon, color);
        }
    }

    canvas
}

/// Outline every detection on the label frame the extractors ran on
pub fn annotate_label(label: &Frame, result: &InspectionResult) -> RgbImage {
    let mut canvas = label.to_rgb();

    for record in result.text_regions.iter().chain(&result.barcodes).chain(&result.objects) {
        match record {
            DetectionRecord::TextRegion { region, .. } => outline(&mut canvas, region, TEXT),
            DetectionRecord::BarcodeHit { region, polygon, .. } => {
                outline(&mut canvas, region, BARCODE);
                draw_closed_path(&mut canvas, polygon, BARCODE);
            }
            DetectionRecord::ObjectHit { region, .. } => outline(&mut canvas, region, OBJECT),
        }
    }

    canvas
}

fn outline(canvas: &mut RgbImage, region: &Rectangle, color: Rgb<u8>) {
    if !region.is_valid() {
        return;
    }
    let rect = Rect::at(region.x as i32, region.y as i32).of_size(region.width, region.height);
    draw_hollow_rect_mut(canvas, rect, color);
}

fn draw_closed_path(canvas: &mut RgbImage, points: &[(i32, i32)], color: Rgb<u8>) {
    if points.len() < 2 {
        return;
    }
    for (i, &(x0, y0)) in points.iter().enumerate() {
        let (x1, y1) = points[(i + 1) % points.len()];
        draw_line_segment_mut(canvas, (x0 as f32, y0 as f32), (x1 as f32, y1 as f32), color);
    }
}

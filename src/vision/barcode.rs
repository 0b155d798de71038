//! Barcode decoding with rxing

use anyhow::{anyhow, Result};
use rxing::{Exceptions, RXingResult};
use tracing::debug;

use crate::capture::frame::Frame;
use crate::vision::backends::{BarcodeDecoder, DecodedBarcode};
use crate::vision::geometry::Rectangle;

/// Smallest box side in pixels; linear symbologies report only the scan line
const MIN_EXTENT: u32 = 1;

/// Multi-symbol decoder over the luminance plane
#[derive(Debug, Clone, Copy, Default)]
pub struct RxingBarcodeDecoder;

impl BarcodeDecoder for RxingBarcodeDecoder {
    fn decode(&self, frame: &Frame) -> Result<Vec<DecodedBarcode>> {
        if frame.is_empty() {
            return Ok(Vec::new());
        }

        let (width, height) = frame.dimensions();
        let luma = frame.to_gray().into_raw();

        let results = match rxing::helpers::detect_multiple_in_luma(luma, width, height) {
            Ok(results) => results,
            Err(Exceptions::NotFoundException(_)) => return Ok(Vec::new()),
            Err(e) => return Err(anyhow!("barcode decoding failed: {}", e)),
        };

        debug!("rxing decoded {} symbols", results.len());
        Ok(results
            .iter()
            .filter_map(|result| to_decoded(result, width, height))
            .collect())
    }
}

fn to_decoded(result: &RXingResult, width: u32, height: u32) -> Option<DecodedBarcode> {
    let polygon: Vec<(i32, i32)> = result
        .getPoints()
        .iter()
        .map(|p| (p.x.round() as i32, p.y.round() as i32))
        .collect();
    let bbox = outline_box(&polygon, MIN_EXTENT)?.clamp_to(width, height);

    Some(DecodedBarcode {
        symbology: symbology_name(&format!("{:?}", result.getBarcodeFormat())),
        data: result.getText().to_string(),
        bbox,
        polygon,
    })
}

/// Bounding box of the outline points, grown to `min_extent` where it is thinner
fn outline_box(points: &[(i32, i32)], min_extent: u32) -> Option<Rectangle> {
    let min_x = points.iter().map(|p| p.0).min()?;
    let max_x = points.iter().map(|p| p.0).max()?;
    let min_y = points.iter().map(|p| p.1).min()?;
    let max_y = points.iter().map(|p| p.1).max()?;

    Some(Rectangle::from_corners(
        min_x as f32,
        min_y as f32,
        max_x.max(min_x + min_extent as i32) as f32,
        max_y.max(min_y + min_extent as i32) as f32,
    ))
}

/// `EAN_13` -> `EAN13`, `QR_CODE` -> `QRCODE`
fn symbology_name(format: &str) -> String {
    format.chars().filter(|c| *c != '_').collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::blank_frame;
    use image::{GrayImage, Luma};
    use rxing::{BarcodeFormat, MultiFormatWriter, Writer};

    #[test]
    fn test_blank_frame_has_no_barcodes() {
        let decoder = RxingBarcodeDecoder;
        assert!(decoder.decode(&blank_frame(120, 80, 255)).unwrap().is_empty());
        assert!(decoder.decode(&Frame::empty()).unwrap().is_empty());
    }

    #[test]
    fn test_decodes_generated_qr_code() {
        let matrix = MultiFormatWriter::default()
            .encode("LOT-4711", &BarcodeFormat::QR_CODE, 200, 200)
            .unwrap();
        let image = GrayImage::from_fn(matrix.getWidth(), matrix.getHeight(), |x, y| {
            Luma([if matrix.get(x, y) { 0 } else { 255 }])
        });

        let decoded = RxingBarcodeDecoder.decode(&Frame::from_gray(image)).unwrap();

        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].data, "LOT-4711");
        assert_eq!(decoded[0].symbology, "QRCODE");
        assert!(decoded[0].bbox.is_valid());
        assert!(decoded[0].bbox.right() <= 200);
    }

    #[test]
    fn test_scan_line_outline_gets_height() {
        let bbox = outline_box(&[(10, 40), (90, 40)], 1).unwrap();
        assert_eq!(bbox, Rectangle::new(10, 40, 80, 1));
        assert!(outline_box(&[], 1).is_none());
    }

    #[test]
    fn test_symbology_name() {
        assert_eq!(symbology_name("EAN_13"), "EAN13");
        assert_eq!(symbology_name("CODE_128"), "CODE128");
    }
}

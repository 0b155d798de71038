//! Label region localization
//!
//! Canny edges, outer contours, largest enclosed area, then an aspect-ratio
//! gate on the bounding rectangle. A miss means "try the next frame".

use image::GrayImage;
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::edges::canny;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capture::frame::Frame;
use crate::error::StageFailure;
use crate::vision::geometry::{bounding_rect, contour_area, Rectangle};

/// Region locator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorSettings {
    /// Lower hysteresis threshold for edge detection
    pub canny_low: f32,
    /// Upper hysteresis threshold for edge detection
    pub canny_high: f32,
    /// Smallest accepted width/height ratio
    pub min_aspect: f32,
    /// Largest accepted width/height ratio
    pub max_aspect: f32,
}

impl Default for LocatorSettings {
    fn default() -> Self {
        Self {
            canny_low: 50.0,
            canny_high: 150.0,
            min_aspect: 0.5,
            max_aspect: 2.0,
        }
    }
}

/// Finds the candidate label rectangle in a frame
#[derive(Debug, Clone, Default)]
pub struct RegionLocator {
    settings: LocatorSettings,
}

impl RegionLocator {
    pub fn new(settings: LocatorSettings) -> Self {
        Self { settings }
    }

    /// Locate the label region, or report why none was accepted
    pub fn locate(&self, frame: &Frame) -> Result<Rectangle, StageFailure> {
        if frame.is_empty() {
            return Err(StageFailure::EmptyFrame);
        }
        self.locate_gray(&frame.to_gray())
    }

    /// Locate the label region in an already reduced luminance plane
    pub fn locate_gray(&self, gray: &GrayImage) -> Result<Rectangle, StageFailure> {
        let edges = canny(gray, self.settings.canny_low, self.settings.canny_high);
        let contours = find_contours::<i32>(&edges);

        let largest = largest_outer_contour(&contours)
            .ok_or_else(|| StageFailure::RegionNotFound("no contours in frame".to_string()))?;

        let region = bounding_rect(&largest.points)
            .ok_or_else(|| StageFailure::RegionNotFound("largest contour is empty".to_string()))?;

        let aspect = region.aspect_ratio();
        debug!(
            "Largest contour bounds {}x{} at ({}, {}), aspect {:.2}",
            region.width, region.height, region.x, region.y, aspect
        );

        if aspect < self.settings.min_aspect || aspect > self.settings.max_aspect {
            return Err(StageFailure::RegionNotFound(format!(
                "aspect ratio {:.2} outside [{}, {}]",
                aspect, self.settings.min_aspect, self.settings.max_aspect
            )));
        }

        Ok(region)
    }
}

/// Top-level outer border with the largest enclosed area
///
/// Exact ties keep the first contour in tracing order.
pub(crate) fn largest_outer_contour(contours: &[Contour<i32>]) -> Option<&Contour<i32>> {
    let mut best: Option<(&Contour<i32>, f64)> = None;
    for contour in contours {
        if contour.border_type != BorderType::Outer || contour.parent.is_some() {
            continue;
        }
        let area = contour_area(&contour.points);
        match best {
            Some((_, best_area)) if area <= best_area => {}
            _ => best = Some((contour, area)),
        }
    }
    best.map(|(contour, _)| contour)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{blank_frame, frame_with_rect};

    fn assert_close(actual: u32, expected: u32, tolerance: u32) {
        assert!(
            actual.abs_diff(expected) <= tolerance,
            "expected {} +/- {}, got {}",
            expected,
            tolerance,
            actual
        );
    }

    #[test]
    fn test_blank_frame_not_found() {
        let result = RegionLocator::default().locate(&blank_frame(120, 90, 255));
        assert!(matches!(result, Err(StageFailure::RegionNotFound(_))));
    }

    #[test]
    fn test_empty_frame() {
        let result = RegionLocator::default().locate(&Frame::empty());
        assert_eq!(result, Err(StageFailure::EmptyFrame));
    }

    #[test]
    fn test_finds_dark_label() {
        let frame = frame_with_rect(200, 150, (50, 40, 80, 60));
        let region = RegionLocator::default().locate(&frame).unwrap();

        assert_close(region.x, 50, 3);
        assert_close(region.y, 40, 3);
        assert_close(region.width, 80, 5);
        assert_close(region.height, 60, 5);
    }

    #[test]
    fn test_rejects_wide_strip() {
        let frame = frame_with_rect(200, 150, (10, 60, 180, 20));
        let result = RegionLocator::default().locate(&frame);
        assert!(matches!(result, Err(StageFailure::RegionNotFound(ref msg)) if msg.contains("aspect")));
    }

    #[test]
    fn test_aspect_limits_are_configurable() {
        let settings = LocatorSettings {
            max_aspect: 12.0,
            ..Default::default()
        };
        let frame = frame_with_rect(200, 150, (10, 60, 180, 20));
        assert!(RegionLocator::new(settings).locate(&frame).is_ok());
    }

    #[test]
    fn test_largest_contour_wins() {
        let mut gray = blank_frame(240, 160, 255).to_gray();
        crate::test_utils::fill_rect(&mut gray, (10, 10, 30, 30), 0);
        crate::test_utils::fill_rect(&mut gray, (100, 40, 100, 80), 0);

        let region = RegionLocator::default().locate_gray(&gray).unwrap();
        assert_close(region.x, 100, 3);
        assert_close(region.width, 100, 5);
    }
}

//! Perspective correction of the located label
//!
//! The dominant contour around the located region is reduced to a polygon.
//! A quadrilateral is warped onto an axis-aligned rectangle; anything else
//! leaves the frame as it is.

use imageproc::contours::find_contours;
use imageproc::edges::canny;
use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capture::frame::Frame;
use crate::error::StageFailure;
use crate::vision::geometry::{
    approximate_closed_polygon, closed_arc_length, distance, order_corners, Rectangle,
};
use crate::vision::locate::largest_outer_contour;
use crate::vision::StageOutput;

const EDGE_LOW: f32 = 50.0;
const EDGE_HIGH: f32 = 150.0;

/// Rectifier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RectifySettings {
    /// Polygon tolerance as a fraction of the contour perimeter
    pub epsilon_fraction: f64,
    /// Pixels added around the located region when searching for the outline
    pub search_margin: u32,
}

impl Default for RectifySettings {
    fn default() -> Self {
        Self {
            epsilon_fraction: 0.02,
            search_margin: 10,
        }
    }
}

/// Projective 2-D transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    /// Map a point through the transform
    #[inline]
    pub fn apply(&self, p: (f64, f64)) -> (f64, f64) {
        let v = self.h * Vector3::new(p.0, p.1, 1.0);
        (v[0] / v[2], v[1] / v[2])
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }

    /// Solve `dst ~ H * src` from four correspondences
    ///
    /// Points are Hartley-normalized before the 8x8 solve. Returns `None`
    /// for degenerate (collinear) configurations.
    pub fn from_quad(src: &[(f64, f64); 4], dst: &[(f64, f64); 4]) -> Option<Self> {
        let (src_n, t_src) = normalize_quad(src);
        let (dst_n, t_dst) = normalize_quad(dst);

        let mut a = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();

        for k in 0..4 {
            let (x, y) = src_n[k];
            let (u, v) = dst_n[k];

            let r0 = 2 * k;
            a[(r0, 0)] = x;
            a[(r0, 1)] = y;
            a[(r0, 2)] = 1.0;
            a[(r0, 6)] = -u * x;
            a[(r0, 7)] = -u * y;
            b[r0] = u;

            let r1 = 2 * k + 1;
            a[(r1, 3)] = x;
            a[(r1, 4)] = y;
            a[(r1, 5)] = 1.0;
            a[(r1, 6)] = -v * x;
            a[(r1, 7)] = -v * y;
            b[r1] = v;
        }

        let x = a.lu().solve(&b)?;
        let hn = Matrix3::new(x[0], x[1], x[2], x[3], x[4], x[5], x[6], x[7], 1.0);

        let h = t_dst.try_inverse()? * hn * t_src;
        let scale = h[(2, 2)];
        if scale.abs() < 1e-12 || !h.iter().all(|v| v.is_finite()) {
            return None;
        }

        Some(Self::new(h / scale))
    }
}

/// Translate to the centroid and scale to a mean distance of sqrt(2)
fn normalize_quad(pts: &[(f64, f64); 4]) -> ([(f64, f64); 4], Matrix3<f64>) {
    let cx = pts.iter().map(|p| p.0).sum::<f64>() / 4.0;
    let cy = pts.iter().map(|p| p.1).sum::<f64>() / 4.0;
    let mean_dist = pts
        .iter()
        .map(|p| ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt())
        .sum::<f64>()
        / 4.0;

    let s = if mean_dist > 1e-12 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    (pts.map(|(x, y)| (s * (x - cx), s * (y - cy))), t)
}

/// Warps a skewed label onto a fronto-parallel rectangle
#[derive(Debug, Clone, Default)]
pub struct PerspectiveRectifier {
    settings: RectifySettings,
}

impl PerspectiveRectifier {
    pub fn new(settings: RectifySettings) -> Self {
        Self { settings }
    }

    /// Rectify, returning the input unchanged when no quadrilateral is found
    pub fn rectify(&self, frame: &Frame, region: &Rectangle) -> StageOutput<Frame> {
        match self.try_rectify(frame, region) {
            Ok(rectified) => StageOutput::ok(rectified),
            Err(cause) => {
                debug!("Rectification skipped: {}", cause);
                StageOutput::degraded(frame.clone(), cause)
            }
        }
    }

    pub fn try_rectify(&self, frame: &Frame, region: &Rectangle) -> Result<Frame, StageFailure> {
        if frame.is_empty() {
            return Err(StageFailure::EmptyFrame);
        }

        let corners = self.find_quad(frame, region)?;
        self.warp_quad(frame, &corners)
    }

    /// Corner points of the label outline, ordered tl, tr, br, bl in frame coordinates
    pub fn find_quad(&self, frame: &Frame, region: &Rectangle) -> Result<[(f32, f32); 4], StageFailure> {
        let search = region.padded(self.settings.search_margin, frame.width(), frame.height());
        if !search.is_valid() {
            return Err(StageFailure::RectificationSkipped(
                "search region lies outside the frame".to_string(),
            ));
        }

        let gray = frame.crop(&search).to_gray();
        let edges = canny(&gray, EDGE_LOW, EDGE_HIGH);
        let contours = find_contours::<i32>(&edges);

        let dominant = largest_outer_contour(&contours).ok_or_else(|| {
            StageFailure::RectificationSkipped("no contour around region".to_string())
        })?;

        let epsilon = self.settings.epsilon_fraction * closed_arc_length(&dominant.points);
        let polygon = approximate_closed_polygon(&dominant.points, epsilon);
        if polygon.len() != 4 {
            return Err(StageFailure::RectificationSkipped(format!(
                "outline approximates to {} vertices",
                polygon.len()
            )));
        }

        let mut quad = [(0.0f32, 0.0f32); 4];
        for (slot, p) in quad.iter_mut().zip(&polygon) {
            *slot = ((p.x + search.x as i32) as f32, (p.y + search.y as i32) as f32);
        }

        Ok(order_corners(&quad))
    }

    /// Warp an ordered quadrilateral onto a rectangle sized by its longest edges
    pub fn warp_quad(&self, frame: &Frame, corners: &[(f32, f32); 4]) -> Result<Frame, StageFailure> {
        let [tl, tr, br, bl] = *corners;
        let width = distance(br, bl).max(distance(tr, tl)) as u32;
        let height = distance(tr, br).max(distance(tl, bl)) as u32;
        if width < 2 || height < 2 {
            return Err(StageFailure::RectificationSkipped(format!(
                "degenerate quadrilateral {}x{}",
                width, height
            )));
        }

        let (w, h) = (width as f64, height as f64);
        let dst = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];
        let src = corners.map(|(x, y)| (x as f64, y as f64));

        // Destination pixels are mapped back into the source frame
        let dst_to_src = Homography::from_quad(&dst, &src).ok_or_else(|| {
            StageFailure::RectificationSkipped("corner configuration is degenerate".to_string())
        })?;

        let rectified = warp(frame, &dst_to_src, width, height);
        debug!("Rectified quad {:?} to {}x{}", corners, width, height);
        Ok(rectified)
    }
}

/// Bilinear inverse warp over every channel with a constant-zero border
fn warp(frame: &Frame, dst_to_src: &Homography, width: u32, height: u32) -> Frame {
    let channels = frame.format().channels() as usize;
    let (src_w, src_h) = (frame.width() as i64, frame.height() as i64);
    let src = frame.data();
    let sample = |x: i64, y: i64, c: usize| -> f64 {
        if x < 0 || y < 0 || x >= src_w || y >= src_h {
            return 0.0;
        }
        src[(y as usize * src_w as usize + x as usize) * channels + c] as f64
    };

    let mut out = Vec::with_capacity(width as usize * height as usize * channels);
    for y in 0..height {
        for x in 0..width {
            let (sx, sy) = dst_to_src.apply((x as f64, y as f64));
            let x0 = sx.floor();
            let y0 = sy.floor();
            let fx = sx - x0;
            let fy = sy - y0;
            let (x0, y0) = (x0 as i64, y0 as i64);

            for c in 0..channels {
                let top = sample(x0, y0, c) * (1.0 - fx) + sample(x0 + 1, y0, c) * fx;
                let bottom = sample(x0, y0 + 1, c) * (1.0 - fx) + sample(x0 + 1, y0 + 1, c) * fx;
                let value = top * (1.0 - fy) + bottom * fy;
                out.push(value.round().clamp(0.0, 255.0) as u8);
            }
        }
    }

    Frame::new(out, width, height, frame.format()).unwrap_or_else(|_| Frame::empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{blank_frame, frame_with_circle, frame_with_quad};

    fn assert_point_close(a: (f64, f64), b: (f64, f64)) {
        assert!(
            (a.0 - b.0).abs() < 1e-6 && (a.1 - b.1).abs() < 1e-6,
            "{:?} != {:?}",
            a,
            b
        );
    }

    #[test]
    fn test_homography_maps_corners() {
        let src = [(0.0, 0.0), (99.0, 0.0), (99.0, 49.0), (0.0, 49.0)];
        let dst = [(12.0, 20.0), (130.0, 8.0), (140.0, 90.0), (5.0, 70.0)];
        let h = Homography::from_quad(&src, &dst).unwrap();
        for (s, d) in src.iter().zip(&dst) {
            assert_point_close(h.apply(*s), *d);
        }

        let back = h.inverse().unwrap();
        assert_point_close(back.apply(dst[2]), src[2]);
    }

    #[test]
    fn test_warp_axis_aligned_quad_is_crop() {
        let gray = image::GrayImage::from_fn(40, 30, |x, y| image::Luma([(x * 5 + y) as u8]));
        let frame = Frame::from_gray(gray);
        let corners = [(10.0, 5.0), (29.0, 5.0), (29.0, 19.0), (10.0, 19.0)];

        let rectified = PerspectiveRectifier::default().warp_quad(&frame, &corners).unwrap();
        let crop = frame.crop(&Rectangle::new(10, 5, 19, 14));
        assert_eq!(rectified.dimensions(), (19, 14));
        assert_eq!(rectified.data(), crop.data());
    }

    #[test]
    fn test_rectify_skewed_label() {
        let quad = [(60, 50), (150, 55), (140, 115), (55, 105)];
        let frame = frame_with_quad(220, 170, quad);
        let region = Rectangle::new(55, 50, 96, 66);

        let output = PerspectiveRectifier::default().rectify(&frame, &region);
        assert!(output.cause.is_none(), "{:?}", output.cause);

        let (w, h) = output.value.dimensions();
        assert!(w.abs_diff(90) <= 5, "width {}", w);
        assert!(h.abs_diff(60) <= 5, "height {}", h);

        // Label interior is dark
        let center = output.value.to_gray().get_pixel(w / 2, h / 2).0[0];
        assert!(center < 64, "center {}", center);
    }

    #[test]
    fn test_rectify_is_deterministic() {
        let frame = frame_with_quad(220, 170, [(60, 50), (150, 55), (140, 115), (55, 105)]);
        let region = Rectangle::new(55, 50, 96, 66);
        let rectifier = PerspectiveRectifier::default();

        let first = rectifier.rectify(&frame, &region);
        let second = rectifier.rectify(&frame, &region);
        assert_eq!(first.value.dimensions(), second.value.dimensions());
        assert_eq!(first.value.data(), second.value.data());
    }

    #[test]
    fn test_blank_region_returns_input() {
        let frame = blank_frame(80, 60, 255);
        let output = PerspectiveRectifier::default().rectify(&frame, &Rectangle::new(10, 10, 40, 30));
        assert!(matches!(output.cause, Some(StageFailure::RectificationSkipped(_))));
        assert_eq!(output.value.data(), frame.data());
    }

    #[test]
    fn test_round_outline_is_not_a_quad() {
        let frame = frame_with_circle(160, 160, (80, 80), 40);
        let output = PerspectiveRectifier::default().rectify(&frame, &Rectangle::new(40, 40, 81, 81));
        assert!(
            matches!(output.cause, Some(StageFailure::RectificationSkipped(ref msg)) if msg.contains("vertices")),
            "{:?}",
            output.cause
        );
        assert_eq!(output.value.dimensions(), (160, 160));
    }
}

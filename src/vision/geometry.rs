//! Geometry primitives shared by the locator, rectifier and extractors

use imageproc::geometry::approximate_polygon_dp;
use imageproc::point::Point;
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box with an optional 4-point outline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rectangle {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Corner points for non-axis-aligned detections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polygon: Option<[(i32, i32); 4]>,
}

impl Rectangle {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            polygon: None,
        }
    }

    /// Build from corner coordinates `(x1, y1, x2, y2)`, saturating at zero
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        let left = x1.min(x2).max(0.0);
        let top = y1.min(y2).max(0.0);
        let right = x1.max(x2).max(0.0);
        let bottom = y1.max(y2).max(0.0);
        Self::new(
            left as u32,
            top as u32,
            (right - left) as u32,
            (bottom - top) as u32,
        )
    }

    pub fn with_polygon(mut self, polygon: [(i32, i32); 4]) -> Self {
        self.polygon = Some(polygon);
        self
    }

    /// Exclusive right edge, saturating at `u32::MAX`
    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Width over height, zero for degenerate boxes
    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f32 / self.height as f32
    }

    /// A rectangle with positive width and height
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Intersect with a `width` x `height` frame
    pub fn clamp_to(&self, width: u32, height: u32) -> Rectangle {
        let x = self.x.min(width);
        let y = self.y.min(height);
        let right = self.right().min(width);
        let bottom = self.bottom().min(height);
        Rectangle {
            x,
            y,
            width: right - x,
            height: bottom - y,
            polygon: self.polygon,
        }
    }

    /// Grow by `padding` on every side, clamped to a `width` x `height` frame
    pub fn padded(&self, padding: u32, width: u32, height: u32) -> Rectangle {
        let x = self.x.saturating_sub(padding);
        let y = self.y.saturating_sub(padding);
        let right = self.right().saturating_add(padding).min(width);
        let bottom = self.bottom().saturating_add(padding).min(height);
        Rectangle::new(x, y, right.saturating_sub(x), bottom.saturating_sub(y))
    }
}

/// Signed shoelace area of a closed polygon, returned as an absolute value
pub fn contour_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }

    let mut twice_area = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = points[(i + 1) % points.len()];
        twice_area += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }

    (twice_area as f64 / 2.0).abs()
}

/// Perimeter of a closed polygon
pub fn closed_arc_length(points: &[Point<i32>]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let q = points[(i + 1) % points.len()];
            let dx = (q.x - p.x) as f64;
            let dy = (q.y - p.y) as f64;
            (dx * dx + dy * dy).sqrt()
        })
        .sum()
}

/// Inclusive axis-aligned bounding rectangle of a point set
pub fn bounding_rect(points: &[Point<i32>]) -> Option<Rectangle> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }

    Some(Rectangle::new(
        min_x.max(0) as u32,
        min_y.max(0) as u32,
        (max_x - min_x + 1) as u32,
        (max_y - min_y + 1) as u32,
    ))
}

/// Douglas-Peucker approximation of a closed contour
///
/// The contour is split at the point farthest from its first point and each
/// open half is simplified separately, so the seam between the last and first
/// traced points never survives as a spurious vertex.
pub fn approximate_closed_polygon(points: &[Point<i32>], epsilon: f64) -> Vec<Point<i32>> {
    if points.len() < 3 || epsilon <= 0.0 {
        return points.to_vec();
    }

    let start = points[0];
    let split = points
        .iter()
        .enumerate()
        .fold((0usize, 0i64), |(best, best_d), (i, p)| {
            let dx = (p.x - start.x) as i64;
            let dy = (p.y - start.y) as i64;
            let d = dx * dx + dy * dy;
            if d > best_d {
                (i, d)
            } else {
                (best, best_d)
            }
        })
        .0;

    if split == 0 {
        return vec![start];
    }

    let first_half = &points[..=split];
    let mut second_half: Vec<Point<i32>> = points[split..].to_vec();
    second_half.push(start);

    let mut polygon = approximate_polygon_dp(first_half, epsilon, false);
    let tail = approximate_polygon_dp(&second_half, epsilon, false);

    // Both halves repeat their shared endpoints
    polygon.pop();
    polygon.extend_from_slice(&tail[..tail.len().saturating_sub(1)]);
    polygon
}

/// Order four corners as top-left, top-right, bottom-right, bottom-left
///
/// Top-left has the smallest `x + y`, bottom-right the largest. With
/// `d = y - x`, top-right has the smallest `d` and bottom-left the largest.
/// Ties resolve to the earliest input point.
pub fn order_corners(points: &[(f32, f32); 4]) -> [(f32, f32); 4] {
    let pick = |key: fn(&(f32, f32)) -> f32, largest: bool| -> (f32, f32) {
        let mut best = points[0];
        for p in &points[1..] {
            let better = if largest { key(p) > key(&best) } else { key(p) < key(&best) };
            if better {
                best = *p;
            }
        }
        best
    };

    let sum = |p: &(f32, f32)| p.0 + p.1;
    let diff = |p: &(f32, f32)| p.1 - p.0;

    [
        pick(sum, false),
        pick(diff, false),
        pick(sum, true),
        pick(diff, true),
    ]
}

/// Euclidean distance between two points
pub fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(size: i32) -> Vec<Point<i32>> {
        let mut pts = Vec::new();
        for x in 0..size {
            pts.push(Point::new(x, 0));
        }
        for y in 0..size {
            pts.push(Point::new(size, y));
        }
        for x in (1..=size).rev() {
            pts.push(Point::new(x, size));
        }
        for y in (1..=size).rev() {
            pts.push(Point::new(0, y));
        }
        pts
    }

    #[test]
    fn test_contour_area_of_square() {
        let area = contour_area(&square(10));
        assert!((area - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_bounding_rect_is_inclusive() {
        let rect = bounding_rect(&square(10)).unwrap();
        assert_eq!(rect, Rectangle::new(0, 0, 11, 11));
    }

    #[test]
    fn test_closed_polygon_reduces_square_to_four_corners() {
        let contour = square(40);
        let epsilon = 0.02 * closed_arc_length(&contour);
        let approx = approximate_closed_polygon(&contour, epsilon);
        assert_eq!(approx.len(), 4, "got {:?}", approx);
    }

    #[test]
    fn test_order_corners() {
        let shuffled = [(90.0, 95.0), (10.0, 12.0), (12.0, 88.0), (95.0, 8.0)];
        let ordered = order_corners(&shuffled);
        assert_eq!(ordered[0], (10.0, 12.0));
        assert_eq!(ordered[1], (95.0, 8.0));
        assert_eq!(ordered[2], (90.0, 95.0));
        assert_eq!(ordered[3], (12.0, 88.0));
    }

    #[test]
    fn test_padded_clamps() {
        let rect = Rectangle::new(2, 3, 10, 10).padded(5, 14, 100);
        assert_eq!(rect, Rectangle::new(0, 0, 14, 18));
    }

    #[test]
    fn test_edges_saturate_near_u32_max() {
        let rect = Rectangle::new(u32::MAX - 2, u32::MAX - 1, 200, 20);
        assert_eq!(rect.right(), u32::MAX);
        assert_eq!(rect.bottom(), u32::MAX);

        let clamped = rect.clamp_to(80, 60);
        assert_eq!(clamped.x, 80);
        assert!(!clamped.is_valid());
        assert!(!rect.padded(5, 80, 60).is_valid());
    }

    #[test]
    fn test_from_corners_normalizes() {
        let rect = Rectangle::from_corners(30.0, 40.0, 10.0, 5.0);
        assert_eq!(rect, Rectangle::new(10, 5, 20, 35));
    }
}

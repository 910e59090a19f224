//! Image-plane geometry. All coordinates are pixels, y pointing down.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub fn midpoint(a: Point, b: Point) -> Point {
        Point::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
    }
}

impl From<(f32, f32)> for Point {
    fn from((x, y): (f32, f32)) -> Self {
        Point::new(f64::from(x), f64::from(y))
    }
}

impl From<[f64; 2]> for Point {
    fn from([x, y]: [f64; 2]) -> Self {
        Point::new(x, y)
    }
}

pub fn distance(a: Point, b: Point) -> f64 {
    (b.x - a.x).hypot(b.y - a.y)
}

/// `(b - a) x (p - a)`. Positive on one side of the line through `a`,`b`,
/// negative on the other, zero on it.
pub fn side(a: Point, b: Point, p: Point) -> f64 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Perpendicular distance from `p` to the infinite line through `a`,`b`.
pub fn distance_to_line(a: Point, b: Point, p: Point) -> f64 {
    let len = distance(a, b);
    if len <= f64::EPSILON {
        return distance(a, p);
    }
    side(a, b, p).abs() / len
}

/// Intersection of segment `p1->p2` with segment `p3->p4`.
///
/// Returns the parameter `t` along `p1->p2` in `[0, 1]`, or `None` for
/// parallel or non-overlapping segments.
pub fn segment_intersection(p1: Point, p2: Point, p3: Point, p4: Point) -> Option<f64> {
    let d1x = p2.x - p1.x;
    let d1y = p2.y - p1.y;
    let d2x = p4.x - p3.x;
    let d2y = p4.y - p3.y;

    let cross = d1x * d2y - d1y * d2x;
    if cross.abs() < 1e-12 {
        return None;
    }

    let dx = p3.x - p1.x;
    let dy = p3.y - p1.y;
    let t = (dx * d2y - dy * d2x) / cross;
    let u = (dx * d1y - dy * d1x) / cross;

    const EPS: f64 = 1e-9;
    let range = -EPS..=(1.0 + EPS);
    if range.contains(&t) && range.contains(&u) {
        Some(t.clamp(0.0, 1.0))
    } else {
        None
    }
}

/// Converts a pixel length to meters with a calibration scale.
pub fn pixels_to_meters(pixels: f64, meters_per_pixel: f64) -> f64 {
    pixels * meters_per_pixel
}

/// Axis-aligned rectangle, inclusive bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub min: Point,
    pub max: Point,
}

impl Rect {
    pub fn bounding(points: &[Point]) -> Option<Rect> {
        let first = *points.first()?;
        let mut r = Rect { min: first, max: first };
        for p in &points[1..] {
            r.min.x = r.min.x.min(p.x);
            r.min.y = r.min.y.min(p.y);
            r.max.x = r.max.x.max(p.x);
            r.max.y = r.max.y.max(p.y);
        }
        Some(r)
    }

    pub fn expand(self, margin: f64) -> Rect {
        Rect {
            min: Point::new(self.min.x - margin, self.min.y - margin),
            max: Point::new(self.max.x + margin, self.max.y + margin),
        }
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn side_sign_flips_across_line() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(0.0, 10.0);
        let left = side(a, b, Point::new(-1.0, 5.0));
        let right = side(a, b, Point::new(1.0, 5.0));
        assert!(left * right < 0.0);
        assert_eq!(side(a, b, Point::new(0.0, 3.0)), 0.0);
    }

    #[test]
    fn perpendicular_segments_meet_halfway() {
        let t = segment_intersection(
            Point::new(0.0, -1.0),
            Point::new(0.0, 1.0),
            Point::new(-1.0, 0.0),
            Point::new(1.0, 0.0),
        );
        assert_relative_eq!(t.unwrap(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn parallel_and_short_segments_do_not_meet() {
        assert!(segment_intersection(
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(0.0, 1.0),
            Point::new(1.0, 1.0),
        )
        .is_none());
        // would cross the infinite line, but beyond the segment's end
        assert!(segment_intersection(
            Point::new(5.0, -1.0),
            Point::new(5.0, 1.0),
            Point::new(-1.0, 0.0),
            Point::new(1.0, 0.0),
        )
        .is_none());
    }

    #[test]
    fn line_distance() {
        let d = distance_to_line(Point::new(0.0, 0.0), Point::new(10.0, 0.0), Point::new(3.0, -4.0));
        assert_relative_eq!(d, 4.0);
        assert_relative_eq!(distance(Point::new(0.0, 0.0), Point::new(3.0, 4.0)), 5.0);
    }

    #[test]
    fn scale_conversion() {
        assert_relative_eq!(pixels_to_meters(200.0, 0.1), 20.0);
    }

    #[test]
    fn rect_bounds_and_margin() {
        let r = Rect::bounding(&[Point::new(10.0, 0.0), Point::new(30.0, 100.0), Point::new(20.0, 50.0)])
            .unwrap()
            .expand(5.0);
        assert!(r.contains(Point::new(6.0, -5.0)));
        assert!(!r.contains(Point::new(36.0, 50.0)));
        assert!(Rect::bounding(&[]).is_none());
    }
}

//! Virtual-line crossing detection.
//!
//! A crossing is a sign change of the cross product
//! `(line direction) x (point - line origin)` between a track's previous
//! and current reference point. The crossing instant is interpolated
//! linearly between the two frame timestamps at the point where the
//! signed distance reaches zero. Only the first crossing per line counts.
//!
//! A point sitting exactly on the line has not crossed yet. The crossing
//! completes once the track reaches the opposite side of where it was
//! before touching, and is stamped with the time it first reached the
//! line. Touching the line and backing away records nothing.

use speedcam_proto::LineId;

use crate::calibration::{Calibration, VirtualLine};
use crate::geometry::{segment_intersection, Point};
use crate::track::Track;

/// Interpolated time at which the step `prev -> cur` crosses `line`.
pub fn crossing_time(line: &VirtualLine, bounded: bool, prev: (Point, f64), cur: (Point, f64)) -> Option<f64> {
    path_crossing(line, bounded, &[prev, cur])
}

/// Crossing completed by the last point of `path` (oldest first), if any.
///
/// Points on the line are skipped back to the last one off it; that point
/// and the newest must lie on opposite sides.
pub fn path_crossing<'a, I>(line: &VirtualLine, bounded: bool, path: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a (Point, f64)>,
    I::IntoIter: DoubleEndedIterator,
{
    let mut back = path.into_iter().rev();
    let &(p1, t1) = back.next()?;
    let d1 = line.side(p1);
    if d1 == 0.0 {
        return None;
    }

    let mut touched = None;
    for &(p0, t0) in back {
        let d0 = line.side(p0);
        if d0 == 0.0 {
            touched = Some(t0);
            continue;
        }
        if d0.signum() == d1.signum() {
            return None;
        }
        if bounded && segment_intersection(p0, p1, line.a, line.b).is_none() {
            return None;
        }
        return Some(touched.unwrap_or_else(|| t0 + d0 / (d0 - d1) * (t1 - t0)));
    }
    None
}

/// Checks the track's latest point against both lines and records any new
/// crossings. Returns what was recorded, line A first.
pub fn update_crossings(track: &mut Track, cal: &Calibration) -> Vec<(LineId, f64)> {
    let mut recorded = Vec::new();
    for line in cal.lines() {
        if track.crossing(line.id).is_some() {
            continue;
        }
        if let Some(at) = path_crossing(line, cal.bounded(), track.history()) {
            if track.record_crossing(line.id, at) {
                recorded.push((line.id, at));
            }
        }
    }
    recorded
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use speedcam_vision::{BBox, Detection};

    fn vline(id: LineId, x: f64) -> VirtualLine {
        VirtualLine::new(id, Point::new(x, 0.0), Point::new(x, 100.0))
    }

    fn p(x: f64, t: f64) -> (Point, f64) {
        (Point::new(x, 50.0), t)
    }

    #[test]
    fn interpolates_between_frames() {
        let at = crossing_time(&vline(LineId::A, 300.0), false, p(290.0, 10.0), p(315.0, 10.1)).unwrap();
        assert_relative_eq!(at, 10.04, epsilon = 1e-12);
    }

    #[test]
    fn either_direction() {
        let at = crossing_time(&vline(LineId::A, 300.0), false, p(315.0, 10.0), p(290.0, 10.1)).unwrap();
        assert_relative_eq!(at, 10.06, epsilon = 1e-12);
    }

    #[test]
    fn same_side_is_not_a_crossing() {
        assert!(crossing_time(&vline(LineId::A, 300.0), false, p(200.0, 0.0), p(290.0, 0.1)).is_none());
    }

    #[test]
    fn landing_on_line_completes_on_the_far_side() {
        let line = vline(LineId::A, 300.0);
        assert!(crossing_time(&line, false, p(290.0, 1.0), p(300.0, 1.1)).is_none());
        assert!(crossing_time(&line, false, p(300.0, 1.1), p(310.0, 1.2)).is_none());

        let path = [p(290.0, 1.0), p(300.0, 1.1), p(300.0, 1.2), p(310.0, 1.3)];
        assert_eq!(path_crossing(&line, false, &path[..2]), None);
        assert_eq!(path_crossing(&line, false, &path[..3]), None);
        assert_eq!(path_crossing(&line, false, &path), Some(1.1));
    }

    #[test]
    fn touching_and_backing_off_is_not_a_crossing() {
        let cal = Calibration::new(vline(LineId::A, 300.0), vline(LineId::B, 500.0), 20.0, false).unwrap();
        let det = |cx: f32| Detection::new(2, 0.9, BBox::new(cx - 10.0, 30.0, cx + 10.0, 50.0));
        let mut t = Track::new(1, &det(290.0), 1.0, 8, 0);

        t.observe(&det(300.0), 1.1);
        assert!(update_crossings(&mut t, &cal).is_empty());
        t.observe(&det(292.0), 1.2);
        assert!(update_crossings(&mut t, &cal).is_empty());
        assert_eq!(t.crossing(LineId::A), None);

        // a later real pass still counts
        t.observe(&det(310.0), 1.3);
        let hits = update_crossings(&mut t, &cal);
        assert_eq!(hits.len(), 1);
        assert_relative_eq!(hits[0].1, 1.2 + 0.1 * 8.0 / 18.0, epsilon = 1e-9);
    }

    #[test]
    fn bounded_line_requires_passing_between_endpoints() {
        let line = vline(LineId::A, 300.0);
        let below = |x: f64, t: f64| (Point::new(x, 150.0), t);
        assert!(crossing_time(&line, true, below(290.0, 0.0), below(310.0, 0.1)).is_none());
        assert!(crossing_time(&line, false, below(290.0, 0.0), below(310.0, 0.1)).is_some());
        assert!(crossing_time(&line, true, p(290.0, 0.0), p(310.0, 0.1)).is_some());
    }

    #[test]
    fn jitter_after_first_crossing_is_ignored() {
        let cal = Calibration::new(vline(LineId::A, 300.0), vline(LineId::B, 500.0), 20.0, false).unwrap();
        let det = |cx: f32| Detection::new(2, 0.9, BBox::new(cx - 10.0, 30.0, cx + 10.0, 50.0));
        let mut t = Track::new(1, &det(295.0), 1.0, 8, 0);

        t.observe(&det(305.0), 1.1);
        assert_eq!(update_crossings(&mut t, &cal).len(), 1);
        let first = t.crossing(LineId::A).unwrap();
        assert_relative_eq!(first, 1.05, epsilon = 1e-9);

        // detector jitter back and forth over the line
        for (k, cx) in [298.0, 303.0, 299.0].into_iter().enumerate() {
            t.observe(&det(cx), 1.2 + 0.1 * k as f64);
            assert!(update_crossings(&mut t, &cal).is_empty());
        }
        assert_eq!(t.crossing(LineId::A), Some(first));
        assert_eq!(t.crossing(LineId::B), None);
    }

    #[test]
    fn both_lines_in_one_step() {
        let cal = Calibration::new(vline(LineId::A, 300.0), vline(LineId::B, 310.0), 20.0, false).unwrap();
        let det = |cx: f32| Detection::new(2, 0.9, BBox::new(cx - 10.0, 30.0, cx + 10.0, 50.0));
        let mut t = Track::new(1, &det(290.0), 0.0, 8, 0);
        t.observe(&det(330.0), 0.4);
        let hits = update_crossings(&mut t, &cal);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, LineId::A);
        assert_relative_eq!(hits[0].1, 0.1, epsilon = 1e-9);
        assert_relative_eq!(hits[1].1, 0.2, epsilon = 1e-9);
    }
}

use image::RgbImage;
use speedcam_proto::{LineId, VehicleClass};
use speedcam_vision::{BBox, Detection};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crate::error::TransitionError;
use crate::geometry::{self, Point};

pub type TrackId = u64;

/// Track lifecycle. `Completed` and `Lost` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStatus {
    /// Seen fewer than the confirmation count of consecutive frames.
    Tentative,
    Active,
    /// Both crossings recorded and the event emitted.
    Completed,
    /// Dropped without an event.
    Lost,
}

impl TrackStatus {
    pub fn can_become(self, next: TrackStatus) -> bool {
        use TrackStatus::*;
        matches!(
            (self, next),
            (Tentative, Active) | (Active, Completed) | (Tentative, Lost) | (Active, Lost)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TrackStatus::Completed | TrackStatus::Lost)
    }
}

/// A frame region kept for color classification.
#[derive(Debug, Clone)]
pub struct ColorSample {
    pub bbox: BBox,
    pub frame: Arc<RgbImage>,
}

impl ColorSample {
    pub fn area(&self) -> f32 {
        self.bbox.area()
    }

    /// The bbox clipped to the frame. Empty when they do not overlap.
    pub fn crop(&self) -> RgbImage {
        let (w, h) = self.frame.dimensions();
        let clip = |v: f32, max: u32| -> u32 {
            if v.is_nan() { 0 } else { v.clamp(0.0, max as f32) as u32 }
        };
        let x0 = clip(self.bbox.x1.floor(), w);
        let y0 = clip(self.bbox.y1.floor(), h);
        let x1 = clip(self.bbox.x2.ceil(), w);
        let y1 = clip(self.bbox.y2.ceil(), h);
        if x1 <= x0 || y1 <= y0 {
            return RgbImage::new(0, 0);
        }
        image::imageops::crop_imm(&*self.frame, x0, y0, x1 - x0, y1 - y0).to_image()
    }
}

/// Engine-side identity of one physical vehicle.
#[derive(Debug, Clone)]
pub struct Track {
    id: TrackId,
    status: TrackStatus,
    bbox: BBox,
    class_votes: BTreeMap<VehicleClass, u32>,

    history: VecDeque<(Point, f64)>,
    history_len: usize,
    // pixels per second of the reference point, smoothed
    vx: f64,
    vy: f64,

    first_seen: f64,
    last_seen: f64,
    hits: u32,
    streak: u32,

    crossing_a: Option<f64>,
    crossing_b: Option<f64>,

    color_samples: Vec<ColorSample>,
    color_capacity: usize,
}

impl Track {
    pub(crate) fn new(id: TrackId, det: &Detection, ts: f64, history_len: usize, color_capacity: usize) -> Self {
        let mut history = VecDeque::with_capacity(history_len.max(2));
        history.push_back((Point::from(det.bbox.bottom_center()), ts));
        let mut class_votes = BTreeMap::new();
        class_votes.insert(det.vehicle_class(), 1);
        Self {
            id,
            status: TrackStatus::Tentative,
            bbox: det.bbox,
            class_votes,
            history,
            history_len: history_len.max(2),
            vx: 0.0,
            vy: 0.0,
            first_seen: ts,
            last_seen: ts,
            hits: 1,
            streak: 1,
            crossing_a: None,
            crossing_b: None,
            color_samples: Vec::new(),
            color_capacity,
        }
    }

    pub fn id(&self) -> TrackId { self.id }
    pub fn status(&self) -> TrackStatus { self.status }
    pub fn bbox(&self) -> BBox { self.bbox }
    pub fn first_seen(&self) -> f64 { self.first_seen }
    pub fn last_seen(&self) -> f64 { self.last_seen }
    pub fn hits(&self) -> u32 { self.hits }
    pub fn streak(&self) -> u32 { self.streak }
    pub fn velocity(&self) -> (f64, f64) { (self.vx, self.vy) }

    /// Reference points with their timestamps, oldest first.
    pub fn history(&self) -> impl DoubleEndedIterator<Item = &(Point, f64)> {
        self.history.iter()
    }

    /// Majority class over all matched detections; ties go to the lower variant.
    pub fn vehicle_class(&self) -> VehicleClass {
        let mut best = (VehicleClass::Other, 0);
        for (&class, &n) in &self.class_votes {
            if n > best.1 {
                best = (class, n);
            }
        }
        best.0
    }

    /// Last bbox moved along the velocity estimate to time `ts`.
    pub fn predicted_bbox(&self, ts: f64) -> BBox {
        let dt = (ts - self.last_seen).max(0.0);
        let dx = (self.vx * dt) as f32;
        let dy = (self.vy * dt) as f32;
        BBox::new(self.bbox.x1 + dx, self.bbox.y1 + dy, self.bbox.x2 + dx, self.bbox.y2 + dy)
    }

    pub(crate) fn observe(&mut self, det: &Detection, ts: f64) {
        let p = Point::from(det.bbox.bottom_center());
        if let Some(&(prev, prev_ts)) = self.history.back() {
            let dt = ts - prev_ts;
            if dt > 0.0 {
                let (nx, ny) = ((p.x - prev.x) / dt, (p.y - prev.y) / dt);
                if self.history.len() == 1 {
                    self.vx = nx;
                    self.vy = ny;
                } else {
                    self.vx = 0.7 * self.vx + 0.3 * nx;
                    self.vy = 0.7 * self.vy + 0.3 * ny;
                }
            }
        }
        if self.history.len() >= self.history_len {
            self.history.pop_front();
        }
        self.history.push_back((p, ts));

        self.bbox = det.bbox;
        *self.class_votes.entry(det.vehicle_class()).or_insert(0) += 1;
        self.last_seen = ts;
        self.hits += 1;
        self.streak += 1;
    }

    pub(crate) fn mark_missed(&mut self) {
        self.streak = 0;
    }

    pub(crate) fn transition(&mut self, next: TrackStatus) -> Result<(), TransitionError> {
        if !self.status.can_become(next) {
            return Err(TransitionError { id: self.id, from: self.status, to: next });
        }
        self.status = next;
        Ok(())
    }

    pub fn crossing(&self, line: LineId) -> Option<f64> {
        match line {
            LineId::A => self.crossing_a,
            LineId::B => self.crossing_b,
        }
    }

    /// Stores the crossing time unless one is already recorded for `line`.
    pub(crate) fn record_crossing(&mut self, line: LineId, at: f64) -> bool {
        let slot = match line {
            LineId::A => &mut self.crossing_a,
            LineId::B => &mut self.crossing_b,
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(at);
        true
    }

    pub fn has_any_crossing(&self) -> bool {
        self.crossing_a.is_some() || self.crossing_b.is_some()
    }

    /// Keeps the `color_capacity` largest samples seen so far.
    pub(crate) fn offer_color_sample(&mut self, sample: ColorSample) {
        if self.color_capacity == 0 || !sample.bbox.is_valid() {
            return;
        }
        if self.color_samples.len() < self.color_capacity {
            self.color_samples.push(sample);
            return;
        }
        if let Some((i, smallest)) = self
            .color_samples
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.area().total_cmp(&b.1.area()))
        {
            if sample.area() > smallest.area() {
                self.color_samples[i] = sample;
            }
        }
    }

    pub fn color_sample_count(&self) -> usize {
        self.color_samples.len()
    }

    /// Largest-area sample; the first one wins among equals.
    pub fn best_color_sample(&self) -> Option<&ColorSample> {
        self.color_samples
            .iter()
            .reduce(|best, s| if s.area() > best.area() { s } else { best })
    }

    /// Total pixel distance travelled across the kept history.
    pub fn path_length_px(&self) -> f64 {
        self.history
            .iter()
            .zip(self.history.iter().skip(1))
            .map(|(a, b)| geometry::distance(a.0, b.0))
            .sum()
    }

    pub fn history_span_s(&self) -> f64 {
        match (self.history.front(), self.history.back()) {
            (Some(a), Some(b)) => b.1 - a.1,
            _ => 0.0,
        }
    }

    pub fn snapshot(&self) -> TrackSnapshot {
        TrackSnapshot {
            id: self.id,
            status: self.status,
            vehicle_class: self.vehicle_class(),
            bbox: self.bbox,
            last_seen: self.last_seen,
            crossing_a: self.crossing_a,
            crossing_b: self.crossing_b,
        }
    }
}

/// Read-only copy of a live track handed to callers outside the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSnapshot {
    pub id: TrackId,
    pub status: TrackStatus,
    pub vehicle_class: VehicleClass,
    pub bbox: BBox,
    pub last_seen: f64,
    pub crossing_a: Option<f64>,
    pub crossing_b: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Rgb;

    fn det_at(cx: f32, class_id: i32) -> Detection {
        Detection::new(class_id, 0.8, BBox::new(cx - 50.0, 200.0, cx + 50.0, 260.0))
    }

    fn frame() -> Arc<RgbImage> {
        Arc::new(RgbImage::from_pixel(640, 480, Rgb([200, 0, 0])))
    }

    #[test]
    fn legal_transitions_only() {
        use TrackStatus::*;
        assert!(Tentative.can_become(Active));
        assert!(Active.can_become(Completed));
        assert!(Tentative.can_become(Lost));
        assert!(!Tentative.can_become(Completed));
        assert!(!Lost.can_become(Active));
        assert!(!Completed.can_become(Lost));
        assert!(!Active.can_become(Tentative));
    }

    #[test]
    fn transition_rejects_emit_from_lost() {
        let mut t = Track::new(1, &det_at(100.0, 2), 0.0, 8, 3);
        t.transition(TrackStatus::Lost).unwrap();
        let err = t.transition(TrackStatus::Completed).unwrap_err();
        assert_eq!(err.from, TrackStatus::Lost);
        assert_eq!(t.status(), TrackStatus::Lost);
    }

    #[test]
    fn history_is_bounded_and_velocity_tracks_motion() {
        let mut t = Track::new(1, &det_at(100.0, 2), 0.0, 4, 0);
        for k in 1..10 {
            t.observe(&det_at(100.0 + 20.0 * k as f32, 2), 0.1 * k as f64);
        }
        assert_eq!(t.history().count(), 4);
        assert_relative_eq!(t.velocity().0, 200.0, epsilon = 1e-6);
        assert_eq!(t.hits(), 10);
        let p = t.predicted_bbox(t.last_seen() + 0.5);
        assert_relative_eq!(p.x1, t.bbox().x1 + 100.0, epsilon = 1e-3);
    }

    #[test]
    fn crossing_recorded_once() {
        let mut t = Track::new(1, &det_at(100.0, 2), 0.0, 8, 0);
        assert!(t.record_crossing(LineId::A, 1.0));
        assert!(!t.record_crossing(LineId::A, 2.0));
        assert_eq!(t.crossing(LineId::A), Some(1.0));
        assert_eq!(t.crossing(LineId::B), None);
    }

    #[test]
    fn miss_resets_streak_not_hits() {
        let mut t = Track::new(1, &det_at(100.0, 2), 0.0, 8, 0);
        t.observe(&det_at(110.0, 2), 0.1);
        t.mark_missed();
        assert_eq!(t.streak(), 0);
        assert_eq!(t.hits(), 2);
    }

    #[test]
    fn class_is_majority_vote() {
        let mut t = Track::new(1, &det_at(100.0, 7), 0.0, 8, 0);
        t.observe(&det_at(110.0, 2), 0.1);
        t.observe(&det_at(120.0, 2), 0.2);
        assert_eq!(t.vehicle_class(), VehicleClass::Car);
    }

    #[test]
    fn keeps_largest_color_samples() {
        let mut t = Track::new(1, &det_at(100.0, 2), 0.0, 8, 2);
        let f = frame();
        for w in [10.0, 40.0, 20.0, 30.0] {
            t.offer_color_sample(ColorSample { bbox: BBox::new(0.0, 0.0, w, 10.0), frame: f.clone() });
        }
        assert_eq!(t.color_sample_count(), 2);
        assert_eq!(t.best_color_sample().unwrap().bbox.x2, 40.0);
        let areas: Vec<f32> = t.color_samples.iter().map(ColorSample::area).collect();
        assert!(areas.contains(&300.0) && areas.contains(&400.0));
    }

    #[test]
    fn crop_is_clipped_to_frame() {
        let s = ColorSample { bbox: BBox::new(600.0, 460.0, 700.0, 520.0), frame: frame() };
        assert_eq!(s.crop().dimensions(), (40, 20));
        let outside = ColorSample { bbox: BBox::new(700.0, 0.0, 800.0, 10.0), frame: frame() };
        assert_eq!(outside.crop().dimensions(), (0, 0));
    }

    #[test]
    fn path_length() {
        let mut t = Track::new(1, &det_at(0.0, 2), 0.0, 8, 0);
        t.observe(&det_at(30.0, 2), 0.1);
        t.observe(&det_at(70.0, 2), 0.2);
        assert_relative_eq!(t.path_length_px(), 70.0);
        assert_relative_eq!(t.history_span_s(), 0.2);
    }
}

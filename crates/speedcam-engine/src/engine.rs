use image::RgbImage;
use speedcam_proto::SpeedEvent;
use speedcam_vision::color::ColorClassifier;
use speedcam_vision::Detection;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::association::associate;
use crate::calibration::{Calibration, CalibrationConfig};
use crate::crossing::update_crossings;
use crate::emitter::{evaluate, EmitterConfig, Resolution};
use crate::error::{CalibrationError, FrameError};
use crate::geometry::Point;
use crate::store::{Insert, TrackStore};
use crate::track::{ColorSample, TrackId, TrackSnapshot, TrackStatus};
use crate::EngineConfig;

/// One frame's worth of input.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Capture time in seconds; must increase from frame to frame.
    pub ts: f64,
    pub detections: Vec<Detection>,
    /// Decoded frame, if available, for color sampling.
    pub image: Option<Arc<RgbImage>>,
}

impl Frame {
    pub fn new(ts: f64, detections: Vec<Detection>) -> Self {
        Self { ts, detections, image: None }
    }

    pub fn with_image(mut self, image: Arc<RgbImage>) -> Self {
        self.image = Some(image);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub events: Vec<SpeedEvent>,
    pub created: Vec<TrackId>,
    pub lost: Vec<TrackId>,
    pub live_tracks: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub frames_processed: u64,
    pub frames_rejected: u64,
    pub detections_dropped: u64,
    pub tracks_created: u64,
    pub tracks_completed: u64,
    pub tracks_lost: u64,
    pub events_suppressed: u64,
}

/// Single-writer frame processor. Frames must be fed in capture order.
pub struct SpeedEngine {
    cfg: EngineConfig,
    calibration: Calibration,
    staged: Option<Calibration>,
    store: TrackStore,
    classifier: Box<dyn ColorClassifier>,
    last_ts: Option<f64>,
    stats: EngineStats,
}

impl SpeedEngine {
    pub fn new(cfg: EngineConfig, calibration: Calibration, classifier: Box<dyn ColorClassifier>) -> Self {
        let store = TrackStore::new(cfg.max_tracks, cfg.history_len, cfg.color_samples);
        Self { cfg, calibration, staged: None, store, classifier, last_ts: None, stats: EngineStats::default() }
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn live_tracks(&self) -> usize {
        self.store.len()
    }

    pub fn snapshot(&self) -> Vec<TrackSnapshot> {
        self.store.iter().map(|t| t.snapshot()).collect()
    }

    /// Stages a new calibration. It takes effect at the start of the next
    /// frame, never in the middle of one.
    pub fn reconfigure(&mut self, calibration: Calibration) {
        self.staged = Some(calibration);
    }

    /// Validates a calibration section and stages it. On error the current
    /// calibration stays in force.
    pub fn stage_calibration_config(&mut self, cfg: &CalibrationConfig) -> Result<(), CalibrationError> {
        let cal = Calibration::from_config(cfg)?;
        self.reconfigure(cal);
        Ok(())
    }

    pub fn process_frame(&mut self, frame: Frame) -> Result<FrameReport, FrameError> {
        let now = frame.ts;
        if !now.is_finite() {
            self.stats.frames_rejected += 1;
            return Err(FrameError::NonFiniteTimestamp { ts: now });
        }
        if let Some(last) = self.last_ts {
            if now <= last {
                self.stats.frames_rejected += 1;
                return Err(FrameError::NonMonotonic { ts: now, last });
            }
        }
        self.last_ts = Some(now);
        self.stats.frames_processed += 1;

        let mut report = FrameReport::default();
        self.apply_staged_calibration(&mut report);

        for t in self.store.evict_stale(now, self.cfg.staleness_timeout_s) {
            debug!("engine: track {} lost (unseen since {:.3})", t.id(), t.last_seen());
            report.lost.push(t.id());
        }

        let dets = self.usable_detections(frame.detections);
        let assignment = associate(self.store.iter(), &dets, now, self.cfg.iou_threshold, self.cfg.class_agnostic);

        let mut updated: Vec<TrackId> = Vec::with_capacity(assignment.matches.len());
        for &(id, di) in &assignment.matches {
            let det = &dets[di];
            if self.store.upsert_matched(id, det, now) {
                self.sample_color(id, det, frame.image.as_ref());
                updated.push(id);
            }
        }

        for &id in &assignment.unmatched_tracks {
            if let Some(t) = self.store.get_mut(id) {
                t.mark_missed();
            }
        }

        for &di in &assignment.unmatched_detections {
            let det = &dets[di];
            let id = match self.store.insert_new(det, now) {
                Insert::Created(id) => id,
                Insert::CreatedEvicting { id, evicted } => {
                    debug!("engine: track bound reached, evicted tentative track {}", evicted.id());
                    report.lost.push(evicted.id());
                    id
                }
                Insert::Full => {
                    warn!("engine: {} live tracks, detection left untracked", self.store.len());
                    continue;
                }
            };
            self.sample_color(id, det, frame.image.as_ref());
            report.created.push(id);
        }

        for &id in &updated {
            let Some(t) = self.store.get_mut(id) else { continue };
            for (line, at) in update_crossings(t, &self.calibration) {
                debug!("engine: track {} crossed line {:?} at {:.4}", id, line, at);
            }
        }

        let confirmed: Vec<TrackId> = self
            .store
            .iter()
            .filter(|t| t.status() == TrackStatus::Tentative && t.streak() >= self.cfg.confirm_hits)
            .map(|t| t.id())
            .collect();
        for id in confirmed {
            let Some(t) = self.store.get_mut(id) else { continue };
            match t.transition(TrackStatus::Active) {
                Ok(()) => debug!("engine: track {} confirmed", id),
                Err(e) => warn!("engine: {}", e),
            }
        }

        self.resolve_active(&mut report);

        self.stats.tracks_created += report.created.len() as u64;
        self.stats.tracks_lost += report.lost.len() as u64;
        self.stats.tracks_completed += report.events.len() as u64;
        report.live_tracks = self.store.len();
        Ok(report)
    }

    fn apply_staged_calibration(&mut self, report: &mut FrameReport) {
        let Some(cal) = self.staged.take() else { return };
        if cal == self.calibration {
            return;
        }
        let partial: Vec<TrackId> = self.store.iter().filter(|t| t.has_any_crossing()).map(|t| t.id()).collect();
        for id in partial {
            if self.store.remove_as(id, TrackStatus::Lost).is_some() {
                report.lost.push(id);
            }
        }
        info!(
            "engine: calibration applied ({:.2} m between lines, {} partially timed tracks dropped)",
            cal.distance_m(),
            report.lost.len()
        );
        self.calibration = cal;
    }

    fn usable_detections(&mut self, dets: Vec<Detection>) -> Vec<Detection> {
        let roi = self.cfg.roi_margin_px.map(|m| self.calibration.region_of_interest(m));
        let before = dets.len();
        let kept: Vec<Detection> = dets
            .into_iter()
            .filter(|d| d.bbox.is_valid() && d.conf.is_finite())
            .filter(|d| roi.map_or(true, |r| r.contains(Point::from(d.bbox.bottom_center()))))
            .collect();
        let dropped = before - kept.len();
        if dropped > 0 {
            debug!("engine: dropped {} unusable detections", dropped);
            self.stats.detections_dropped += dropped as u64;
        }
        kept
    }

    fn sample_color(&mut self, id: TrackId, det: &Detection, image: Option<&Arc<RgbImage>>) {
        let (Some(frame), Some(t)) = (image, self.store.get_mut(id)) else { return };
        t.offer_color_sample(ColorSample { bbox: det.bbox, frame: frame.clone() });
    }

    fn resolve_active(&mut self, report: &mut FrameReport) {
        let cfg = EmitterConfig {
            min_crossing_interval_s: self.cfg.min_crossing_interval_s,
            speed_limit: self.cfg.speed_limit,
            speed_unit: self.cfg.speed_unit,
        };
        let ready: Vec<TrackId> = self.store.iter_active().map(|t| t.id()).collect();
        for id in ready {
            let Some(t) = self.store.get_mut(id) else { continue };
            match evaluate(t, &self.calibration, &cfg, self.classifier.as_ref()) {
                Ok(Resolution::Pending) => {}
                Ok(Resolution::Emitted(ev)) => {
                    self.store.take(id);
                    info!("engine: {} (track {}, {})", ev, ev.track_id, ev.status());
                    report.events.push(ev);
                }
                Ok(Resolution::Suppressed { elapsed_s }) => {
                    self.store.take(id);
                    debug!("engine: track {} crossing interval {:.4}s too short, dropped", id, elapsed_s);
                    self.stats.events_suppressed += 1;
                    report.lost.push(id);
                }
                Err(e) => {
                    warn!("engine: {}", e);
                    self.store.remove_as(id, TrackStatus::Lost);
                    report.lost.push(id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::VirtualLine;
    use speedcam_proto::LineId;
    use speedcam_vision::color::MeanHsvClassifier;
    use speedcam_vision::BBox;

    fn cal(xa: f64, xb: f64) -> Calibration {
        Calibration::new(
            VirtualLine::new(LineId::A, Point::new(xa, 0.0), Point::new(xa, 720.0)),
            VirtualLine::new(LineId::B, Point::new(xb, 0.0), Point::new(xb, 720.0)),
            20.0,
            false,
        )
        .unwrap()
    }

    fn engine() -> SpeedEngine {
        SpeedEngine::new(EngineConfig::default(), cal(300.0, 500.0), Box::new(MeanHsvClassifier))
    }

    fn car(cx: f32) -> Detection {
        Detection::new(2, 0.9, BBox::new(cx - 50.0, 200.0, cx + 50.0, 260.0))
    }

    #[test]
    fn rejects_out_of_order_frames() {
        let mut e = engine();
        e.process_frame(Frame::new(1.0, vec![car(100.0)])).unwrap();
        let err = e.process_frame(Frame::new(1.0, vec![car(110.0)])).unwrap_err();
        assert_eq!(err, FrameError::NonMonotonic { ts: 1.0, last: 1.0 });
        assert!(e.process_frame(Frame::new(f64::NAN, vec![])).is_err());
        assert_eq!(e.stats().frames_rejected, 2);
        // the rejected frame did not touch state
        assert_eq!(e.snapshot()[0].last_seen, 1.0);
        e.process_frame(Frame::new(1.1, vec![car(110.0)])).unwrap();
    }

    #[test]
    fn malformed_detections_are_dropped() {
        let mut e = engine();
        let bad = Detection::new(2, 0.9, BBox::new(10.0, 10.0, 5.0, 20.0));
        let nan = Detection::new(2, f32::NAN, BBox::new(0.0, 0.0, 10.0, 10.0));
        let r = e.process_frame(Frame::new(0.0, vec![bad, nan])).unwrap();
        assert!(r.created.is_empty());
        assert_eq!(e.stats().detections_dropped, 2);
    }

    #[test]
    fn promotion_after_consecutive_hits() {
        let mut e = engine();
        e.process_frame(Frame::new(0.0, vec![car(100.0)])).unwrap();
        e.process_frame(Frame::new(0.1, vec![car(110.0)])).unwrap();
        assert_eq!(e.snapshot()[0].status, TrackStatus::Tentative);
        e.process_frame(Frame::new(0.2, vec![car(120.0)])).unwrap();
        assert_eq!(e.snapshot()[0].status, TrackStatus::Active);
    }

    #[test]
    fn missed_frame_restarts_confirmation() {
        let mut e = engine();
        e.process_frame(Frame::new(0.0, vec![car(100.0)])).unwrap();
        e.process_frame(Frame::new(0.1, vec![car(100.0)])).unwrap();
        e.process_frame(Frame::new(0.2, vec![])).unwrap();
        e.process_frame(Frame::new(0.3, vec![car(100.0)])).unwrap();
        e.process_frame(Frame::new(0.4, vec![car(100.0)])).unwrap();
        assert_eq!(e.snapshot()[0].status, TrackStatus::Tentative);
        e.process_frame(Frame::new(0.5, vec![car(100.0)])).unwrap();
        assert_eq!(e.snapshot()[0].status, TrackStatus::Active);
    }

    #[test]
    fn roi_margin_filters_far_detections() {
        let cfg = EngineConfig { roi_margin_px: Some(20.0), ..Default::default() };
        let mut e = SpeedEngine::new(cfg, cal(300.0, 500.0), Box::new(MeanHsvClassifier));
        let r = e.process_frame(Frame::new(0.0, vec![car(100.0), car(400.0)])).unwrap();
        assert_eq!(r.created.len(), 1);
        assert_eq!(e.snapshot()[0].bbox.x1, 350.0);
    }

    #[test]
    fn recalibration_waits_for_next_frame_and_drops_partial_tracks() {
        let mut e = engine();
        // crosses A between the first two frames
        e.process_frame(Frame::new(0.0, vec![car(290.0)])).unwrap();
        e.process_frame(Frame::new(0.1, vec![car(310.0)])).unwrap();
        assert!(e.snapshot()[0].crossing_a.is_some());

        e.reconfigure(cal(100.0, 600.0));
        assert_eq!(e.calibration().line(LineId::A).a.x, 300.0);

        let r = e.process_frame(Frame::new(0.2, vec![car(330.0)])).unwrap();
        assert_eq!(e.calibration().line(LineId::A).a.x, 100.0);
        assert_eq!(r.lost, vec![1]);
        assert_eq!(r.created.len(), 1);
    }
}

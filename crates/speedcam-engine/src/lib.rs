//! Vehicle tracking and speed estimation.
//!
//! Per-frame detections are associated to tracks, each track's reference
//! point is tested against two calibrated virtual lines, and a track that
//! crossed both produces exactly one [`SpeedEvent`].

pub mod association;
pub mod calibration;
pub mod crossing;
pub mod emitter;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod store;
pub mod track;

use serde::Deserialize;
use speedcam_proto::SpeedUnit;

pub use calibration::{Calibration, CalibrationConfig, DistanceUnit, VirtualLine};
pub use engine::{EngineStats, Frame, FrameReport, SpeedEngine};
pub use error::{CalibrationError, ConfigError, FrameError, TransitionError};
pub use speedcam_proto::SpeedEvent;
pub use track::{TrackId, TrackSnapshot, TrackStatus};

/// `[engine]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum IoU (exclusive) for a detection to continue a track.
    pub iou_threshold: f32,
    /// Consecutive matched frames before a track is trusted.
    pub confirm_hits: u32,
    pub staleness_timeout_s: f64,
    pub history_len: usize,
    pub color_samples: usize,
    pub max_tracks: usize,
    pub min_crossing_interval_s: f64,
    /// Over-speed threshold, in `speed_unit`.
    pub speed_limit: f64,
    pub speed_unit: SpeedUnit,
    /// Let a detection continue a track of a different class.
    pub class_agnostic: bool,
    /// Ignore detections outside the lines' bounding box grown by this margin.
    pub roi_margin_px: Option<f64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.3,
            confirm_hits: 3,
            staleness_timeout_s: 1.0,
            history_len: 32,
            color_samples: 5,
            max_tracks: 64,
            min_crossing_interval_s: 0.05,
            speed_limit: 15.0,
            speed_unit: SpeedUnit::Mph,
            class_agnostic: false,
            roi_margin_px: None,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bad = |field, reason: &str| Err(ConfigError { field, reason: reason.to_string() });
        if !(self.iou_threshold >= 0.0 && self.iou_threshold < 1.0) {
            return bad("iou_threshold", "must be in [0, 1)");
        }
        if self.confirm_hits == 0 {
            return bad("confirm_hits", "must be at least 1");
        }
        if !(self.staleness_timeout_s.is_finite() && self.staleness_timeout_s > 0.0) {
            return bad("staleness_timeout_s", "must be positive");
        }
        if self.history_len < 2 {
            return bad("history_len", "must keep at least 2 points");
        }
        if self.max_tracks == 0 {
            return bad("max_tracks", "must be at least 1");
        }
        if !(self.min_crossing_interval_s.is_finite() && self.min_crossing_interval_s > 0.0) {
            return bad("min_crossing_interval_s", "must be positive");
        }
        if !(self.speed_limit.is_finite() && self.speed_limit > 0.0) {
            return bad("speed_limit", "must be positive");
        }
        if let Some(m) = self.roi_margin_px {
            if !(m.is_finite() && m >= 0.0) {
                return bad("roi_margin_px", "must be non-negative");
            }
        }
        Ok(())
    }
}

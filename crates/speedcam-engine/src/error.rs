use thiserror::Error;

use crate::track::TrackStatus;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibrationError {
    #[error("line {line} has non-finite endpoints")]
    NonFinite { line: char },
    #[error("line {line} is degenerate ({length_px:.3}px long)")]
    DegenerateLine { line: char, length_px: f64 },
    #[error("lines A and B coincide")]
    CoincidentLines,
    #[error("lines A and B are only {separation_px:.3}px apart")]
    NoSeparation { separation_px: f64 },
    #[error("real-world distance must be positive and finite, got {0}")]
    InvalidDistance(f64),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameError {
    #[error("frame timestamp {ts} is not finite")]
    NonFiniteTimestamp { ts: f64 },
    #[error("frame timestamp {ts} does not advance past {last}")]
    NonMonotonic { ts: f64, last: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("track {id}: illegal transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub id: u64,
    pub from: TrackStatus,
    pub to: TrackStatus,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("engine.{field}: {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: String,
}

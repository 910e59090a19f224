use speedcam_proto::{LineId, SpeedEvent, SpeedUnit, VehicleColor};
use speedcam_vision::color::ColorClassifier;
use tracing::debug;

use crate::calibration::Calibration;
use crate::error::TransitionError;
use crate::geometry::pixels_to_meters;
use crate::track::{Track, TrackStatus};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmitterConfig {
    /// Crossing intervals shorter than this are treated as sensor noise.
    pub min_crossing_interval_s: f64,
    pub speed_limit: f64,
    pub speed_unit: SpeedUnit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Not ready: not `Active`, or a crossing is still missing.
    Pending,
    /// Track completed; the event is the only one it will ever produce.
    Emitted(SpeedEvent),
    /// Implausibly short interval; track resolved as `Lost`.
    Suppressed { elapsed_s: f64 },
}

/// Resolves an `Active` track that has both crossings into its terminal
/// state. The caller removes the track from the store on anything but
/// `Pending`.
pub fn evaluate(
    track: &mut Track,
    cal: &Calibration,
    cfg: &EmitterConfig,
    classifier: &dyn ColorClassifier,
) -> Result<Resolution, TransitionError> {
    if track.status() != TrackStatus::Active {
        return Ok(Resolution::Pending);
    }
    let (Some(a), Some(b)) = (track.crossing(LineId::A), track.crossing(LineId::B)) else {
        return Ok(Resolution::Pending);
    };

    let elapsed_s = (b - a).abs();
    // a zero interval is never a speed, even with a zero floor
    if !(elapsed_s.is_finite() && elapsed_s > 0.0) || elapsed_s < cfg.min_crossing_interval_s {
        track.transition(TrackStatus::Lost)?;
        return Ok(Resolution::Suppressed { elapsed_s });
    }

    let speed_mps = cal.distance_m() / elapsed_s;
    let speed = cfg.speed_unit.from_mps(speed_mps);
    let color = track
        .best_color_sample()
        .map(|s| classifier.classify(&s.crop()))
        .unwrap_or(VehicleColor::Unknown);

    let span = track.history_span_s();
    if span > 0.0 {
        let path_mps = pixels_to_meters(track.path_length_px(), cal.meters_per_pixel()) / span;
        debug!(
            "emitter: track {} timed {:.2} m/s, path estimate {:.2} m/s",
            track.id(),
            speed_mps,
            path_mps
        );
    }

    track.transition(TrackStatus::Completed)?;
    Ok(Resolution::Emitted(SpeedEvent {
        track_id: track.id(),
        vehicle_class: track.vehicle_class(),
        color,
        speed,
        unit: cfg.speed_unit,
        over_speed: speed > cfg.speed_limit,
        timestamp: a.max(b),
        elapsed_s,
        first_line: if a <= b { LineId::A } else { LineId::B },
    }))
}

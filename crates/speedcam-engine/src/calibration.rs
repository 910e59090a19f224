use serde::Deserialize;
use speedcam_proto::LineId;

use crate::error::CalibrationError;
use crate::geometry::{self, Point, Rect};

/// Shorter lines are treated as a mis-click during calibration.
pub const MIN_LINE_LENGTH_PX: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceUnit {
    Meters,
    #[default]
    Feet,
}

impl DistanceUnit {
    pub fn to_meters(&self, v: f64) -> f64 {
        match self {
            DistanceUnit::Meters => v,
            DistanceUnit::Feet => v * 0.3048,
        }
    }
}

/// `[calibration]` section as written in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct CalibrationConfig {
    pub line_a: [[f64; 2]; 2],
    pub line_b: [[f64; 2]; 2],
    /// Real-world separation between line A and line B.
    pub distance: f64,
    #[serde(default)]
    pub distance_unit: DistanceUnit,
    /// Require the movement to pass between the line's endpoints.
    #[serde(default)]
    pub bounded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VirtualLine {
    pub id: LineId,
    pub a: Point,
    pub b: Point,
}

impl VirtualLine {
    pub fn new(id: LineId, a: Point, b: Point) -> Self {
        Self { id, a, b }
    }

    pub fn length(&self) -> f64 {
        geometry::distance(self.a, self.b)
    }

    /// Signed side of `p`; see [`geometry::side`].
    pub fn side(&self, p: Point) -> f64 {
        geometry::side(self.a, self.b, p)
    }

    pub fn midpoint(&self) -> Point {
        Point::midpoint(self.a, self.b)
    }
}

/// Validated pair of virtual lines plus their real-world separation.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    line_a: VirtualLine,
    line_b: VirtualLine,
    distance_m: f64,
    bounded: bool,
}

impl Calibration {
    pub fn new(line_a: VirtualLine, line_b: VirtualLine, distance_m: f64, bounded: bool) -> Result<Self, CalibrationError> {
        for (tag, line) in [('A', &line_a), ('B', &line_b)] {
            if !line.a.is_finite() || !line.b.is_finite() {
                return Err(CalibrationError::NonFinite { line: tag });
            }
            let length_px = line.length();
            if length_px < MIN_LINE_LENGTH_PX {
                return Err(CalibrationError::DegenerateLine { line: tag, length_px });
            }
        }
        let same = |p: Point, q: Point| geometry::distance(p, q) < MIN_LINE_LENGTH_PX;
        if (same(line_a.a, line_b.a) && same(line_a.b, line_b.b)) || (same(line_a.a, line_b.b) && same(line_a.b, line_b.a)) {
            return Err(CalibrationError::CoincidentLines);
        }
        let separation_px = separation(&line_a, &line_b);
        if separation_px < MIN_LINE_LENGTH_PX {
            return Err(CalibrationError::NoSeparation { separation_px });
        }
        if !distance_m.is_finite() || distance_m <= 0.0 {
            return Err(CalibrationError::InvalidDistance(distance_m));
        }

        Ok(Self {
            line_a: VirtualLine { id: LineId::A, ..line_a },
            line_b: VirtualLine { id: LineId::B, ..line_b },
            distance_m,
            bounded,
        })
    }

    pub fn from_config(cfg: &CalibrationConfig) -> Result<Self, CalibrationError> {
        let line = |id, l: [[f64; 2]; 2]| VirtualLine::new(id, l[0].into(), l[1].into());
        Self::new(
            line(LineId::A, cfg.line_a),
            line(LineId::B, cfg.line_b),
            cfg.distance_unit.to_meters(cfg.distance),
            cfg.bounded,
        )
    }

    pub fn line(&self, id: LineId) -> &VirtualLine {
        match id {
            LineId::A => &self.line_a,
            LineId::B => &self.line_b,
        }
    }

    pub fn lines(&self) -> [&VirtualLine; 2] {
        [&self.line_a, &self.line_b]
    }

    pub fn distance_m(&self) -> f64 {
        self.distance_m
    }

    pub fn bounded(&self) -> bool {
        self.bounded
    }

    /// Pixel separation of the two lines, measured midpoint-to-line both
    /// ways and averaged.
    pub fn pixel_separation(&self) -> f64 {
        separation(&self.line_a, &self.line_b)
    }

    /// Average ground scale between the lines.
    pub fn meters_per_pixel(&self) -> f64 {
        self.distance_m / self.pixel_separation()
    }

    /// Bounding box of both lines grown by `margin` pixels.
    pub fn region_of_interest(&self, margin: f64) -> Rect {
        let pts = [self.line_a.a, self.line_a.b, self.line_b.a, self.line_b.b];
        // four points, never empty
        Rect::bounding(&pts).unwrap_or(Rect { min: pts[0], max: pts[0] }).expand(margin)
    }
}

fn separation(a: &VirtualLine, b: &VirtualLine) -> f64 {
    let ab = geometry::distance_to_line(a.a, a.b, b.midpoint());
    let ba = geometry::distance_to_line(b.a, b.b, a.midpoint());
    (ab + ba) / 2.0
}

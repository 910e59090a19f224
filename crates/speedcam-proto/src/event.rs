use serde::{Deserialize, Serialize};
use std::fmt;

pub const STATUS_OK: &str = "OKAY";
pub const STATUS_SLOW_DOWN: &str = "SLOW DOWN!!";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleClass {
    Car,
    Motorcycle,
    Bus,
    Truck,
    Other,
}

impl VehicleClass {
    /// Maps a COCO class id (the usual detector export) onto a vehicle category.
    pub fn from_coco_id(id: i32) -> Self {
        match id {
            2 => VehicleClass::Car,
            3 => VehicleClass::Motorcycle,
            5 => VehicleClass::Bus,
            7 => VehicleClass::Truck,
            _ => VehicleClass::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleClass::Car => "Car",
            VehicleClass::Motorcycle => "Motorcycle",
            VehicleClass::Bus => "Bus",
            VehicleClass::Truck => "Truck",
            VehicleClass::Other => "Vehicle",
        }
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VehicleColor {
    Red,
    Orange,
    Yellow,
    Green,
    Blue,
    Purple,
    White,
    Gray,
    Black,
    Unknown,
}

impl VehicleColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleColor::Red => "Red",
            VehicleColor::Orange => "Orange",
            VehicleColor::Yellow => "Yellow",
            VehicleColor::Green => "Green",
            VehicleColor::Blue => "Blue",
            VehicleColor::Purple => "Purple",
            VehicleColor::White => "White",
            VehicleColor::Gray => "Gray",
            VehicleColor::Black => "Black",
            VehicleColor::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for VehicleColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedUnit {
    Mps,
    Kph,
    #[default]
    Mph,
}

impl SpeedUnit {
    pub fn from_mps(&self, mps: f64) -> f64 {
        match self {
            SpeedUnit::Mps => mps,
            SpeedUnit::Kph => mps * 3.6,
            SpeedUnit::Mph => mps * 3600.0 / 1609.344,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SpeedUnit::Mps => "m/s",
            SpeedUnit::Kph => "km/h",
            SpeedUnit::Mph => "mph",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineId {
    A,
    B,
}

/// Terminal, one-shot summary of a vehicle that crossed both lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedEvent {
    pub track_id: u64,
    pub vehicle_class: VehicleClass,
    pub color: VehicleColor,
    pub speed: f64,
    pub unit: SpeedUnit,
    pub over_speed: bool,
    /// Capture-clock time of the later of the two crossings (seconds).
    pub timestamp: f64,
    pub elapsed_s: f64,
    pub first_line: LineId,
}

impl SpeedEvent {
    pub fn status(&self) -> &'static str {
        if self.over_speed { STATUS_SLOW_DOWN } else { STATUS_OK }
    }
}

impl fmt::Display for SpeedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Color: {}, Speed: {:.1} {}",
            self.vehicle_class,
            self.color,
            self.speed,
            self.unit.label()
        )
    }
}

/// Datagram body broadcast for over-speed vehicles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    pub vehicle_class: VehicleClass,
    pub color: VehicleColor,
    pub speed: f64,
    pub unit: SpeedUnit,
    pub msg: String,
}

impl AlertMessage {
    pub fn from_event(ev: &SpeedEvent) -> Option<Self> {
        if !ev.over_speed {
            return None;
        }
        Some(Self {
            vehicle_class: ev.vehicle_class,
            color: ev.color,
            speed: ev.speed,
            unit: ev.unit,
            msg: STATUS_SLOW_DOWN.to_string(),
        })
    }
}

/// Latest reading for one vehicle color, as served to the driver dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub color: VehicleColor,
    pub speed: f64,
    pub unit: SpeedUnit,
    pub status: String,
    pub updated_unix_ms: i64,
}

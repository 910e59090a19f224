//! Downstream consumers of [`SpeedEvent`]s.
//!
//! The engine hands events to an [`EventBus`]; every sink runs as its own
//! task with its own receiver, so storage or network trouble never reaches
//! frame processing.

pub mod alert;
pub mod bus;
pub mod doctor;
pub mod live;
pub mod persist;

use serde::Deserialize;
use std::path::PathBuf;

pub use alert::UdpAlertSink;
pub use bus::{EventBus, Sink, SinkStats};
pub use live::LiveStatusBoard;
pub use persist::JsonlSink;
pub use speedcam_proto::SpeedEvent;

/// `[sinks]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SinksConfig {
    /// Events buffered per sink before the slowest one starts to lag.
    pub bus_capacity: Option<usize>,
    pub persistence: PersistConfig,
    pub alert: AlertConfig,
    pub live_status: LiveStatusConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self { enabled: true, path: PathBuf::from("speedcam-events.jsonl") }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub enabled: bool,
    pub bind: String,
    pub target: String,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self { enabled: true, bind: "0.0.0.0:0".into(), target: "255.255.255.255:6000".into() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LiveStatusConfig {
    pub enabled: bool,
    pub snapshot_path: Option<PathBuf>,
    /// Entries older than this are not shown to drivers.
    pub ttl_s: f64,
}

impl Default for LiveStatusConfig {
    fn default() -> Self {
        Self { enabled: true, snapshot_path: Some(PathBuf::from("speedcam-status.json")), ttl_s: 30.0 }
    }
}

pub(crate) fn unix_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
pub(crate) mod testutil {
    use speedcam_proto::{LineId, SpeedEvent, SpeedUnit, VehicleClass, VehicleColor};
    use std::path::PathBuf;

    pub fn event(track_id: u64, color: VehicleColor, speed: f64, over_speed: bool) -> SpeedEvent {
        SpeedEvent {
            track_id,
            vehicle_class: VehicleClass::Car,
            color,
            speed,
            unit: SpeedUnit::Mph,
            over_speed,
            timestamp: 100.0 + track_id as f64,
            elapsed_s: 1.2,
            first_line: LineId::A,
        }
    }

    pub fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("speedcam-sinks-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}

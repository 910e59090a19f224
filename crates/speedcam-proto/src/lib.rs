pub mod event;

pub use event::{
    AlertMessage, LineId, SpeedEvent, SpeedUnit, StatusRecord, VehicleClass, VehicleColor, STATUS_OK, STATUS_SLOW_DOWN,
};

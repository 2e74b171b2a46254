pub mod ble;
pub mod measurement;
pub mod simulator;

use std::time::Duration;

use chrono::{DateTime, Local};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatteryLevel {
    #[default]
    Unknown,
    NotReported,
    Level(u8),
}

impl From<BatteryLevel> for u8 {
    fn from(level: BatteryLevel) -> Self {
        match level {
            BatteryLevel::Level(battery) => battery,
            _ => 0,
        }
    }
}

/// Sensor contact state from the HRM flags byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContactStatus {
    #[default]
    Unsupported,
    NoContact,
    Contact,
}

#[derive(Debug, Clone, Default)]
pub struct HeartRateStatus {
    pub heart_rate_bpm: u16,
    pub rr_intervals: Vec<Duration>,
    pub battery_level: BatteryLevel,
    pub contact: ContactStatus,
    pub timestamp: DateTime<Local>,
}

/// A block of raw waveform samples from a source that can provide one
/// (the simulator today, vendor streaming characteristics eventually).
#[derive(Debug, Clone)]
pub struct EcgChunk {
    pub samples: Vec<f32>,
    pub sample_rate_hz: u16,
    pub timestamp: DateTime<Local>,
}

// Only used as a backup if the HRM doesn't support
// sending RR intervals
pub fn rr_from_bpm(bpm: u16) -> Duration {
    // Make sure it's at least 1 to prevent a potential divide by zero
    let bpm = bpm.max(1);
    Duration::from_secs_f32(60.0 / bpm as f32)
}

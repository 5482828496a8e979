//! Fixed-size telemetry record and its byte / JSON encodings.
//!
//! Byte layout (little-endian, 32 bytes):
//!
//! ```text
//! 0..4    timestamp      u32
//! 4..8    temperature    f32
//! 8..12   humidity       f32
//! 12..16  soil_moisture  i32
//! 16..20  light_level    f32
//! 20      rain_detected  u8 (bool)
//! 21      pump_state     u8 (bool)
//! 22      canopy_state   u8 (bool)
//! 23      auto_mode      u8 (bool)
//! 24..32  reserved
//! ```

use serde::Serialize;

/// Encoded size of one snapshot.
pub const RECORD_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySnapshot {
    pub timestamp: u32,
    pub temperature: f32,
    pub humidity: f32,
    pub soil_moisture: i32,
    pub light_level: f32,
    pub rain_detected: bool,
    pub pump_on: bool,
    pub canopy_on: bool,
    pub auto_mode: bool,
}

/// JSON body pushed to the backend for live and drained telemetry.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TelemetryRecord {
    pub temperature: f32,
    pub humidity: f32,
    pub soil_moisture: i32,
    pub light_level: f32,
    pub rain_detected: bool,
    pub pump_state: bool,
    pub canopy_state: bool,
    pub auto_mode: bool,
    pub timestamp: String,
}

impl TelemetrySnapshot {
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0..4].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[4..8].copy_from_slice(&self.temperature.to_le_bytes());
        buf[8..12].copy_from_slice(&self.humidity.to_le_bytes());
        buf[12..16].copy_from_slice(&self.soil_moisture.to_le_bytes());
        buf[16..20].copy_from_slice(&self.light_level.to_le_bytes());
        buf[20] = self.rain_detected as u8;
        buf[21] = self.pump_on as u8;
        buf[22] = self.canopy_on as u8;
        buf[23] = self.auto_mode as u8;
        buf
    }

    pub fn from_bytes(buf: &[u8; RECORD_SIZE]) -> Self {
        let word = |at: usize| [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]];
        Self {
            timestamp: u32::from_le_bytes(word(0)),
            temperature: f32::from_le_bytes(word(4)),
            humidity: f32::from_le_bytes(word(8)),
            soil_moisture: i32::from_le_bytes(word(12)),
            light_level: f32::from_le_bytes(word(16)),
            rain_detected: buf[20] != 0,
            pump_on: buf[21] != 0,
            canopy_on: buf[22] != 0,
            auto_mode: buf[23] != 0,
        }
    }

    pub fn to_record(&self, timestamp: String) -> TelemetryRecord {
        TelemetryRecord {
            temperature: self.temperature,
            humidity: self.humidity,
            soil_moisture: self.soil_moisture,
            light_level: self.light_level,
            rain_detected: self.rain_detected,
            pump_state: self.pump_on,
            canopy_state: self.canopy_on,
            auto_mode: self.auto_mode,
            timestamp,
        }
    }
}

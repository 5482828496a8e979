//! Collaborator boundaries. Network-bound collaborators are async; local
//! hardware collaborators are plain synchronous calls.

use serde_json::Value;

use crate::error::LinkError;
use crate::state::{Actuator, SensorReading};

// ---------------------------------------------------------------------------
// Network collaborators
// ---------------------------------------------------------------------------

/// One message from the subscribed remote-command stream. `path` is relative
/// to the subscription root: `/` for a whole object, `/pump_state` for a
/// single-field delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub path: String,
    pub payload: String,
}

/// Realtime cloud backend. Paths are relative to the device root.
#[allow(async_fn_in_trait)]
pub trait Backend {
    fn is_ready(&self) -> bool;

    /// Append `body` under `path` (a new child per call).
    async fn push(&mut self, path: &str, body: &Value) -> Result<(), LinkError>;

    /// Overwrite the value at `path`.
    async fn set(&mut self, path: &str, body: &Value) -> Result<(), LinkError>;

    /// Start (or restart) delivering changes under `path` as [`StreamEvent`]s.
    async fn subscribe(&mut self, path: &str) -> Result<(), LinkError>;

    /// Next queued stream event, if any. Never blocks.
    fn next_event(&mut self) -> Option<StreamEvent>;
}

pub trait NetworkStatus {
    fn is_connected(&self) -> bool;
}

/// Inbound chat update. Updates that carry no text (stickers, edits, joins)
/// arrive with an empty `text` so the poll offset still moves past them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub update_id: i64,
    pub chat_id: String,
    pub from: String,
    pub text: String,
}

#[allow(async_fn_in_trait)]
pub trait Messaging {
    async fn send_message(&mut self, chat_id: &str, text: &str) -> Result<(), LinkError>;

    /// Updates with `update_id >= since`, oldest first.
    async fn poll_updates(&mut self, since: i64) -> Result<Vec<ChatMessage>, LinkError>;
}

/// Short-horizon precipitation forecast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastReading {
    pub rain_next_1h_mm: f32,
    /// Probability of precipitation, percent.
    pub pop_next_1h: f32,
}

#[allow(async_fn_in_trait)]
pub trait ForecastSource {
    async fn fetch(&mut self) -> Result<ForecastReading, LinkError>;
}

/// Backend paths, relative to the device root.
pub mod paths {
    pub const SENSORS_CURRENT: &str = "sensors/current";
    pub const CONTROLS_CURRENT: &str = "controls/current";
    pub const SYSTEM_STATUS: &str = "system/status";
    pub const IRRIGATION_CURRENT: &str = "alerts/current/irrigation";

    pub fn sensors_history(date: &str) -> String {
        format!("sensors/history/{date}")
    }

    pub fn alert_current(kind: &str) -> String {
        format!("alerts/current/{kind}")
    }

    pub fn alert_history(date: &str, kind: &str) -> String {
        format!("alerts/history/{date}/{kind}")
    }
}

// ---------------------------------------------------------------------------
// Local collaborators
// ---------------------------------------------------------------------------

pub trait SensorBus {
    fn read(&mut self) -> SensorReading;
}

pub trait Actuators {
    fn write(&mut self, actuator: Actuator, on: bool);
}

/// Irrigation recommendation from `[soil_moisture, temperature, humidity]`.
pub trait Inference {
    fn predict(&mut self, features: [f32; 3]) -> bool;
}

pub trait Watchdog {
    fn feed(&self);
}

// ===========================================================================
// Test fakes
// ===========================================================================

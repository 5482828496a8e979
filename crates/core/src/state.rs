use std::collections::VecDeque;
use std::fmt;

use serde::Serialize;
use time::OffsetDateTime;

use crate::snapshot::TelemetrySnapshot;

/// Maximum number of alerts retained in the in-memory log.
const MAX_ALERTS: usize = 50;

// ---------------------------------------------------------------------------
// Actuators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Actuator {
    Pump,
    Canopy,
}

impl Actuator {
    /// Field name used in control payloads and stream paths.
    pub fn field(self) -> &'static str {
        match self {
            Self::Pump => "pump_state",
            Self::Canopy => "canopy_state",
        }
    }

    /// Alert channel a transition of this actuator is reported on.
    pub fn alert_kind(self) -> AlertKind {
        match self {
            Self::Pump => AlertKind::Irrigation,
            Self::Canopy => AlertKind::Canopy,
        }
    }
}

impl fmt::Display for Actuator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pump => write!(f, "pump"),
            Self::Canopy => write!(f, "canopy"),
        }
    }
}

pub fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

// ---------------------------------------------------------------------------
// Sensor / forecast / model inputs
// ---------------------------------------------------------------------------

/// Raw values from one pass over the sensor bus.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorReading {
    pub temperature: f32,
    pub humidity: f32,
    /// 10-bit ADC scale, 0..=1023.
    pub soil_moisture: i32,
    pub light_level: f32,
    pub rain_detected: bool,
}

impl SensorReading {
    /// Physically plausible and free of NaN.
    pub fn is_valid(&self) -> bool {
        !self.temperature.is_nan()
            && !self.humidity.is_nan()
            && (0.0..=100.0).contains(&self.humidity)
            && (0..=1023).contains(&self.soil_moisture)
            && !self.light_level.is_nan()
            && self.light_level >= 0.0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SensorState {
    pub latest: SensorReading,
    /// Set when the last read failed validation.
    pub error: bool,
    pub last_read_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ForecastState {
    pub rain_next_1h_mm: f32,
    pub pop_next_1h: f32,
    pub last_fetch_ms: Option<u64>,
    pub valid: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ModelSignal {
    pub recommended: bool,
    pub last_update_ms: Option<u64>,
    pub valid: bool,
}

impl ModelSignal {
    /// An invalid signal never recommends irrigation.
    pub fn recommends(&self) -> bool {
        self.valid && self.recommended
    }
}

/// Derived every cycle, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Connectivity {
    pub network: bool,
    pub backend: bool,
}

impl Connectivity {
    pub fn online(&self) -> bool {
        self.network && self.backend
    }
}

// ---------------------------------------------------------------------------
// Control state
// ---------------------------------------------------------------------------

/// A change of actuator state produced by [`ControlState::apply_actuator_target`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionEvent {
    pub actuator: Actuator,
    pub on: bool,
    pub at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlState {
    pub pump_on: bool,
    pub canopy_on: bool,
    pub auto_mode: bool,
    pub pump_changed_ms: Option<u64>,
    pub canopy_changed_ms: Option<u64>,
}

impl ControlState {
    pub fn new(auto_mode: bool) -> Self {
        Self {
            pump_on: false,
            canopy_on: false,
            auto_mode,
            pump_changed_ms: None,
            canopy_changed_ms: None,
        }
    }

    pub fn is_on(&self, actuator: Actuator) -> bool {
        match actuator {
            Actuator::Pump => self.pump_on,
            Actuator::Canopy => self.canopy_on,
        }
    }

    pub fn changed_at(&self, actuator: Actuator) -> Option<u64> {
        match actuator {
            Actuator::Pump => self.pump_changed_ms,
            Actuator::Canopy => self.canopy_changed_ms,
        }
    }

    /// The only way an actuator's state changes. Returns an event when
    /// `desired` differs from the current state, `None` otherwise.
    pub fn apply_actuator_target(
        &mut self,
        actuator: Actuator,
        desired: bool,
        now_ms: u64,
    ) -> Option<TransitionEvent> {
        let (state, changed) = match actuator {
            Actuator::Pump => (&mut self.pump_on, &mut self.pump_changed_ms),
            Actuator::Canopy => (&mut self.canopy_on, &mut self.canopy_changed_ms),
        };
        if *state == desired {
            return None;
        }
        *state = desired;
        *changed = Some(now_ms);
        Some(TransitionEvent {
            actuator,
            on: desired,
            at_ms: now_ms,
        })
    }

    /// How long `actuator` has been on, or `None` when it is off.
    pub fn on_for_ms(&self, actuator: Actuator, now_ms: u64) -> Option<u64> {
        if !self.is_on(actuator) {
            return None;
        }
        Some(now_ms.saturating_sub(self.changed_at(actuator).unwrap_or(now_ms)))
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Irrigation,
    Canopy,
    Weather,
    Health,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Irrigation => "irrigation",
            Self::Canopy => "canopy",
            Self::Weather => "weather",
            Self::Health => "health",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
    pub at: Option<OffsetDateTime>,
}

/// Recent alerts plus the counter of transition alerts raised today.
#[derive(Debug, Default)]
pub struct AlertLog {
    pub recent: VecDeque<Alert>,
    pub count_today: u32,
}

impl AlertLog {
    pub fn record(&mut self, alert: Alert) {
        if self.recent.len() >= MAX_ALERTS {
            self.recent.pop_front();
        }
        self.recent.push_back(alert);
    }

    pub fn reset_day(&mut self) {
        self.count_today = 0;
    }
}

// ---------------------------------------------------------------------------
// Application context
// ---------------------------------------------------------------------------

/// Everything the periodic tasks share, owned by the controller and handed
/// to each component by reference.
#[derive(Debug)]
pub struct Context {
    pub sensors: SensorState,
    pub forecast: ForecastState,
    pub model: ModelSignal,
    pub control: ControlState,
    pub alerts: AlertLog,
    pub link: Connectivity,
}

impl Context {
    pub fn new(auto_mode: bool) -> Self {
        Self {
            sensors: SensorState::default(),
            forecast: ForecastState::default(),
            model: ModelSignal::default(),
            control: ControlState::new(auto_mode),
            alerts: AlertLog::default(),
            link: Connectivity::default(),
        }
    }

    /// Snapshot of the latest reading combined with actuator state.
    pub fn snapshot(&self, timestamp: u32) -> TelemetrySnapshot {
        let r = &self.sensors.latest;
        TelemetrySnapshot {
            timestamp,
            temperature: r.temperature,
            humidity: r.humidity,
            soil_moisture: r.soil_moisture,
            light_level: r.light_level,
            rain_detected: r.rain_detected,
            pump_on: self.control.pump_on,
            canopy_on: self.control.canopy_on,
            auto_mode: self.control.auto_mode,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

//! Stateful field simulator standing in for the sensor bus during local
//! development.
//!
//! Models the behaviour the controller reacts to:
//! - Soil moisture random walk with mean reversion and a drying drift
//! - Diurnal temperature, humidity and daylight curves
//! - Rain showers as a two-state Markov chain
//! - Occasional sensor dropouts (NaN humidity) in the flaky scenario

use std::fmt;

use irrigation_core::link::SensorBus;
use irrigation_core::state::SensorReading;

// ---------------------------------------------------------------------------
// Gaussian approximation
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

/// Sample from N(mean, sigma).
fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Simulation profiles selectable via the `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Dry soil, rare showers. Exercises the pump rules.
    Drying,
    /// Mid-range soil, no rain. Nothing should switch.
    Stable,
    /// Frequent showers. Exercises the canopy rules.
    Rainy,
    /// Noisy soil readings and occasional humidity dropouts.
    Flaky,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "rainy" => Self::Rainy,
            "flaky" => Self::Flaky,
            _ => Self::Drying, // default
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Rainy => write!(f, "rainy"),
            Self::Flaky => write!(f, "flaky"),
        }
    }
}

struct Profile {
    soil_start: f64,
    soil_drift: f64,
    soil_sigma: f64,
    rain_start_prob: f32,
    rain_stop_prob: f32,
    dropout_prob: f32,
}

impl Profile {
    fn of(scenario: Scenario) -> Self {
        match scenario {
            Scenario::Drying => Self {
                soil_start: 550.0,
                soil_drift: 1.5,
                soil_sigma: 6.0,
                rain_start_prob: 0.002,
                rain_stop_prob: 0.05,
                dropout_prob: 0.0,
            },
            Scenario::Stable => Self {
                soil_start: 350.0,
                soil_drift: 0.0,
                soil_sigma: 3.0,
                rain_start_prob: 0.0,
                rain_stop_prob: 1.0,
                dropout_prob: 0.0,
            },
            Scenario::Rainy => Self {
                soil_start: 300.0,
                soil_drift: 0.2,
                soil_sigma: 5.0,
                rain_start_prob: 0.05,
                rain_stop_prob: 0.02,
                dropout_prob: 0.0,
            },
            Scenario::Flaky => Self {
                soil_start: 450.0,
                soil_drift: 1.0,
                soil_sigma: 40.0,
                rain_start_prob: 0.01,
                rain_stop_prob: 0.05,
                dropout_prob: 0.05,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

const SOIL_MAX: f64 = 1023.0;
const DAY_SECS: f64 = 86_400.0;

pub struct FieldSim {
    profile: Profile,
    /// Raw soil reading; higher is drier.
    soil: f64,
    raining: bool,
    /// Local-time shift applied to the wall clock, seconds.
    utc_offset_secs: f64,
}

impl FieldSim {
    pub fn new(scenario: Scenario, utc_offset_secs: i32) -> Self {
        let profile = Profile::of(scenario);
        Self {
            soil: profile.soil_start + gaussian(0.0, 20.0),
            raining: false,
            profile,
            utc_offset_secs: utc_offset_secs as f64,
        }
    }

    /// Produce the reading for local time-of-day `day_secs` (0..86400).
    pub fn sample_at(&mut self, day_secs: f64) -> SensorReading {
        let p = &self.profile;

        // -- Weather state --------------------------------------------------
        let flip = fastrand::f32();
        self.raining = if self.raining {
            flip >= p.rain_stop_prob
        } else {
            flip < p.rain_start_prob
        };

        // -- Soil: drift toward dry, revert to centre, rain wets ------------
        let pull = 0.01 * (512.0 - self.soil);
        let wet = if self.raining { -4.0 } else { 0.0 };
        self.soil = (self.soil + p.soil_drift + pull + wet + gaussian(0.0, p.soil_sigma))
            .clamp(0.0, SOIL_MAX);

        // -- Diurnal curves -------------------------------------------------
        // Phase 0 at 06:00, peak at 12:00, trough at 00:00.
        let phase = 2.0 * std::f64::consts::PI * (day_secs - 6.0 * 3600.0) / DAY_SECS;
        let sun = phase.sin();

        let temperature = 26.0 + 6.0 * sun + gaussian(0.0, 0.3);
        let damp = if self.raining { 15.0 } else { 0.0 };
        let mut humidity = (70.0 - 15.0 * sun + damp + gaussian(0.0, 1.0)).clamp(0.0, 100.0);
        let light = if sun > 0.0 {
            let cloud = if self.raining { 0.2 } else { 1.0 };
            (32_000.0 * sun * cloud + gaussian(0.0, 300.0)).max(0.0)
        } else {
            0.0
        };

        if fastrand::f32() < p.dropout_prob {
            humidity = f64::NAN;
        }

        SensorReading {
            temperature: temperature as f32,
            humidity: humidity as f32,
            soil_moisture: self.soil.round() as i32,
            light_level: light as f32,
            rain_detected: self.raining,
        }
    }
}

impl SensorBus for FieldSim {
    fn read(&mut self) -> SensorReading {
        let now_s = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let day_secs = (now_s + self.utc_offset_secs).rem_euclid(DAY_SECS);
        self.sample_at(day_secs)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

//! Rule-based decision engine for the pump and the canopy.
//!
//! The engine only *computes* targets. Applying them goes through
//! [`ControlState::apply_actuator_target`], so a target that matches the
//! current state produces no transition and no side effects.
//!
//! ## Pump (control interval, auto-mode only)
//!
//! ```text
//! model says no                      -> OFF
//! forecast rain next 1h > 0          -> OFF
//! forecast == 0 and rain sensor wet  -> ON
//! otherwise                          -> unchanged
//! ```
//!
//! Independently, a pump that has been on longer than the ceiling is forced
//! OFF on every tick, whatever the mode.
//!
//! ## Canopy (control interval, auto-mode only)
//!
//! Starts from OFF, then evaluates in order with later rules overriding:
//! light above the high threshold closes it; rain now with a forecast at or
//! above the storm threshold closes it; rain now with a lighter forecast
//! opens it again.

use crate::state::{Actuator, ControlState, Context, SensorReading, TransitionEvent};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub temp_high: f32,
    pub temp_low: f32,
    pub humidity_high: f32,
    pub humidity_low: f32,
    pub light_high: f32,
    pub light_low: f32,
    pub storm_rain_mm: f32,
    pub pump_max_on_ms: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            temp_high: 30.0,
            temp_low: 13.0,
            humidity_high: 85.0,
            humidity_low: 30.0,
            light_high: 20_000.0,
            light_low: 10_000.0,
            storm_rain_mm: 5.0,
            pump_max_on_ms: 300_000,
        }
    }
}

/// Desired actuator state plus the human-readable reason for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub actuator: Actuator,
    pub on: bool,
    pub reason: String,
}

/// A target that changed actuator state.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub event: TransitionEvent,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Pump target, or `None` to leave the pump as it is.
pub fn pump_target(ctx: &Context) -> Option<Target> {
    let rain_next = ctx.forecast.rain_next_1h_mm;

    if !ctx.model.recommends() {
        return Some(pump(false, "pump off: model does not recommend irrigation".into()));
    }
    if rain_next > 0.0 {
        return Some(pump(
            false,
            format!("pump off: {rain_next:.1} mm rain forecast within 1h"),
        ));
    }
    if rain_next == 0.0 && ctx.sensors.latest.rain_detected {
        return Some(pump(
            true,
            "auto irrigation: model recommends watering, no rain forecast".into(),
        ));
    }
    None
}

pub fn canopy_target(ctx: &Context, th: &Thresholds) -> Target {
    let light = ctx.sensors.latest.light_level;
    let raining = ctx.sensors.latest.rain_detected;
    let rain_next = ctx.forecast.rain_next_1h_mm;

    let mut target = canopy(false, "canopy opened".into());

    if light > th.light_high {
        target = canopy(true, format!("canopy closed: strong light ({light:.0} lux)"));
    }

    if raining && rain_next >= th.storm_rain_mm {
        target = canopy(
            true,
            format!("canopy closed: raining with {rain_next:.1} mm forecast within 1h"),
        );
    } else if raining && rain_next < th.storm_rain_mm {
        target = canopy(
            false,
            format!("canopy opened: light rain ({rain_next:.1} mm forecast within 1h)"),
        );
    }

    target
}

/// Safety cutoff for a pump left running past the ceiling.
pub fn auto_off_target(control: &ControlState, now_ms: u64, th: &Thresholds) -> Option<Target> {
    let on_for = control.on_for_ms(Actuator::Pump, now_ms)?;
    (on_for >= th.pump_max_on_ms).then(|| {
        pump(
            false,
            format!("pump off after {}s run limit", th.pump_max_on_ms / 1000),
        )
    })
}

/// Targets for one control-interval evaluation. Empty when auto-mode is off.
pub fn evaluate(ctx: &Context, th: &Thresholds) -> Vec<Target> {
    if !ctx.control.auto_mode {
        return Vec::new();
    }
    let mut targets = Vec::with_capacity(2);
    targets.extend(pump_target(ctx));
    targets.push(canopy_target(ctx, th));
    targets
}

/// Push each target through the transition primitive, keeping only those that
/// changed something.
pub fn apply(control: &mut ControlState, targets: Vec<Target>, now_ms: u64) -> Vec<Applied> {
    targets
        .into_iter()
        .filter_map(|t| {
            control
                .apply_actuator_target(t.actuator, t.on, now_ms)
                .map(|event| Applied {
                    event,
                    reason: t.reason,
                })
        })
        .collect()
}

/// One message per breached threshold. Not edge-triggered.
pub fn severe_conditions(r: &SensorReading, th: &Thresholds) -> Vec<String> {
    let mut out = Vec::new();
    if r.temperature > th.temp_high {
        out.push(format!("temperature very high ({:.1}°C)", r.temperature));
    }
    if r.temperature < th.temp_low {
        out.push(format!("temperature very low ({:.1}°C)", r.temperature));
    }
    if r.humidity > th.humidity_high {
        out.push(format!("humidity very high ({:.1}%)", r.humidity));
    }
    if r.humidity < th.humidity_low {
        out.push(format!("humidity very low ({:.1}%)", r.humidity));
    }
    if r.light_level > th.light_high {
        out.push(format!("strong light ({:.0} lux)", r.light_level));
    }
    if r.light_level < th.light_low {
        out.push(format!("weak light ({:.0} lux)", r.light_level));
    }
    out
}

fn pump(on: bool, reason: String) -> Target {
    Target {
        actuator: Actuator::Pump,
        on,
        reason,
    }
}

fn canopy(on: bool, reason: String) -> Target {
    Target {
        actuator: Actuator::Canopy,
        on,
        reason,
    }
}

// ===========================================================================
// Tests
// ===========================================================================

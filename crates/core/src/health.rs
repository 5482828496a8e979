//! Health check, status payload, and daily rollover tracking.

use serde::Serialize;

use crate::state::{on_off, Context};

/// Outcome of one health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub issues: Vec<&'static str>,
}

impl HealthReport {
    pub fn healthy(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn message(&self) -> String {
        if self.healthy() {
            "system healthy - all sensors OK".to_string()
        } else {
            format!("system unhealthy - {}", self.issues.join("; "))
        }
    }
}

pub fn check(ctx: &Context) -> HealthReport {
    let r = &ctx.sensors.latest;
    let mut issues = Vec::new();

    if ctx.sensors.error {
        issues.push("sensor error");
    }
    if !ctx.link.backend {
        issues.push("backend offline");
    }
    if !ctx.link.network {
        issues.push("network offline");
    }
    if !(-10.0..=60.0).contains(&r.temperature) {
        issues.push("temperature out of range");
    }
    if !(0.0..=100.0).contains(&r.humidity) {
        issues.push("humidity out of range");
    }
    if !(0..=1023).contains(&r.soil_moisture) {
        issues.push("soil sensor out of range");
    }

    HealthReport { issues }
}

// ---------------------------------------------------------------------------
// Status payload
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct SensorHealth {
    pub climate: &'static str,
    pub soil: &'static str,
    pub rain: &'static str,
    pub light: &'static str,
}

/// Body of `system/status`.
#[derive(Debug, Serialize)]
pub struct StatusBody {
    pub last_update: String,
    pub uptime: u64,
    pub auto_mode: bool,
    pub pump_state: &'static str,
    pub canopy_state: &'static str,
    pub buffered_records: usize,
    pub sensors: SensorHealth,
}

pub fn status_body(ctx: &Context, stamp: String, uptime_secs: u64, buffered: usize) -> StatusBody {
    let ok = |good: bool| if good { "ok" } else { "error" };
    let r = &ctx.sensors.latest;
    StatusBody {
        last_update: stamp,
        uptime: uptime_secs,
        auto_mode: ctx.control.auto_mode,
        pump_state: on_off(ctx.control.pump_on),
        canopy_state: on_off(ctx.control.canopy_on),
        buffered_records: buffered,
        sensors: SensorHealth {
            climate: ok(!r.temperature.is_nan() && !r.humidity.is_nan()),
            soil: ok((0..=1023).contains(&r.soil_moisture)),
            rain: "ok",
            light: ok(r.light_level > 0.0),
        },
    }
}

// ---------------------------------------------------------------------------
// Daily rollover
// ---------------------------------------------------------------------------

/// Remembers the local date last seen and reports when it changes.
#[derive(Debug, Default)]
pub struct DayTracker {
    current: Option<String>,
}

impl DayTracker {
    /// `true` when `today` differs from the previously observed date. The
    /// first observation only records the date.
    pub fn rolled_over(&mut self, today: &str) -> bool {
        match &self.current {
            Some(d) if d == today => false,
            Some(_) => {
                self.current = Some(today.to_string());
                true
            }
            None => {
                self.current = Some(today.to_string());
                false
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Connectivity, SensorReading};

    fn healthy_ctx() -> Context {
        let mut ctx = Context::new(true);
        ctx.sensors.latest = SensorReading {
            temperature: 25.0,
            humidity: 60.0,
            soil_moisture: 500,
            light_level: 12_000.0,
            rain_detected: false,
        };
        ctx.link = Connectivity {
            network: true,
            backend: true,
        };
        ctx
    }

    #[test]
    fn healthy_system_has_no_issues() {
        let report = check(&healthy_ctx());
        assert!(report.healthy());
        assert_eq!(report.message(), "system healthy - all sensors OK");
    }

    #[test]
    fn every_problem_listed() {
        let mut ctx = healthy_ctx();
        ctx.sensors.error = true;
        ctx.link.backend = false;
        ctx.sensors.latest.temperature = 75.0;
        let report = check(&ctx);
        assert_eq!(
            report.issues,
            vec!["sensor error", "backend offline", "temperature out of range"]
        );
        assert!(report.message().starts_with("system unhealthy - sensor error; "));
    }

    #[test]
    fn nan_temperature_is_out_of_range() {
        let mut ctx = healthy_ctx();
        ctx.sensors.latest.temperature = f32::NAN;
        assert!(check(&ctx).issues.contains(&"temperature out of range"));
    }

    #[test]
    fn status_body_fields() {
        let mut ctx = healthy_ctx();
        ctx.sensors.latest.light_level = 0.0;
        let json = serde_json::to_value(status_body(&ctx, "stamp".into(), 99, 3)).unwrap();
        assert_eq!(json["uptime"], 99);
        assert_eq!(json["pump_state"], "OFF");
        assert_eq!(json["buffered_records"], 3);
        assert_eq!(json["sensors"]["light"], "error");
        assert_eq!(json["sensors"]["climate"], "ok");
    }

    #[test]
    fn day_tracker_fires_on_change_only() {
        let mut days = DayTracker::default();
        assert!(!days.rolled_over("2024-05-01"));
        assert!(!days.rolled_over("2024-05-01"));
        assert!(days.rolled_over("2024-05-02"));
        assert!(!days.rolled_over("2024-05-02"));
    }
}

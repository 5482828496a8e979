//! TOML config file loading and validation. Every section falls back to the
//! stock field-unit defaults, so an empty file is a working configuration.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use irrigation_core::{Intervals, Settings, Thresholds};
use serde::Deserialize;
use time::UtcOffset;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub mqtt: MqttConfig,
    pub telegram: TelegramConfig,
    pub weather: WeatherConfig,
    pub thresholds: ThresholdConfig,
    pub intervals: IntervalConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Backend root every path is published under.
    pub root: String,
    pub utc_offset_secs: i32,
    pub storage_path: String,
    pub ring_capacity: u32,
    pub watchdog_timeout_secs: u64,
    pub pump_pin: u8,
    pub canopy_pin: u8,
    /// Relay boards switch on a low output.
    pub active_low: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            root: "IrrigationSystem/ESP1".into(),
            utc_offset_secs: 7 * 3600,
            storage_path: "flash.bin".into(),
            ring_capacity: 100,
            watchdog_timeout_secs: 30,
            pump_pin: 17,
            canopy_pin: 27,
            active_low: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 1883,
            client_id: "irrigation-controller".into(),
            keep_alive_secs: 30,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token. Empty disables the chat channel.
    pub token: String,
    pub allowed_chats: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub host: String,
    pub lat: f64,
    pub lon: f64,
    pub units: String,
    /// Empty disables forecast fetching.
    pub api_key: String,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            host: "https://pro.openweathermap.org".into(),
            lat: 20.980913,
            lon: 105.7874165,
            units: "metric".into(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub temp_high: f32,
    pub temp_low: f32,
    pub humidity_high: f32,
    pub humidity_low: f32,
    pub light_high: f32,
    pub light_low: f32,
    pub storm_rain_mm: f32,
    pub pump_max_on_secs: u64,
    /// Raw soil reading at or above which the stock model calls for water.
    pub soil_dry: u16,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        let t = Thresholds::default();
        Self {
            temp_high: t.temp_high,
            temp_low: t.temp_low,
            humidity_high: t.humidity_high,
            humidity_low: t.humidity_low,
            light_high: t.light_high,
            light_low: t.light_low,
            storm_rain_mm: t.storm_rain_mm,
            pump_max_on_secs: t.pump_max_on_ms / 1000,
            soil_dry: 400,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct IntervalConfig {
    pub sense_ms: u64,
    pub upload_secs: u64,
    pub buffer_secs: u64,
    pub backlog_secs: u64,
    pub control_secs: u64,
    pub severe_secs: u64,
    pub forecast_secs: u64,
    pub model_secs: u64,
    pub status_secs: u64,
    pub health_secs: u64,
    pub chat_ms: u64,
    pub remote_ms: u64,
    pub report_secs: u64,
    pub drain_pacing_ms: u64,
    pub cycle_ms: u64,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        let iv = Intervals::default();
        Self {
            sense_ms: iv.sense.as_millis() as u64,
            upload_secs: iv.upload.as_secs(),
            buffer_secs: iv.buffer.as_secs(),
            backlog_secs: iv.backlog.as_secs(),
            control_secs: iv.control.as_secs(),
            severe_secs: iv.severe.as_secs(),
            forecast_secs: iv.forecast.as_secs(),
            model_secs: iv.model.as_secs(),
            status_secs: iv.status.as_secs(),
            health_secs: iv.health.as_secs(),
            chat_ms: iv.chat.as_millis() as u64,
            remote_ms: iv.remote.as_millis() as u64,
            report_secs: iv.report.as_secs(),
            drain_pacing_ms: 500,
            cycle_ms: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM.
const VALID_GPIO_PINS: &[u8] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

/// Largest valid UTC offset magnitude (exclusive), in seconds.
const MAX_OFFSET_SECS: i32 = 26 * 3600;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate every section. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_device(&mut errors);
        self.validate_telegram(&mut errors);
        self.validate_thresholds(&mut errors);
        self.validate_intervals(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_device(&self, errors: &mut Vec<String>) {
        let d = &self.device;

        if d.root.trim().is_empty() {
            errors.push("device.root is empty".into());
        }
        if d.storage_path.trim().is_empty() {
            errors.push("device.storage_path is empty".into());
        }
        if d.ring_capacity == 0 || d.ring_capacity > u16::MAX as u32 {
            errors.push(format!(
                "device.ring_capacity {} out of range [1, {}]",
                d.ring_capacity,
                u16::MAX
            ));
        }
        if d.utc_offset_secs.abs() >= MAX_OFFSET_SECS {
            errors.push(format!(
                "device.utc_offset_secs {} is not a valid UTC offset",
                d.utc_offset_secs
            ));
        }
        if d.watchdog_timeout_secs == 0 {
            errors.push("device.watchdog_timeout_secs must be positive".into());
        }

        // ── GPIO pin whitelist ──────────────────────────────
        for (name, pin) in [("pump_pin", d.pump_pin), ("canopy_pin", d.canopy_pin)] {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "device.{name} {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            }
        }
        if d.pump_pin == d.canopy_pin {
            errors.push(format!(
                "device.canopy_pin {} is already used by the pump",
                d.canopy_pin
            ));
        }
    }

    fn validate_telegram(&self, errors: &mut Vec<String>) {
        let t = &self.telegram;
        for chat in &t.allowed_chats {
            if chat.trim().parse::<i64>().is_err() {
                errors.push(format!("telegram.allowed_chats: '{chat}' is not a chat id"));
            }
        }
        if !t.token.is_empty() && t.allowed_chats.is_empty() {
            errors.push("telegram.token is set but telegram.allowed_chats is empty".into());
        }
    }

    fn validate_thresholds(&self, errors: &mut Vec<String>) {
        let t = &self.thresholds;

        if t.temp_low >= t.temp_high {
            errors.push(format!(
                "thresholds.temp_low ({}) must be below temp_high ({})",
                t.temp_low, t.temp_high
            ));
        }
        if t.humidity_low >= t.humidity_high {
            errors.push(format!(
                "thresholds.humidity_low ({}) must be below humidity_high ({})",
                t.humidity_low, t.humidity_high
            ));
        }
        for (name, v) in [("humidity_low", t.humidity_low), ("humidity_high", t.humidity_high)] {
            if !(0.0..=100.0).contains(&v) {
                errors.push(format!("thresholds.{name} {v} out of range [0, 100]"));
            }
        }
        if t.light_low >= t.light_high {
            errors.push(format!(
                "thresholds.light_low ({}) must be below light_high ({})",
                t.light_low, t.light_high
            ));
        }
        if t.storm_rain_mm.is_nan() || t.storm_rain_mm < 0.0 {
            errors.push(format!(
                "thresholds.storm_rain_mm must not be negative, got {}",
                t.storm_rain_mm
            ));
        }
        if t.pump_max_on_secs == 0 {
            errors.push("thresholds.pump_max_on_secs must be positive".into());
        }
    }

    fn validate_intervals(&self, errors: &mut Vec<String>) {
        let iv = &self.intervals;
        let named = [
            ("sense_ms", iv.sense_ms),
            ("upload_secs", iv.upload_secs),
            ("buffer_secs", iv.buffer_secs),
            ("backlog_secs", iv.backlog_secs),
            ("control_secs", iv.control_secs),
            ("severe_secs", iv.severe_secs),
            ("forecast_secs", iv.forecast_secs),
            ("model_secs", iv.model_secs),
            ("status_secs", iv.status_secs),
            ("health_secs", iv.health_secs),
            ("chat_ms", iv.chat_ms),
            ("remote_ms", iv.remote_ms),
            ("report_secs", iv.report_secs),
            ("cycle_ms", iv.cycle_ms),
        ];
        for (name, v) in named {
            if v == 0 {
                errors.push(format!("intervals.{name} must be positive"));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Derived settings
    // -----------------------------------------------------------------------

    /// Override the broker address from `MQTT_HOST` / `MQTT_PORT` and the
    /// relay polarity from `RELAY_ACTIVE_LOW`.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("RELAY_ACTIVE_LOW") {
            self.device.active_low = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(host) = std::env::var("MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Ok(port) = std::env::var("MQTT_PORT") {
            self.mqtt.port = port
                .parse()
                .with_context(|| format!("MQTT_PORT is not a port number: {port}"))?;
        }
        Ok(())
    }

    pub fn telegram_enabled(&self) -> bool {
        !self.telegram.token.is_empty()
    }

    pub fn weather_enabled(&self) -> bool {
        !self.weather.api_key.is_empty()
    }

    pub fn ring_capacity(&self) -> u16 {
        self.device.ring_capacity.min(u16::MAX as u32) as u16
    }

    pub fn cycle(&self) -> Duration {
        Duration::from_millis(self.intervals.cycle_ms)
    }

    pub fn settings(&self) -> Settings {
        let t = &self.thresholds;
        let iv = &self.intervals;
        Settings {
            thresholds: Thresholds {
                temp_high: t.temp_high,
                temp_low: t.temp_low,
                humidity_high: t.humidity_high,
                humidity_low: t.humidity_low,
                light_high: t.light_high,
                light_low: t.light_low,
                storm_rain_mm: t.storm_rain_mm,
                pump_max_on_ms: t.pump_max_on_secs * 1000,
            },
            intervals: Intervals {
                sense: Duration::from_millis(iv.sense_ms),
                upload: Duration::from_secs(iv.upload_secs),
                buffer: Duration::from_secs(iv.buffer_secs),
                backlog: Duration::from_secs(iv.backlog_secs),
                control: Duration::from_secs(iv.control_secs),
                severe: Duration::from_secs(iv.severe_secs),
                forecast: Duration::from_secs(iv.forecast_secs),
                model: Duration::from_secs(iv.model_secs),
                status: Duration::from_secs(iv.status_secs),
                health: Duration::from_secs(iv.health_secs),
                chat: Duration::from_millis(iv.chat_ms),
                remote: Duration::from_millis(iv.remote_ms),
                report: Duration::from_secs(iv.report_secs),
            },
            utc_offset: UtcOffset::from_whole_seconds(self.device.utc_offset_secs)
                .unwrap_or(UtcOffset::UTC),
            allowed_chats: self
                .telegram
                .allowed_chats
                .iter()
                .map(|c| c.trim().to_string())
                .collect(),
            drain_pacing: Duration::from_millis(iv.drain_pacing_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file. A missing file yields the
/// defaults.
pub fn load(path: &str) -> Result<Config> {
    let mut config = if Path::new(path).exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?
    } else {
        tracing::warn!(path, "config file not found, using defaults");
        Config::default()
    };
    config.apply_env()?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

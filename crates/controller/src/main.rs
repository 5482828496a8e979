mod board;
mod config;
mod flash;
mod http;
mod model;
mod mqtt;
mod network;
#[cfg(feature = "sim")]
mod sim;
mod telegram;
mod watchdog;
mod weather;

use std::env;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use irrigation_core::clock::WALL_CLOCK_FLOOR;
use irrigation_core::link::SensorBus;
use irrigation_core::store::required_size;
use irrigation_core::{Controller, Io, RingStore, Tick};
use time::OffsetDateTime;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use board::{RelayBoard, Wiring};
use config::Config;
use flash::FileDevice;
use model::ThresholdModel;
use mqtt::MqttBackend;
use network::RouteProbe;
use telegram::TelegramBot;
use watchdog::SoftWatchdog;
use weather::OpenWeather;

#[cfg(feature = "sim")]
fn sensor_bus(cfg: &Config) -> Box<dyn SensorBus> {
    let scenario = sim::Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());
    info!(%scenario, "simulated sensor bus");
    Box::new(sim::FieldSim::new(scenario, cfg.device.utc_offset_secs))
}

/// Without a simulator every reading fails validation, so nothing is uploaded
/// or acted on.
#[cfg(not(feature = "sim"))]
fn sensor_bus(_cfg: &Config) -> Box<dyn SensorBus> {
    struct Unwired;
    impl SensorBus for Unwired {
        fn read(&mut self) -> irrigation_core::state::SensorReading {
            irrigation_core::state::SensorReading {
                temperature: f32::NAN,
                humidity: f32::NAN,
                ..Default::default()
            }
        }
    }
    warn!("no sensor bus compiled in, readings will be rejected");
    Box::new(Unwired)
}

/// Wall clock, withheld while the system clock is obviously unset.
fn wall_clock() -> Option<OffsetDateTime> {
    let now = OffsetDateTime::now_utc();
    (now.unix_timestamp() >= WALL_CLOCK_FLOOR as i64).then_some(now)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config file ─────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;
    let settings = cfg.settings();
    info!(
        root = %cfg.device.root,
        broker = %format!("{}:{}", cfg.mqtt.host, cfg.mqtt.port),
        capacity = cfg.ring_capacity(),
        telegram = cfg.telegram_enabled(),
        weather = cfg.weather_enabled(),
        "config loaded"
    );

    // ── Durable storage ─────────────────────────────────────────────
    let capacity = cfg.ring_capacity();
    let device = FileDevice::open(&cfg.device.storage_path, required_size(capacity))
        .with_context(|| format!("failed to open storage: {}", cfg.device.storage_path))?;
    let store = RingStore::new(device, capacity);

    // ── Collaborators ───────────────────────────────────────────────
    let actuators = RelayBoard::new(Wiring {
        pump: cfg.device.pump_pin,
        canopy: cfg.device.canopy_pin,
        active_low: cfg.device.active_low,
    })?;
    let watchdog = SoftWatchdog::arm(Duration::from_secs(cfg.device.watchdog_timeout_secs))?;
    let io = Io {
        backend: MqttBackend::connect(&cfg.mqtt, &cfg.device.root),
        messaging: cfg
            .telegram_enabled()
            .then(|| TelegramBot::new(&cfg.telegram.token)),
        forecast: cfg.weather_enabled().then(|| OpenWeather::new(&cfg.weather)),
        network: Box::new(RouteProbe::default()),
        sensors: sensor_bus(&cfg),
        actuators: Box::new(actuators),
        model: Box::new(ThresholdModel::new(
            cfg.thresholds.soil_dry,
            cfg.thresholds.temp_high,
            cfg.thresholds.humidity_high,
        )),
        watchdog: Box::new(watchdog),
    };

    let mut controller = Controller::new(store, io, settings);
    info!(buffered = controller.buffered(), "controller started");

    // ── Scheduler loop ──────────────────────────────────────────────
    let boot = Instant::now();
    let mut cycle = interval(cfg.cycle());
    cycle.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cycle.tick() => {
                let tick = Tick::new(boot.elapsed().as_millis() as u64, wall_clock());
                controller.tick(tick).await;
            }
            _ = tokio::signal::ctrl_c() => {
                warn!(buffered = controller.buffered(), "interrupted, shutting down");
                return Ok(());
            }
        }
    }
}

//! The controller: owns the shared context, the ring store and every
//! collaborator, and runs one scheduler cycle per [`Controller::tick`].
//!
//! Each cycle computes connectivity once, handles link edges (resubscribe and
//! drain on reconnect), then runs the due tasks in table order. No fault
//! escapes a cycle; every failure is logged and degrades to skipping work or
//! buffering.

use std::time::Duration;

use serde_json::{json, Value};
use time::UtcOffset;
use tracing::{debug, info, warn};

use crate::chat::{self, ChatInbox, StatusFacts};
use crate::clock::{date_label, stamp_label, Tick};
use crate::control::{self, Applied, Thresholds};
use crate::link::{
    paths, Actuators, Backend, ForecastSource, Inference, Messaging, NetworkStatus, SensorBus,
    Watchdog,
};
use crate::remote::{self, CommandOutcome};
use crate::scheduler::Scheduler;
use crate::state::{on_off, Actuator, Alert, AlertKind, Connectivity, Context};
use crate::store::{InitOutcome, RingStore, StorageDevice};
use crate::uploader::{self, DrainOutcome, Uploader};
use crate::health::{self, DayTracker};

const TIME_ERROR: &str = "time-error";

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Intervals {
    pub sense: Duration,
    pub upload: Duration,
    pub buffer: Duration,
    pub backlog: Duration,
    pub control: Duration,
    pub severe: Duration,
    pub forecast: Duration,
    pub model: Duration,
    pub status: Duration,
    pub health: Duration,
    pub chat: Duration,
    pub remote: Duration,
    pub report: Duration,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            sense: Duration::from_millis(5_000),
            upload: Duration::from_secs(300),
            buffer: Duration::from_secs(300),
            backlog: Duration::from_secs(30),
            control: Duration::from_secs(600),
            severe: Duration::from_secs(600),
            forecast: Duration::from_secs(600),
            model: Duration::from_secs(600),
            status: Duration::from_secs(300),
            health: Duration::from_secs(600),
            chat: Duration::from_millis(2_000),
            remote: Duration::from_millis(100),
            report: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub thresholds: Thresholds,
    pub intervals: Intervals,
    pub utc_offset: UtcOffset,
    pub allowed_chats: Vec<String>,
    pub drain_pacing: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            intervals: Intervals::default(),
            utc_offset: UtcOffset::UTC,
            allowed_chats: Vec::new(),
            drain_pacing: Duration::from_millis(500),
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Every external collaborator the controller talks to. Messaging and
/// forecast are optional and skipped when absent.
pub struct Io<B, M, F> {
    pub backend: B,
    pub messaging: Option<M>,
    pub forecast: Option<F>,
    pub network: Box<dyn NetworkStatus>,
    pub sensors: Box<dyn SensorBus>,
    pub actuators: Box<dyn Actuators>,
    pub model: Box<dyn Inference>,
    pub watchdog: Box<dyn Watchdog>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskKind {
    FeedWatchdog,
    Remote,
    AutoOff,
    Sense,
    Forecast,
    Model,
    Control,
    Severe,
    Upload,
    Buffer,
    Backlog,
    Chat,
    Status,
    Health,
    DailyReset,
    Report,
}

fn task_table(iv: &Intervals) -> Scheduler<TaskKind> {
    Scheduler::new()
        .every(TaskKind::FeedWatchdog, Duration::ZERO)
        .every(TaskKind::Remote, iv.remote)
        .every(TaskKind::AutoOff, Duration::ZERO)
        .every(TaskKind::Sense, iv.sense)
        .every(TaskKind::Forecast, iv.forecast)
        .every(TaskKind::Model, iv.model)
        .every(TaskKind::Control, iv.control)
        .every(TaskKind::Severe, iv.severe)
        .every(TaskKind::Upload, iv.upload)
        .every(TaskKind::Buffer, iv.buffer)
        .every(TaskKind::Backlog, iv.backlog)
        .every(TaskKind::Chat, iv.chat)
        .every(TaskKind::Status, iv.status)
        .every(TaskKind::Health, iv.health)
        .every(TaskKind::DailyReset, Duration::from_secs(1))
        .every(TaskKind::Report, iv.report)
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct Controller<B, M, F, D> {
    ctx: Context,
    store: RingStore<D>,
    io: Io<B, M, F>,
    settings: Settings,
    uploader: Uploader,
    tasks: Scheduler<TaskKind>,
    inbox: ChatInbox,
    days: DayTracker,
    was_online: bool,
}

impl<B, M, F, D> Controller<B, M, F, D>
where
    B: Backend,
    M: Messaging,
    F: ForecastSource,
    D: StorageDevice,
{
    /// Initialise the store, restore auto-mode, and drive every actuator OFF.
    pub fn new(mut store: RingStore<D>, mut io: Io<B, M, F>, settings: Settings) -> Self {
        match store.init() {
            Ok(InitOutcome::Restored { count }) => info!(count, "buffered records restored"),
            Ok(InitOutcome::Formatted) => {}
            Err(e) => warn!("ring store unavailable, offline telemetry will be dropped: {e}"),
        }

        let auto_mode = store.load_auto_mode().unwrap_or(true);
        info!(auto_mode = on_off(auto_mode), "control state restored");

        io.actuators.write(Actuator::Pump, false);
        io.actuators.write(Actuator::Canopy, false);

        Self {
            ctx: Context::new(auto_mode),
            store,
            tasks: task_table(&settings.intervals),
            uploader: Uploader::new(settings.drain_pacing, settings.utc_offset),
            io,
            settings,
            inbox: ChatInbox::default(),
            days: DayTracker::default(),
            was_online: false,
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn buffered(&self) -> usize {
        self.store.count()
    }

    /// Run one scheduler cycle.
    pub async fn tick(&mut self, tick: Tick) {
        self.ctx.link = Connectivity {
            network: self.io.network.is_connected(),
            backend: self.io.backend.is_ready(),
        };
        let online = self.ctx.link.online();

        if online && !self.was_online {
            self.on_reconnect(tick).await;
        } else if !online && self.was_online {
            warn!(
                network = self.ctx.link.network,
                backend = self.ctx.link.backend,
                "link lost, buffering telemetry"
            );
        }
        self.was_online = online;

        for kind in self.tasks.due(tick.mono_ms) {
            self.run(kind, tick).await;
        }
    }

    async fn on_reconnect(&mut self, tick: Tick) {
        info!("link up");
        if let Err(e) = self.io.backend.subscribe(paths::CONTROLS_CURRENT).await {
            warn!("control stream subscribe failed: {e}");
        }
        self.drain(tick).await;
        self.tasks.mark_run(TaskKind::Backlog, tick.mono_ms);
    }

    async fn run(&mut self, kind: TaskKind, tick: Tick) {
        match kind {
            TaskKind::FeedWatchdog => self.io.watchdog.feed(),
            TaskKind::Remote => self.consume_remote(tick).await,
            TaskKind::AutoOff => {
                let target =
                    control::auto_off_target(&self.ctx.control, tick.mono_ms, &self.settings.thresholds);
                self.apply_targets(target.into_iter().collect(), tick).await;
            }
            TaskKind::Sense => self.sense(tick),
            TaskKind::Forecast => self.refresh_forecast(tick).await,
            TaskKind::Model => self.refresh_model(tick),
            TaskKind::Control => {
                let targets = control::evaluate(&self.ctx, &self.settings.thresholds);
                self.apply_targets(targets, tick).await;
            }
            TaskKind::Severe => self.severe_alerts(tick).await,
            TaskKind::Upload => self.upload_live(tick).await,
            TaskKind::Buffer => self.buffer_offline(tick),
            TaskKind::Backlog => {
                if self.ctx.link.online() && self.store.count() > 0 {
                    self.drain(tick).await;
                }
            }
            TaskKind::Chat => self.poll_chat(tick).await,
            TaskKind::Status => self.upload_status(tick).await,
            TaskKind::Health => {
                let report = health::check(&self.ctx);
                if report.healthy() {
                    debug!("health: ok");
                } else {
                    warn!(issues = ?report.issues, "health: degraded");
                }
                self.alert(AlertKind::Health, report.message(), tick).await;
            }
            TaskKind::DailyReset => self.daily_reset(tick).await,
            TaskKind::Report => self.report(tick),
        }
    }

    // -- sensing and inputs ---------------------------------------------------

    fn sense(&mut self, tick: Tick) {
        let reading = self.io.sensors.read();
        self.ctx.sensors.latest = reading;
        self.ctx.sensors.last_read_ms = Some(tick.mono_ms);
        let valid = reading.is_valid();
        if !valid && !self.ctx.sensors.error {
            warn!(?reading, "sensor reading failed validation");
        }
        self.ctx.sensors.error = !valid;
    }

    fn sensors_ok(&self) -> bool {
        self.ctx.sensors.last_read_ms.is_some() && !self.ctx.sensors.error
    }

    async fn refresh_forecast(&mut self, tick: Tick) {
        if !self.ctx.link.network {
            return;
        }
        let Some(source) = self.io.forecast.as_mut() else {
            return;
        };
        match source.fetch().await {
            Ok(f) => {
                let fc = &mut self.ctx.forecast;
                fc.rain_next_1h_mm = f.rain_next_1h_mm;
                fc.pop_next_1h = f.pop_next_1h;
                fc.last_fetch_ms = Some(tick.mono_ms);
                fc.valid = true;
                info!(rain_1h_mm = f.rain_next_1h_mm, pop = f.pop_next_1h, "forecast updated");
            }
            Err(e) => warn!("forecast fetch failed, keeping previous: {e}"),
        }
    }

    fn refresh_model(&mut self, tick: Tick) {
        if !self.sensors_ok() {
            return;
        }
        let r = self.ctx.sensors.latest;
        let recommended = self
            .io
            .model
            .predict([r.soil_moisture as f32, r.temperature, r.humidity]);
        self.ctx.model.recommended = recommended;
        self.ctx.model.last_update_ms = Some(tick.mono_ms);
        self.ctx.model.valid = true;
        debug!(recommended, "model refreshed");
    }

    // -- transitions ----------------------------------------------------------

    async fn apply_targets(&mut self, targets: Vec<control::Target>, tick: Tick) {
        if targets.is_empty() {
            return;
        }
        let applied = control::apply(&mut self.ctx.control, targets, tick.mono_ms);
        for a in applied {
            self.react(a, tick).await;
        }
    }

    /// Side effects of one actuator transition.
    async fn react(&mut self, applied: Applied, tick: Tick) {
        let Applied { event, reason } = applied;
        self.io.actuators.write(event.actuator, event.on);
        info!(actuator = %event.actuator, state = on_off(event.on), %reason, "actuator changed");

        if self.ctx.link.online() {
            let body = self.controls_body(tick);
            if let Err(e) = self.io.backend.set(paths::CONTROLS_CURRENT, &body).await {
                warn!("control status upload failed: {e}");
            }
        }

        self.ctx.alerts.count_today += 1;
        self.alert(event.actuator.alert_kind(), reason, tick).await;
    }

    async fn handle_command(&mut self, outcome: CommandOutcome, tick: Tick) {
        if let Some(on) = outcome.auto_mode_changed {
            info!(auto_mode = on_off(on), "auto mode changed");
            if let Err(e) = self.store.save_auto_mode(on) {
                warn!("persisting auto mode failed: {e}");
            }
        }
        for a in outcome.transitions {
            self.react(a, tick).await;
        }
    }

    async fn consume_remote(&mut self, tick: Tick) {
        while let Some(event) = self.io.backend.next_event() {
            let outcome = remote::consume(&mut self.ctx.control, &event, tick.mono_ms);
            self.handle_command(outcome, tick).await;
        }
    }

    // -- telemetry ------------------------------------------------------------

    async fn upload_live(&mut self, tick: Tick) {
        if !self.ctx.link.online() || !self.sensors_ok() {
            return;
        }
        let snapshot = self.ctx.snapshot(tick.record_secs());
        if let Err(e) = self
            .uploader
            .publish_live(&mut self.io.backend, &snapshot, tick.wall)
            .await
        {
            warn!("live upload failed, buffering: {e}");
            uploader::buffer(&mut self.store, &snapshot);
        }
    }

    fn buffer_offline(&mut self, tick: Tick) {
        if self.ctx.link.online() || !self.sensors_ok() {
            return;
        }
        let snapshot = self.ctx.snapshot(tick.record_secs());
        uploader::buffer(&mut self.store, &snapshot);
    }

    async fn drain(&mut self, tick: Tick) {
        let outcome = self
            .uploader
            .drain(
                &mut self.store,
                &mut self.io.backend,
                self.io.network.as_ref(),
                self.io.watchdog.as_ref(),
                tick.wall,
            )
            .await;
        if let DrainOutcome::Interrupted { pushed } = outcome {
            debug!(pushed, retained = self.store.count(), "backlog retained for next attempt");
        }
    }

    async fn upload_status(&mut self, tick: Tick) {
        if !self.ctx.link.online() {
            return;
        }
        let body = health::status_body(&self.ctx, self.stamp(tick), tick.mono_ms / 1000, self.store.count());
        let body = serde_json::to_value(body).unwrap_or(Value::Null);
        if let Err(e) = self.io.backend.set(paths::SYSTEM_STATUS, &body).await {
            warn!("status upload failed: {e}");
        }
    }

    // -- alerts -----------------------------------------------------------------

    /// Severe-condition alerts belong to automatic operation; manual mode
    /// silences them along with the rules.
    async fn severe_alerts(&mut self, tick: Tick) {
        if !self.ctx.control.auto_mode || !self.sensors_ok() {
            return;
        }
        for message in control::severe_conditions(&self.ctx.sensors.latest, &self.settings.thresholds) {
            warn!(%message, "severe conditions");
            self.alert(AlertKind::Weather, message, tick).await;
        }
    }

    /// Log an alert and upload it when the backend is reachable.
    async fn alert(&mut self, kind: AlertKind, message: String, tick: Tick) {
        self.ctx.alerts.record(Alert {
            kind,
            message: message.clone(),
            at: tick.wall,
        });
        if !self.ctx.link.online() {
            debug!(kind = kind.as_str(), "alert kept local, backend unreachable");
            return;
        }

        let body = json!({
            "type": kind.as_str(),
            "message": message,
            "timestamp": self.stamp(tick),
            "severity": "warning",
            "count_today": self.ctx.alerts.count_today,
        });
        let date = self.date(tick);
        let backend = &mut self.io.backend;
        if let Err(e) = backend.set(&paths::alert_current(kind.as_str()), &body).await {
            warn!(kind = kind.as_str(), "alert upload failed: {e}");
            return;
        }
        if let Err(e) = backend
            .push(&paths::alert_history(&date, kind.as_str()), &body)
            .await
        {
            warn!(kind = kind.as_str(), "alert history upload failed: {e}");
        }
    }

    async fn daily_reset(&mut self, tick: Tick) {
        let Some(wall) = tick.wall else { return };
        let today = date_label(wall, self.settings.utc_offset);
        if !self.days.rolled_over(&today) {
            return;
        }
        info!(%today, count = self.ctx.alerts.count_today, "daily reset");
        self.ctx.alerts.reset_day();
        if self.ctx.link.online() {
            let body = json!({ "count_today": 0, "active": false });
            if let Err(e) = self.io.backend.set(paths::IRRIGATION_CURRENT, &body).await {
                warn!("daily reset upload failed: {e}");
            }
        }
    }

    // -- chat -------------------------------------------------------------------

    async fn poll_chat(&mut self, tick: Tick) {
        if !self.ctx.link.network {
            return;
        }
        let Some(messaging) = self.io.messaging.as_mut() else {
            return;
        };
        let messages = match self.inbox.fetch(messaging).await {
            Ok(m) => m,
            Err(e) => {
                debug!("chat poll failed: {e}");
                return;
            }
        };

        for msg in messages {
            // Each reply may block on a slow uplink.
            self.io.watchdog.feed();
            info!(from = %msg.from, chat = %msg.chat_id, text = %msg.text, "chat message");
            let reply = match chat::parse_command(&msg.text) {
                None => chat::greeting(&msg.from),
                Some(_) if !chat::is_authorized(&self.settings.allowed_chats, &msg.chat_id) => {
                    warn!(chat = %msg.chat_id, "chat: rejected command from unauthorised chat");
                    chat::REFUSED_TEXT.to_string()
                }
                Some(cmd) => {
                    let facts = StatusFacts {
                        uptime_secs: tick.mono_ms / 1000,
                        local_time: self.stamp(tick),
                        buffered: self.store.count(),
                    };
                    let action = chat::respond(&cmd, &self.ctx, &facts);
                    if let Some(command) = action.command {
                        let outcome = remote::apply_command(
                            &mut self.ctx.control,
                            command,
                            tick.mono_ms,
                            "chat command",
                        );
                        self.handle_command(outcome, tick).await;
                    }
                    action.reply
                }
            };
            if let Some(messaging) = self.io.messaging.as_mut() {
                if let Err(e) = messaging.send_message(&msg.chat_id, &reply).await {
                    warn!(chat = %msg.chat_id, "chat reply failed: {e}");
                }
            }
        }
    }

    // -- reporting ----------------------------------------------------------------

    fn report(&self, tick: Tick) {
        let r = &self.ctx.sensors.latest;
        let c = &self.ctx.control;
        info!(
            time = %self.stamp(tick),
            temp = r.temperature,
            humidity = r.humidity,
            soil = r.soil_moisture,
            light = r.light_level,
            rain = r.rain_detected,
            pump = on_off(c.pump_on),
            canopy = on_off(c.canopy_on),
            auto = on_off(c.auto_mode),
            online = self.ctx.link.online(),
            buffered = self.store.count(),
            alerts_today = self.ctx.alerts.count_today,
            "status report"
        );
    }

    fn controls_body(&self, tick: Tick) -> Value {
        let c = &self.ctx.control;
        json!({
            "pump_state": on_off(c.pump_on),
            "canopy_state": on_off(c.canopy_on),
            "auto_mode": c.auto_mode,
            "timestamp": self.stamp(tick),
        })
    }

    fn stamp(&self, tick: Tick) -> String {
        tick.wall
            .map(|w| stamp_label(w, self.settings.utc_offset))
            .unwrap_or_else(|| TIME_ERROR.to_string())
    }

    fn date(&self, tick: Tick) -> String {
        tick.wall
            .map(|w| date_label(w, self.settings.utc_offset))
            .unwrap_or_else(|| TIME_ERROR.to_string())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::fakes::*;
    use crate::state::SensorReading;
    use crate::store::{required_size, MemoryDevice};
    use time::macros::{datetime, offset};
    use time::OffsetDateTime;

    const CAP: u16 = 16;
    const MIN: u64 = 60_000;

    type TestController = Controller<FakeBackend, FakeMessaging, FakeForecast, MemoryDevice>;

    struct Rig {
        ctl: TestController,
        net: FakeNetwork,
        sensors: FakeSensors,
        actuators: RecordingActuators,
        model: FixedModel,
        dog: CountingWatchdog,
    }

    fn reading() -> SensorReading {
        SensorReading {
            temperature: 25.0,
            humidity: 60.0,
            soil_moisture: 300,
            light_level: 12_000.0,
            rain_detected: true,
        }
    }

    fn settings() -> Settings {
        Settings {
            utc_offset: offset!(+7),
            allowed_chats: vec!["42".into()],
            drain_pacing: Duration::ZERO,
            ..Settings::default()
        }
    }

    fn rig_with(device: MemoryDevice, rain_forecast: f32) -> Rig {
        let net = FakeNetwork::up();
        let sensors = FakeSensors::new(reading());
        let actuators = RecordingActuators::default();
        let model = FixedModel::new(true);
        let dog = CountingWatchdog::default();
        let io = Io {
            backend: FakeBackend::ready(),
            messaging: Some(FakeMessaging::default()),
            forecast: Some(FakeForecast::rain(rain_forecast)),
            network: Box::new(net.clone()),
            sensors: Box::new(sensors.clone()),
            actuators: Box::new(actuators.clone()),
            model: Box::new(model.clone()),
            watchdog: Box::new(dog.clone()),
        };
        let ctl = Controller::new(RingStore::new(device, CAP), io, settings());
        Rig {
            ctl,
            net,
            sensors,
            actuators,
            model,
            dog,
        }
    }

    fn rig() -> Rig {
        rig_with(MemoryDevice::new(required_size(CAP)), 0.0)
    }

    fn at(ms: u64) -> Tick {
        let base = datetime!(2024-05-01 03:00:00 UTC);
        Tick::new(ms, Some(base + time::Duration::milliseconds(ms as i64)))
    }

    fn wall(ms: u64) -> OffsetDateTime {
        at(ms).wall.unwrap()
    }

    fn alert_pushes<'a>(backend: &'a FakeBackend, kind: &str) -> Vec<&'a Value> {
        backend
            .pushes
            .iter()
            .filter(|(p, _)| p.starts_with("alerts/history/") && p.ends_with(kind))
            .map(|(_, v)| v)
            .collect()
    }

    // -- startup ----------------------------------------------------------------

    #[test]
    fn startup_drives_actuators_off_and_defaults_auto_on() {
        let r = rig();
        assert_eq!(
            r.actuators.writes(),
            vec![(Actuator::Pump, false), (Actuator::Canopy, false)]
        );
        assert!(r.ctl.context().control.auto_mode);
    }

    #[test]
    fn startup_restores_persisted_auto_mode() {
        let mut store = RingStore::new(MemoryDevice::new(required_size(CAP)), CAP);
        store.init().unwrap();
        store.save_auto_mode(false).unwrap();
        let image = store.into_device().durable().to_vec();

        let r = rig_with(MemoryDevice::from_image(image), 0.0);
        assert!(!r.ctl.context().control.auto_mode);
    }

    // -- control scenarios -------------------------------------------------------

    #[tokio::test]
    async fn dry_forecast_with_rain_sensor_starts_pump() {
        let mut r = rig();
        r.ctl.tick(at(0)).await;

        assert!(r.ctl.context().control.pump_on);
        assert!(r.actuators.writes().contains(&(Actuator::Pump, true)));
        let alerts = alert_pushes(&r.ctl.io.backend, "irrigation");
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0]["message"].as_str().unwrap().contains("no rain forecast"));
        assert_eq!(alerts[0]["count_today"], 1);
        assert_eq!(r.ctl.io.backend.sets_to("controls/current")[0]["pump_state"], "ON");
    }

    #[tokio::test]
    async fn model_rejection_stops_running_pump_once() {
        let mut r = rig();
        r.model.0.set(false);
        r.ctl.ctx.control.apply_actuator_target(Actuator::Pump, true, 0);

        r.ctl.tick(at(0)).await;
        assert!(!r.ctl.context().control.pump_on);
        assert_eq!(alert_pushes(&r.ctl.io.backend, "irrigation").len(), 1);

        r.ctl.tick(at(10 * MIN)).await;
        assert_eq!(alert_pushes(&r.ctl.io.backend, "irrigation").len(), 1);
        assert_eq!(r.ctl.context().alerts.count_today, 1);
    }

    #[tokio::test]
    async fn auto_off_fires_even_with_auto_mode_disabled() {
        let mut r = rig();
        r.ctl.ctx.control.auto_mode = false;
        r.ctl.ctx.control.apply_actuator_target(Actuator::Pump, true, 0);

        r.ctl.tick(at(MIN)).await;
        assert!(r.ctl.context().control.pump_on);

        r.ctl.tick(at(5 * MIN)).await;
        assert!(!r.ctl.context().control.pump_on);
        let alerts = alert_pushes(&r.ctl.io.backend, "irrigation");
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0]["message"].as_str().unwrap().contains("run limit"));
    }

    #[tokio::test]
    async fn remote_auto_off_blocks_pending_pump_start() {
        let mut r = rig();
        r.ctl.io.backend.inject("/", r#"{"auto_mode": false}"#);

        r.ctl.tick(at(0)).await;
        r.ctl.tick(at(10 * MIN)).await;
        r.ctl.tick(at(20 * MIN)).await;

        assert!(!r.ctl.context().control.auto_mode);
        assert!(!r.ctl.context().control.pump_on);
        assert_eq!(r.ctl.store.load_auto_mode(), Some(false));
    }

    #[tokio::test]
    async fn remote_pump_command_goes_through_transition() {
        let mut r = rig();
        r.ctl.ctx.control.auto_mode = false;
        r.ctl.io.backend.inject("/pump_state", "\"ON\"");

        r.ctl.tick(at(0)).await;
        assert!(r.ctl.context().control.pump_on);
        assert_eq!(r.ctl.context().alerts.count_today, 1);

        // Echo of our own controls/current update is a no-op.
        r.ctl.io.backend.inject("/", r#"{"pump_state":"ON","canopy_state":"OFF","auto_mode":false}"#);
        r.ctl.tick(at(1_000)).await;
        assert_eq!(r.ctl.context().alerts.count_today, 1);
    }

    #[tokio::test]
    async fn severe_alerts_do_not_count() {
        let mut r = rig();
        r.sensors.set(SensorReading {
            temperature: 36.0,
            light_level: 25_000.0,
            ..reading()
        });

        r.ctl.tick(at(0)).await;
        let backend = &r.ctl.io.backend;
        assert_eq!(alert_pushes(backend, "weather").len(), 2);
        let transitions =
            alert_pushes(backend, "irrigation").len() + alert_pushes(backend, "canopy").len();
        assert_eq!(r.ctl.context().alerts.count_today as usize, transitions);
    }

    #[tokio::test]
    async fn manual_mode_silences_severe_alerts() {
        let mut r = rig();
        r.ctl.ctx.control.auto_mode = false;
        r.sensors.set(SensorReading {
            temperature: 36.0,
            light_level: 25_000.0,
            ..reading()
        });

        r.ctl.tick(at(0)).await;
        assert!(alert_pushes(&r.ctl.io.backend, "weather").is_empty());
        assert!(r
            .ctl
            .context()
            .alerts
            .recent
            .iter()
            .all(|a| a.kind != AlertKind::Weather));
    }

    // -- telemetry ----------------------------------------------------------------

    #[tokio::test]
    async fn online_telemetry_goes_live_not_to_store() {
        let mut r = rig();
        r.ctl.tick(at(0)).await;

        assert_eq!(r.ctl.io.backend.sets_to("sensors/current").len(), 1);
        assert_eq!(r.ctl.io.backend.pushes_to("sensors/history/2024-05-01").len(), 1);
        assert_eq!(r.ctl.buffered(), 0);
    }

    #[tokio::test]
    async fn failed_live_upload_falls_back_to_store() {
        let mut r = rig();
        r.ctl.io.backend.fail_sets = true;
        r.ctl.tick(at(0)).await;
        assert_eq!(r.ctl.buffered(), 1);
    }

    #[tokio::test]
    async fn offline_buffers_then_drains_on_reconnect() {
        let mut r = rig();
        r.net.set(false);

        r.ctl.tick(at(0)).await;
        r.ctl.tick(at(5 * MIN)).await;
        r.ctl.tick(at(10 * MIN)).await;
        assert_eq!(r.ctl.buffered(), 3);
        assert!(r.ctl.io.backend.pushes.is_empty());

        r.net.set(true);
        let feeds_before = r.dog.feeds();
        r.ctl.tick(at(10 * MIN + 100)).await;

        assert_eq!(r.ctl.buffered(), 0);
        assert_eq!(r.ctl.io.backend.subscriptions, vec!["controls/current".to_string()]);
        let history = r.ctl.io.backend.pushes_to("sensors/history/");
        assert_eq!(history.len(), 3);
        assert_eq!(history[0]["timestamp"], "2024-05-01_10:00:00");
        assert!(r.dog.feeds() >= feeds_before + 3);
    }

    #[tokio::test]
    async fn interrupted_drain_retries_on_backlog_interval() {
        let mut r = rig();
        r.net.set(false);
        r.ctl.tick(at(0)).await;
        r.ctl.tick(at(5 * MIN)).await;

        r.net.set(true);
        r.ctl.io.backend.fail_push_at = Some(1);
        r.ctl.tick(at(6 * MIN)).await;
        assert_eq!(r.ctl.buffered(), 2);

        r.ctl.io.backend.fail_push_at = None;
        r.ctl.tick(at(6 * MIN + 30_000)).await;
        assert_eq!(r.ctl.buffered(), 0);
    }

    #[tokio::test]
    async fn invalid_reading_is_neither_uploaded_nor_buffered() {
        let mut r = rig();
        r.sensors.set(SensorReading {
            humidity: f32::NAN,
            ..reading()
        });
        r.ctl.tick(at(0)).await;

        assert!(r.ctl.context().sensors.error);
        assert!(r.ctl.io.backend.sets_to("sensors/current").is_empty());
        assert_eq!(r.ctl.buffered(), 0);
        assert!(!r.ctl.context().model.valid);
    }

    // -- chat ---------------------------------------------------------------------

    #[tokio::test]
    async fn chat_commands_respect_allow_list() {
        let mut r = rig();
        r.ctl.ctx.control.auto_mode = false;
        r.ctl.tick(at(0)).await; // primes the inbox

        let m = r.ctl.io.messaging.as_mut().unwrap();
        m.deliver(1, "999", "/pump on");
        r.ctl.tick(at(2_000)).await;
        assert!(!r.ctl.context().control.pump_on);
        assert_eq!(
            r.ctl.io.messaging.as_ref().unwrap().last_reply(),
            Some(chat::REFUSED_TEXT)
        );

        let m = r.ctl.io.messaging.as_mut().unwrap();
        m.deliver(2, "42", "/pump on");
        r.ctl.tick(at(4_000)).await;
        assert!(r.ctl.context().control.pump_on);
        assert_eq!(
            r.ctl.io.messaging.as_ref().unwrap().last_reply(),
            Some("pump turned ON")
        );
    }

    #[tokio::test]
    async fn chat_auto_command_persists_mode() {
        let mut r = rig();
        r.ctl.tick(at(0)).await;
        r.ctl.io.messaging.as_mut().unwrap().deliver(5, "42", "/auto off");
        r.ctl.tick(at(2_000)).await;

        assert!(!r.ctl.context().control.auto_mode);
        assert_eq!(r.ctl.store.load_auto_mode(), Some(false));
    }

    #[tokio::test]
    async fn plain_chat_text_gets_greeting() {
        let mut r = rig();
        r.ctl.tick(at(0)).await;
        r.ctl.io.messaging.as_mut().unwrap().deliver(7, "999", "hi");
        r.ctl.tick(at(2_000)).await;
        assert_eq!(
            r.ctl.io.messaging.as_ref().unwrap().last_reply(),
            Some("Hello tester! Type /help to see the commands.")
        );
    }

    #[tokio::test]
    async fn watchdog_fed_for_each_chat_message() {
        let mut r = rig();
        r.ctl.tick(at(0)).await;
        let m = r.ctl.io.messaging.as_mut().unwrap();
        for id in 1..=5 {
            m.deliver(id, "42", "/status");
        }
        let feeds_before = r.dog.feeds();
        r.ctl.tick(at(2_000)).await;

        assert_eq!(r.ctl.io.messaging.as_ref().unwrap().sent.len(), 5);
        assert!(r.dog.feeds() >= feeds_before + 1 + 5, "one per cycle plus one per message");
    }

    // -- housekeeping ---------------------------------------------------------------

    #[tokio::test]
    async fn daily_reset_zeroes_counter_on_date_change() {
        let mut r = rig();
        r.ctl.tick(at(0)).await;
        assert_eq!(r.ctl.context().alerts.count_today, 1);

        // 03:00 UTC + 14h = 17:00 UTC = 00:00 next day at +7.
        let next_day = 14 * 60 * MIN;
        assert_eq!(date_label(wall(next_day), offset!(+7)), "2024-05-02");
        r.ctl.tick(at(next_day)).await;

        let resets = r.ctl.io.backend.sets_to("alerts/current/irrigation");
        assert!(resets.iter().any(|v| v["count_today"] == 0 && v["active"] == false));
    }

    #[tokio::test]
    async fn status_and_health_uploaded_when_online() {
        let mut r = rig();
        r.ctl.tick(at(0)).await;
        let status = r.ctl.io.backend.sets_to("system/status");
        assert_eq!(status.len(), 1);
        assert_eq!(status[0]["buffered_records"], 0);
        assert_eq!(r.ctl.io.backend.sets_to("alerts/current/health").len(), 1);
    }

    #[tokio::test]
    async fn offline_alerts_stay_local() {
        let mut r = rig();
        r.net.set(false);
        r.ctl.tick(at(0)).await;

        assert!(r.ctl.io.backend.sets.is_empty());
        assert!(r
            .ctl
            .context()
            .alerts
            .recent
            .iter()
            .any(|a| a.kind == AlertKind::Health));
    }

    #[tokio::test]
    async fn watchdog_fed_every_cycle() {
        let mut r = rig();
        r.ctl.tick(at(0)).await;
        let after_first = r.dog.feeds();
        r.ctl.tick(at(10)).await;
        r.ctl.tick(at(20)).await;
        assert_eq!(r.dog.feeds(), after_first + 2);
    }
}

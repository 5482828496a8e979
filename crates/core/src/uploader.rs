//! Telemetry upload: the live path while connected, buffering into the ring
//! store while not, and draining the backlog once the link returns.

use std::time::Duration;

use serde_json::Value;
use time::{OffsetDateTime, UtcOffset};
use tracing::{debug, error, info, warn};

use crate::clock::{date_label, resolve_record_time, stamp_label};
use crate::error::LinkError;
use crate::link::{paths, Backend, NetworkStatus, Watchdog};
use crate::snapshot::TelemetrySnapshot;
use crate::store::{RingStore, StorageDevice};

const TIME_ERROR: &str = "time-error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Link was down when the drain was requested; nothing attempted.
    Offline,
    /// Store was already empty.
    Empty,
    /// Every record was pushed and the store cleared.
    Completed { pushed: usize },
    /// Stopped early. All records, including those already pushed, remain
    /// buffered.
    Interrupted { pushed: usize },
}

pub struct Uploader {
    pacing: Duration,
    offset: UtcOffset,
}

impl Uploader {
    pub fn new(pacing: Duration, offset: UtcOffset) -> Self {
        Self { pacing, offset }
    }

    /// Push every buffered record to the history path, oldest first, then
    /// clear the store. Connectivity is re-checked after each push; any loss
    /// or push failure stops the drain and keeps the store intact.
    pub async fn drain<D, B>(
        &self,
        store: &mut RingStore<D>,
        backend: &mut B,
        network: &dyn NetworkStatus,
        watchdog: &dyn Watchdog,
        now: Option<OffsetDateTime>,
    ) -> DrainOutcome
    where
        D: StorageDevice,
        B: Backend,
    {
        if !linked(network, backend) {
            return DrainOutcome::Offline;
        }
        let total = store.count();
        if total == 0 {
            return DrainOutcome::Empty;
        }
        info!(count = total, "uploader: draining buffered records");

        let mut pushed = 0;
        for record in store.read_all() {
            watchdog.feed();

            let snapshot = match record {
                Ok(s) => s,
                Err(e) => {
                    error!(pushed, "uploader: reading buffered record failed: {e}");
                    return DrainOutcome::Interrupted { pushed };
                }
            };

            let (date, body) = self.history_entry(&snapshot, now);
            if let Err(e) = backend.push(&paths::sensors_history(&date), &body).await {
                warn!(pushed, remaining = total - pushed, "uploader: drain interrupted, push failed: {e}");
                return DrainOutcome::Interrupted { pushed };
            }
            pushed += 1;

            if pushed < total && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }

            if !linked(network, backend) {
                warn!(pushed, remaining = total - pushed, "uploader: drain interrupted, connectivity lost");
                return DrainOutcome::Interrupted { pushed };
            }
        }

        if let Err(e) = store.clear() {
            error!("uploader: backlog pushed but clearing the store failed: {e}");
            return DrainOutcome::Interrupted { pushed };
        }
        info!(pushed, "uploader: backlog drained");
        DrainOutcome::Completed { pushed }
    }

    /// Live path: overwrite the current reading and append it to history.
    pub async fn publish_live<B: Backend>(
        &self,
        backend: &mut B,
        snapshot: &TelemetrySnapshot,
        now: Option<OffsetDateTime>,
    ) -> Result<(), LinkError> {
        let (date, body) = self.history_entry(snapshot, now);
        backend.set(paths::SENSORS_CURRENT, &body).await?;
        backend.push(&paths::sensors_history(&date), &body).await?;
        debug!(%date, "uploader: live telemetry published");
        Ok(())
    }

    /// Date label and JSON body for a snapshot. Snapshots captured before the
    /// wall clock was known are stamped with `now`.
    fn history_entry(&self, s: &TelemetrySnapshot, now: Option<OffsetDateTime>) -> (String, Value) {
        let (date, stamp) = match resolve_record_time(s.timestamp, now) {
            Some(at) => (date_label(at, self.offset), stamp_label(at, self.offset)),
            None => (TIME_ERROR.to_string(), TIME_ERROR.to_string()),
        };
        let body = serde_json::to_value(s.to_record(stamp)).unwrap_or(Value::Null);
        (date, body)
    }
}

/// Append a snapshot to the backlog. A failed append drops the snapshot.
pub fn buffer<D: StorageDevice>(store: &mut RingStore<D>, snapshot: &TelemetrySnapshot) -> bool {
    match store.append(snapshot) {
        Ok(slot) => {
            debug!(slot, count = store.count(), "uploader: snapshot buffered");
            true
        }
        Err(e) => {
            warn!("uploader: append dropped, snapshot lost: {e}");
            false
        }
    }
}

fn linked<B: Backend>(network: &dyn NetworkStatus, backend: &B) -> bool {
    network.is_connected() && backend.is_ready()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::fakes::{CountingWatchdog, FakeBackend, FakeNetwork};
    use crate::store::{required_size, MemoryDevice};
    use time::macros::{datetime, offset};

    const CAP: u16 = 8;

    fn snap(ts: u32) -> TelemetrySnapshot {
        TelemetrySnapshot {
            timestamp: ts,
            temperature: 24.0,
            humidity: 70.0,
            soil_moisture: 410,
            light_level: 9_000.0,
            rain_detected: false,
            pump_on: false,
            canopy_on: false,
            auto_mode: true,
        }
    }

    fn uploader() -> Uploader {
        Uploader::new(Duration::ZERO, offset!(+7))
    }

    fn store_with(n: u32) -> RingStore<MemoryDevice> {
        let mut store = RingStore::new(MemoryDevice::new(required_size(CAP)), CAP);
        store.init().unwrap();
        for i in 0..n {
            store.append(&snap(1_714_521_600 + i * 60)).unwrap();
        }
        store
    }

    fn now() -> Option<OffsetDateTime> {
        Some(datetime!(2024-05-02 00:00:00 UTC))
    }

    // -- drain ------------------------------------------------------------------

    #[tokio::test]
    async fn full_drain_pushes_in_order_and_clears() {
        let mut store = store_with(3);
        let mut backend = FakeBackend::ready();
        let dog = CountingWatchdog::default();

        let out = uploader()
            .drain(&mut store, &mut backend, &FakeNetwork::up(), &dog, now())
            .await;

        assert_eq!(out, DrainOutcome::Completed { pushed: 3 });
        assert_eq!(store.count(), 0);
        let stamps: Vec<_> = backend
            .pushes_to("sensors/history/")
            .iter()
            .map(|v| v["timestamp"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            stamps,
            ["2024-05-01_07:00:00", "2024-05-01_07:01:00", "2024-05-01_07:02:00"]
        );
        assert_eq!(dog.feeds(), 3);
    }

    #[tokio::test]
    async fn push_failure_keeps_every_record() {
        let mut store = store_with(5);
        let mut backend = FakeBackend::ready();
        backend.fail_push_at = Some(2);

        let out = uploader()
            .drain(&mut store, &mut backend, &FakeNetwork::up(), &CountingWatchdog::default(), now())
            .await;

        assert_eq!(out, DrainOutcome::Interrupted { pushed: 2 });
        assert_eq!(store.count(), 5);
    }

    #[tokio::test]
    async fn backend_loss_mid_drain_stops_immediately() {
        let mut store = store_with(4);
        let mut backend = FakeBackend::ready();
        backend.unready_after = Some(1);

        let out = uploader()
            .drain(&mut store, &mut backend, &FakeNetwork::up(), &CountingWatchdog::default(), now())
            .await;

        assert_eq!(out, DrainOutcome::Interrupted { pushed: 1 });
        assert_eq!(backend.pushes.len(), 1);
        assert_eq!(store.count(), 4);
    }

    #[tokio::test]
    async fn offline_drain_attempts_nothing() {
        let mut store = store_with(2);
        let mut backend = FakeBackend::ready();
        let net = FakeNetwork::up();
        net.set(false);

        let out = uploader()
            .drain(&mut store, &mut backend, &net, &CountingWatchdog::default(), now())
            .await;

        assert_eq!(out, DrainOutcome::Offline);
        assert!(backend.pushes.is_empty());
    }

    #[tokio::test]
    async fn empty_store_reports_empty() {
        let mut store = store_with(0);
        let out = uploader()
            .drain(&mut store, &mut FakeBackend::ready(), &FakeNetwork::up(), &CountingWatchdog::default(), now())
            .await;
        assert_eq!(out, DrainOutcome::Empty);
    }

    #[tokio::test]
    async fn boot_relative_record_stamped_with_upload_time() {
        let mut store = store_with(0);
        store.append(&snap(120)).unwrap();
        let mut backend = FakeBackend::ready();

        uploader()
            .drain(&mut store, &mut backend, &FakeNetwork::up(), &CountingWatchdog::default(), now())
            .await;

        let (path, body) = &backend.pushes[0];
        assert_eq!(path, "sensors/history/2024-05-02");
        assert_eq!(body["timestamp"], "2024-05-02_07:00:00");
    }

    // -- live path ----------------------------------------------------------------

    #[tokio::test]
    async fn live_publish_sets_current_and_pushes_history() {
        let mut backend = FakeBackend::ready();
        uploader()
            .publish_live(&mut backend, &snap(1_714_521_600), now())
            .await
            .unwrap();

        assert_eq!(backend.sets_to("sensors/current").len(), 1);
        assert_eq!(backend.pushes_to("sensors/history/2024-05-01").len(), 1);
    }

    #[tokio::test]
    async fn live_publish_failure_surfaces() {
        let mut backend = FakeBackend::ready();
        backend.fail_sets = true;
        let res = uploader().publish_live(&mut backend, &snap(1), None).await;
        assert!(res.is_err());
        assert!(backend.pushes.is_empty());
    }

    #[test]
    fn missing_wall_clock_yields_time_error() {
        let (date, body) = uploader().history_entry(&snap(5), None);
        assert_eq!(date, "time-error");
        assert_eq!(body["timestamp"], "time-error");
    }

    // -- buffer ---------------------------------------------------------------------

    #[test]
    fn buffer_drops_on_device_failure() {
        let mut store = store_with(1);
        store.device_mut().fail_next_commits(1);
        assert!(!buffer(&mut store, &snap(2)));
        assert_eq!(store.count(), 1);
        assert!(buffer(&mut store, &snap(3)));
        assert_eq!(store.count(), 2);
    }
}

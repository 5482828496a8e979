//! Software watchdog. A monitor thread aborts the process when the scheduler
//! stops feeding it, so a supervisor (systemd, docker) restarts the
//! controller with every actuator driven OFF again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use irrigation_core::link::Watchdog;
use tracing::{error, info};

pub struct SoftWatchdog {
    started: Instant,
    last_feed_ms: Arc<AtomicU64>,
}

/// `true` once more than `timeout_ms` has passed since the last feed.
pub(crate) fn expired(last_feed_ms: u64, now_ms: u64, timeout_ms: u64) -> bool {
    now_ms.saturating_sub(last_feed_ms) > timeout_ms
}

impl SoftWatchdog {
    fn unarmed() -> Self {
        Self {
            started: Instant::now(),
            last_feed_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start the monitor thread. It checks four times per timeout period.
    pub fn arm(timeout: Duration) -> Result<Self> {
        let dog = Self::unarmed();
        let started = dog.started;
        let last_feed = Arc::clone(&dog.last_feed_ms);
        let timeout_ms = timeout.as_millis() as u64;
        let period = (timeout / 4).max(Duration::from_millis(100));

        thread::Builder::new()
            .name("watchdog".into())
            .spawn(move || loop {
                thread::sleep(period);
                let now_ms = started.elapsed().as_millis() as u64;
                let last = last_feed.load(Ordering::SeqCst);
                if expired(last, now_ms, timeout_ms) {
                    error!(
                        starved_ms = now_ms - last,
                        timeout_ms, "watchdog expired, aborting"
                    );
                    std::process::abort();
                }
            })
            .context("failed to spawn watchdog thread")?;

        info!(timeout_secs = timeout.as_secs(), "watchdog armed");
        Ok(dog)
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

impl Watchdog for SoftWatchdog {
    fn feed(&self) {
        self.last_feed_ms.store(self.now_ms(), Ordering::SeqCst);
    }
}

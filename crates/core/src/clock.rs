//! Time bookkeeping for a scheduler cycle: a monotonic millisecond counter for
//! interval checks plus an optional wall clock for record timestamps.

use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

/// Unix seconds below this value were captured before the wall clock was
/// synchronised and are really seconds since boot.
pub const WALL_CLOCK_FLOOR: u32 = 1_000_000_000;

const DATE_FMT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");
const STAMP_FMT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]_[hour]:[minute]:[second]");

/// The instant a scheduler cycle runs at.
#[derive(Debug, Clone, Copy)]
pub struct Tick {
    /// Milliseconds since the controller booted.
    pub mono_ms: u64,
    /// Wall clock, when one is available.
    pub wall: Option<OffsetDateTime>,
}

impl Tick {
    pub fn new(mono_ms: u64, wall: Option<OffsetDateTime>) -> Self {
        Self { mono_ms, wall }
    }

    /// Timestamp stored in a telemetry snapshot: unix seconds when the wall
    /// clock is known, otherwise seconds since boot.
    pub fn record_secs(&self) -> u32 {
        match self.wall {
            Some(w) => w.unix_timestamp().clamp(0, u32::MAX as i64) as u32,
            None => (self.mono_ms / 1000) as u32,
        }
    }
}

/// Local calendar date, `YYYY-MM-DD`.
pub fn date_label(at: OffsetDateTime, offset: UtcOffset) -> String {
    at.to_offset(offset)
        .format(DATE_FMT)
        .unwrap_or_else(|_| "time-error".to_string())
}

/// Local timestamp, `YYYY-MM-DD_HH:MM:SS`.
pub fn stamp_label(at: OffsetDateTime, offset: UtcOffset) -> String {
    at.to_offset(offset)
        .format(STAMP_FMT)
        .unwrap_or_else(|_| "time-error".to_string())
}

/// Resolve a stored record timestamp to a wall-clock instant, falling back to
/// `fallback` for boot-relative values.
pub fn resolve_record_time(secs: u32, fallback: Option<OffsetDateTime>) -> Option<OffsetDateTime> {
    if secs < WALL_CLOCK_FLOOR {
        return fallback;
    }
    OffsetDateTime::from_unix_timestamp(secs as i64).ok().or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset};

    #[test]
    fn labels_use_local_offset() {
        let at = datetime!(2024-05-01 20:30:05 UTC);
        assert_eq!(date_label(at, offset!(+7)), "2024-05-02");
        assert_eq!(stamp_label(at, offset!(+7)), "2024-05-02_03:30:05");
    }

    #[test]
    fn record_secs_falls_back_to_uptime() {
        let tick = Tick::new(42_900, None);
        assert_eq!(tick.record_secs(), 42);
    }

    #[test]
    fn record_secs_prefers_wall_clock() {
        let tick = Tick::new(42_900, Some(datetime!(2024-05-01 00:00:00 UTC)));
        assert_eq!(tick.record_secs(), 1_714_521_600);
    }

    #[test]
    fn boot_relative_record_uses_fallback() {
        let fallback = datetime!(2024-05-01 00:00:00 UTC);
        assert_eq!(resolve_record_time(3600, Some(fallback)), Some(fallback));
        assert_eq!(resolve_record_time(3600, None), None);
        assert_eq!(
            resolve_record_time(1_714_521_600, Some(datetime!(2000-01-01 00:00:00 UTC))),
            Some(fallback)
        );
    }
}

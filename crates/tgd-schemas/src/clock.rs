//! Injectable wall-clock.
//!
//! Every component reads time through [`Clock`] so scenario tests can
//! advance time deterministically (quiet-period elapse, daily counter
//! rollover) without sleeping.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Source of "now". Implementations must be cheap and thread-safe.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock: `Utc::now()`.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replay harnesses.
///
/// Time only moves when `set` or `advance` is called.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.lock() = to;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.lock();
        *now += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        // A poisoned guard still holds a valid timestamp.
        self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.lock()
    }
}

/// Next value of a per-UTC-day counter: increments while `prev` falls on
/// the same UTC day as `now`, restarts at 1 otherwise (including the
/// first-ever event, `prev == None`).
pub fn next_daily_count(prev: Option<DateTime<Utc>>, now: DateTime<Utc>, count: u32) -> u32 {
    match prev {
        Some(p) if p.date_naive() == now.date_naive() => count.saturating_add(1),
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn manual_clock_advances_only_on_request() {
        let start = Utc.with_ymd_and_hms(2026, 2, 16, 9, 30, 0).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::seconds(301));
        assert_eq!(clock.now(), start + Duration::seconds(301));
    }

    #[test]
    fn daily_count_increments_within_a_day_and_resets_across() {
        let morning = Utc.with_ymd_and_hms(2026, 2, 16, 9, 30, 0).unwrap();
        let evening = Utc.with_ymd_and_hms(2026, 2, 16, 21, 0, 0).unwrap();
        let next_day = Utc.with_ymd_and_hms(2026, 2, 17, 9, 30, 0).unwrap();

        assert_eq!(next_daily_count(None, morning, 0), 1);
        assert_eq!(next_daily_count(Some(morning), evening, 1), 2);
        assert_eq!(next_daily_count(Some(evening), next_day, 2), 1);
    }
}

//! Time source used for every expiry computation.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
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

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock();
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Milliseconds since the epoch, clamped at zero.
pub fn to_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis().max(0)
}

pub fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let start = from_ms(1_000);
        let clock = ManualClock::new(start);

        clock.advance(Duration::minutes(14));
        assert_eq!(clock.now(), start + Duration::minutes(14));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn ms_round_trip_keeps_millisecond_precision() {
        let at = from_ms(1_700_000_000_123);
        assert_eq!(to_ms(at), 1_700_000_000_123);
    }
}

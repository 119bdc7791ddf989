//! Time source abstraction. All scheduling math goes through a `Clock` so
//! journey delays can be driven forward deterministically in tests.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Controllable clock for tests. Starts at a fixed instant and only moves
/// when told to.
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.write() = to;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

pub fn manual_clock(start: DateTime<Utc>) -> Arc<ManualClock> {
    Arc::new(ManualClock::new(start))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc::now();
        let clock = manual_clock(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::minutes(30));
        assert_eq!(clock.now(), start + Duration::minutes(30));

        let later = start + Duration::days(2);
        clock.set(later);
        assert_eq!(clock.now(), later);
    }
}

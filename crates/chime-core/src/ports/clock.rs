//! Clock port: the protocol's single source of "now".
//!
//! Every stamp (`LockedAt`, `updated_at`) and every claim/timeout comparison
//! runs through this trait, so tests can pin time wherever they need it.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock: wall time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock: returns whatever it was last set to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_holds_and_advances() {
        let t0 = Utc::now();
        let clock = FixedClock::at(t0);
        assert_eq!(clock.now(), t0);
        assert_eq!(clock.now(), t0);

        clock.advance(Duration::seconds(3));
        assert_eq!(clock.now(), t0 + Duration::seconds(3));

        clock.set(t0);
        assert_eq!(clock.now(), t0);
    }
}

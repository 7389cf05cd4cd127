use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// Authoritative time source. Abstracted
/// behind a trait so tests can freeze time instead of racing the wall clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// The account-local calendar date, as a sortable key for the day
    /// boundary: day boundaries are per-account using the account's
    /// configured timezone (default Europe/Moscow).
    fn local_date(&self, tz: Tz) -> String {
        self.now().with_timezone(&tz).format("%Y-%m-%d").to_string()
    }
}

/// Production clock: reads the real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// A clock whose `now()` is set explicitly, for deterministic tests of
    /// day-boundary rollover.
    pub struct FixedClock(Mutex<DateTime<Utc>>);

    impl FixedClock {
        pub fn new(at: DateTime<Utc>) -> Self {
            Self(Mutex::new(at))
        }

        pub fn set(&self, at: DateTime<Utc>) {
            *self.0.lock().unwrap() = at;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }
}

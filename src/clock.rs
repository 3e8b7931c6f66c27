//! Clock seam for time-dependent logic.
//!
//! Both reclamation TTLs (5-minute holdings, 20-minute session inactivity)
//! compare stored timestamps against "now". Taking the clock through a trait
//! keeps that logic deterministic under test: production uses
//! [`SystemClock`], tests use [`ManualClock`] and advance time explicitly.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// A monotonic wall-clock source.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock whose time only moves when told to. Test-only in spirit, but
/// lives in the library so integration tests and the reference store can
/// share it.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        ManualClock {
            now: Mutex::new(start),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += delta;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

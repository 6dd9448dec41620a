//! Time sources for the session engine.
//!
//! The engine only ever asks a [`Clock`] for the time, so a session can run
//! against the real monotonic clock or against a [`ManualClock`] that tests
//! and the CLI's simulation mode move forward explicitly.

use chrono::{DateTime, Duration, Utc};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Source of monotonic and wall-clock time
pub trait Clock {
    /// Monotonic milliseconds since an arbitrary origin
    fn now_ms(&self) -> u64;

    /// Current wall-clock time
    fn wall(&self) -> DateTime<Utc>;
}

/// Real time: `Instant` for durations, `Utc::now()` for timestamps
#[derive(Clone, Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock
///
/// Clones share the same time, so a test can keep one handle and give the
/// other to the engine.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
    epoch: DateTime<Utc>,
}

impl ManualClock {
    /// Start at 0 ms, with wall time anchored at `epoch`
    pub fn new(epoch: DateTime<Utc>) -> Self {
        Self {
            now: Rc::new(Cell::new(0)),
            epoch,
        }
    }

    /// Move the clock forward by `ms`
    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }

    /// Jump to an absolute time; never moves backwards
    pub fn set(&self, ms: u64) {
        if ms > self.now.get() {
            self.now.set(ms);
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    fn wall(&self) -> DateTime<Utc> {
        self.epoch + Duration::milliseconds(self.now.get() as i64)
    }
}

//! Clock abstraction for deterministic timestamps.

use chrono::{DateTime, Utc};

/// Abstraction over system time so dispatch and saga timing can be tested.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;

    /// Returns the current time, but never earlier than `floor`.
    ///
    /// Used to keep emission timestamps non-decreasing along a causal chain
    /// even if the wall clock steps backwards.
    fn now_not_before(&self, floor: DateTime<Utc>) -> DateTime<Utc> {
        self.now().max(floor)
    }
}

/// Production clock that delegates to the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

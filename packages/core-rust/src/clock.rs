//! Wall-clock abstraction for timestamping records and backups.
//!
//! Backup raw keys embed a millisecond timestamp, so two writes observing
//! the same wall millisecond would collide on one backup slot and silently
//! shrink the rotation window. [`SystemClock`] therefore monotonizes reads:
//! every call returns a value strictly greater than the last, even when the
//! OS clock stalls within a millisecond or steps backward.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Source of wall-clock milliseconds since the Unix epoch.
///
/// Stores take an `Arc<dyn Clock>` so tests can drive time explicitly with
/// [`ManualClock`] while production uses [`SystemClock`].
pub trait Clock: Send + Sync + 'static {
    /// Current time in milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;
}

/// Monotonized system clock.
///
/// Reads the OS clock but never repeats or decreases: if the wall reading
/// is not past the previous value, the previous value plus one is returned
/// instead.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: Mutex<i64>,
}

impl SystemClock {
    /// Creates a clock with no prior reading.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        let wall = wall_now_millis();
        let mut last = self.last.lock();
        let next = wall.max(*last + 1);
        *last = next;
        next
    }
}

/// Test clock whose reading only changes when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<i64>,
}

impl ManualClock {
    /// Creates a clock frozen at `start` milliseconds.
    #[must_use]
    pub fn new(start: i64) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Moves the clock forward by `millis`.
    pub fn advance(&self, millis: i64) {
        *self.now.lock() += millis;
    }

    /// Jumps the clock to an absolute reading.
    pub fn set(&self, millis: i64) {
        *self.now.lock() = millis;
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        *self.now.lock()
    }
}

/// Raw wall time in milliseconds since the Unix epoch.
#[allow(clippy::cast_possible_truncation)]
fn wall_now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

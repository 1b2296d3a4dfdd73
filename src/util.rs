//! Utility functions and types.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Specifies a timeout for a blocking operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Timeout {
    /// Time out after the specified duration elapses.
    After(Duration),
    /// Block forever.
    Never,
}

impl Timeout {
    /// Reports whether the given elapsed time exceeds the timeout.
    pub fn expired(&self, elapsed: Duration) -> bool {
        match self {
            Timeout::After(d) => elapsed >= *d,
            Timeout::Never => false,
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Timeout {
        Timeout::After(d)
    }
}

impl From<Option<Duration>> for Timeout {
    fn from(v: Option<Duration>) -> Timeout {
        match v {
            None => Timeout::Never,
            Some(d) => Timeout::After(d),
        }
    }
}

/// Converts the given time to the number of milliseconds since the Unix epoch.
pub fn millis_to_epoch(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_millis() as i64
}

/// A source of wall clock time.
///
/// The partitioner cooldown and the auto-commit interval are timer driven;
/// injecting a clock keeps their state machines deterministic under test.
/// See [`crate::mocking::MockClock`] for the test implementation.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

/// The default clock, backed by [`SystemTime`].
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        millis_to_epoch(SystemTime::now())
    }
}

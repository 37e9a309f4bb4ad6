//! Injectable time source.

use chrono::{DateTime, Duration, Utc};

/// Clock abstraction so schedule arithmetic can be tested deterministically.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// System clock implementation (production use).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Mock clock for testing with controlled timestamps.
#[derive(Debug, Clone)]
pub struct MockClock {
    pub current_time: DateTime<Utc>,
}

impl MockClock {
    /// Create a new mock clock at the specified time.
    pub fn new(time: DateTime<Utc>) -> Self {
        Self { current_time: time }
    }

    /// Create a mock clock at a fixed test time (2026-01-15 12:00:00 UTC).
    pub fn fixed() -> Self {
        Self {
            current_time: DateTime::from_timestamp(1_768_478_400, 0).unwrap_or_default(),
        }
    }

    /// Advance the clock by the specified duration.
    pub fn advance(&mut self, duration: Duration) {
        self.current_time += duration;
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        self.current_time
    }
}

impl<T: Clock + ?Sized> Clock for std::sync::Arc<T> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

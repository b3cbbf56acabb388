//! Clock seam: lets timer-dependent tests advance time deterministically
//! instead of racing the wall clock.

use std::time::{Duration, Instant};

/// Source of "now" for the timer wheel and for [`crate::scheduler::Timeout`]
/// resolution. The reactor always runs against [`SystemClock`] in
/// production; tests substitute [`MockClock`] to get reproducible timer
/// firing order without sleeping real wall-clock time.
pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to. Starts at the real `Instant::now()`
/// captured at construction (there is no way to synthesize an arbitrary
/// `Instant` from scratch), then advances purely under test control.
pub struct MockClock {
    now: std::cell::Cell<Instant>,
}

impl MockClock {
    pub fn new() -> Self {
        Self { now: std::cell::Cell::new(Instant::now()) }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_clock_only_moves_when_advanced() {
        let clock = MockClock::new();
        let t0 = clock.now();
        assert_eq!(clock.now(), t0);
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now(), t0 + Duration::from_secs(5));
    }
}

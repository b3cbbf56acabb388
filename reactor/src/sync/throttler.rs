use crate::error::ReactorError;
use crate::queue::FiberQueue;
use crate::scheduler::{self, Timeout};
use std::cell::UnsafeCell;
use std::time::Duration;

struct Inner {
    tokens: f64,
    last_refill: std::time::Instant,
    waiters: FiberQueue,
}

/// A token-bucket rate limiter: `capacity` tokens, refilled continuously
/// at `refill_per_sec`, each `acquire` spending some.
///
/// `&self`-based — see [`Signal`](super::Signal)'s docs for why.
pub struct Throttler {
    capacity: f64,
    refill_per_sec: f64,
    inner: UnsafeCell<Inner>,
}

impl Throttler {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        assert!(refill_per_sec > 0.0, "a throttler needs a positive refill rate");
        Self {
            capacity: capacity as f64,
            refill_per_sec,
            inner: UnsafeCell::new(Inner {
                tokens: capacity as f64,
                last_refill: scheduler::now(),
                waiters: FiberQueue::new(),
            }),
        }
    }

    fn inner(&self) -> &mut Inner {
        unsafe { &mut *self.inner.get() }
    }

    fn refill(&self) {
        let inner = self.inner();
        let now = scheduler::now();
        let elapsed = now.saturating_duration_since(inner.last_refill).as_secs_f64();
        inner.tokens = (inner.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        inner.last_refill = now;
    }

    pub fn acquire(&self, cost: u32) {
        let _ = self.acquire_timeout(cost, Timeout::never());
    }

    pub fn try_acquire(&self, cost: u32) -> bool {
        if cost as f64 > self.capacity {
            return false;
        }
        self.refill();
        let cost = cost as f64;
        let inner = self.inner();
        if inner.tokens >= cost {
            inner.tokens -= cost;
            inner.waiters.resume_one(false);
            true
        } else {
            false
        }
    }

    /// Withdraws `cost` tokens, suspending until enough have refilled or
    /// `timeout` elapses. Refuses outright — without ever suspending — if
    /// `cost` exceeds the bucket's burst size, since no amount of waiting
    /// would ever satisfy it.
    pub fn acquire_timeout(&self, cost: u32, timeout: Timeout) -> Result<(), ReactorError> {
        if cost as f64 > self.capacity {
            return Err(ReactorError::ExceedsCapacity(crate::error::RequestExceedsCapacity));
        }
        let cost = cost as f64;
        loop {
            self.refill();
            let inner = self.inner();
            if inner.tokens >= cost {
                inner.tokens -= cost;
                inner.waiters.resume_one(false);
                return Ok(());
            }
            if timeout.is_elapsed() {
                return Err(ReactorError::Timeout(crate::error::TimeoutExpired));
            }
            let deficit = cost - inner.tokens;
            let wait = Duration::from_secs_f64(deficit / self.refill_per_sec);
            let wake_at = scheduler::now() + wait;
            let inner_timeout = match timeout.deadline() {
                Some(d) if d < wake_at => timeout,
                _ => Timeout::at(wake_at),
            };
            let waiters: *mut FiberQueue = &mut inner.waiters;
            // Safety: see `Semaphore::acquire_timeout`. Ignore the outcome
            // here: the top of the loop re-checks both the real timeout
            // and the token count regardless of why we woke, so a timed-out
            // *internal* refill wait just loops.
            let _ = unsafe { (*waiters).suspend(inner_timeout) };
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }
}

/// A token bucket that never outright refuses a withdrawal: `acquire`
/// proceeds as long as the current balance hasn't already gone negative,
/// then lets a withdrawal push it below zero. The next withdrawal blocks
/// (or times out) until refill brings the balance back to `0` or above.
///
/// `&self`-based — see [`Signal`](super::Signal)'s docs for why.
pub struct ThrottlerOverdraft {
    capacity: f64,
    refill_per_sec: f64,
    inner: UnsafeCell<Inner>,
}

impl ThrottlerOverdraft {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        assert!(refill_per_sec > 0.0, "a throttler needs a positive refill rate");
        Self {
            capacity: capacity as f64,
            refill_per_sec,
            inner: UnsafeCell::new(Inner {
                tokens: capacity as f64,
                last_refill: scheduler::now(),
                waiters: FiberQueue::new(),
            }),
        }
    }

    fn inner(&self) -> &mut Inner {
        unsafe { &mut *self.inner.get() }
    }

    fn refill(&self) {
        let inner = self.inner();
        let now = scheduler::now();
        let elapsed = now.saturating_duration_since(inner.last_refill).as_secs_f64();
        inner.tokens = (inner.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        inner.last_refill = now;
    }

    pub fn acquire(&self, cost: u32) {
        let _ = self.acquire_timeout(cost, Timeout::never());
    }

    pub fn try_acquire(&self, cost: u32) -> bool {
        self.refill();
        let inner = self.inner();
        if inner.tokens >= 0.0 {
            inner.tokens -= cost as f64;
            inner.waiters.resume_one(false);
            true
        } else {
            false
        }
    }

    pub fn acquire_timeout(&self, cost: u32, timeout: Timeout) -> Result<(), ReactorError> {
        let cost = cost as f64;
        loop {
            self.refill();
            let inner = self.inner();
            if inner.tokens >= 0.0 {
                inner.tokens -= cost;
                inner.waiters.resume_one(false);
                return Ok(());
            }
            if timeout.is_elapsed() {
                return Err(ReactorError::Timeout(crate::error::TimeoutExpired));
            }
            let deficit = -inner.tokens;
            let wait = Duration::from_secs_f64(deficit / self.refill_per_sec);
            let wake_at = scheduler::now() + wait;
            let inner_timeout = match timeout.deadline() {
                Some(d) if d < wake_at => timeout,
                _ => Timeout::at(wake_at),
            };
            let waiters: *mut FiberQueue = &mut inner.waiters;
            // Safety: see `Semaphore::acquire_timeout`.
            let _ = unsafe { (*waiters).suspend(inner_timeout) };
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Reactor, ReactorConfig};

    #[test]
    fn try_acquire_drains_the_initial_burst_then_refuses() {
        let exit_code = Reactor::new(ReactorConfig::new()).run(|| {
            let throttler = Throttler::new(10, 1.0);
            assert!(throttler.try_acquire(6));
            assert!(throttler.try_acquire(4));
            assert!(!throttler.try_acquire(1)); // burst spent, refill hasn't had time to run
            crate::stop(0);
        });
        assert_eq!(exit_code, 0);
    }

    #[test]
    fn try_acquire_rejects_a_cost_above_capacity() {
        let exit_code = Reactor::new(ReactorConfig::new()).run(|| {
            let throttler = Throttler::new(5, 1.0);
            assert!(!throttler.try_acquire(6));
            assert_eq!(throttler.capacity(), 5);
            crate::stop(0);
        });
        assert_eq!(exit_code, 0);
    }

    #[test]
    fn acquire_timeout_refuses_an_oversized_request_without_waiting() {
        let exit_code = Reactor::new(ReactorConfig::new()).run(|| {
            let throttler = Throttler::new(5, 1.0);
            let err = throttler.acquire_timeout(6, Timeout::never()).unwrap_err();
            assert!(matches!(err, ReactorError::ExceedsCapacity(_)));
            crate::stop(0);
        });
        assert_eq!(exit_code, 0);
    }

    #[test]
    fn overdraft_permits_a_cost_above_capacity_once() {
        let exit_code = Reactor::new(ReactorConfig::new()).run(|| {
            let throttler = ThrottlerOverdraft::new(5, 1.0);
            assert!(throttler.try_acquire(20)); // balance was >= 0, so it's allowed through
            assert!(!throttler.try_acquire(1)); // balance is now negative, refused until refill
            crate::stop(0);
        });
        assert_eq!(exit_code, 0);
    }
}

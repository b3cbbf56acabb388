use crate::error::ReactorError;
use crate::queue::FiberQueue;
use crate::scheduler::Timeout;
use std::cell::UnsafeCell;

/// Level-triggered wakeup: once `set`, every future `wait` returns
/// immediately until `clear` is called.
///
/// Backed by a volatile fiber queue: unlike the primitives below, an
/// `Event`'s queue carries no exactly-once-wakeup obligation (the level
/// itself is the state, not the act of waking someone), so there is
/// nothing lost if a waiter is torn out of it by an injected exception
/// mid-wait.
///
/// `&self`-based, like every primitive in this module — see
/// [`Signal`](super::Signal)'s docs for why sharing one of these behind
/// `UnsafeCell` instead of `RefCell` is the right call here.
pub struct Event {
    waiters: UnsafeCell<FiberQueue>,
    is_set: UnsafeCell<bool>,
}

impl Event {
    pub fn new() -> Self {
        Self { waiters: UnsafeCell::new(FiberQueue::volatile()), is_set: UnsafeCell::new(false) }
    }

    pub fn wait(&self) {
        let _ = self.wait_timeout(Timeout::never());
    }

    pub fn wait_timeout(&self, timeout: Timeout) -> Result<(), ReactorError> {
        // Safety: read before any suspend, not held across one.
        if unsafe { *self.is_set.get() } {
            return Ok(());
        }
        unsafe { (*self.waiters.get()).suspend(timeout) }
    }

    pub fn set(&self) {
        unsafe {
            *self.is_set.get() = true;
            (*self.waiters.get()).resume_all();
        }
    }

    pub fn clear(&self) {
        unsafe { *self.is_set.get() = false };
    }

    pub fn is_set(&self) -> bool {
        unsafe { *self.is_set.get() }
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_latches_until_cleared() {
        let event = Event::new();
        assert!(!event.is_set());
        event.set();
        assert!(event.is_set());
        event.set(); // idempotent
        assert!(event.is_set());
        event.clear();
        assert!(!event.is_set());
    }

    #[test]
    fn wait_returns_immediately_once_set() {
        let event = Event::new();
        event.set();
        event.wait(); // would hang forever if this blocked outside a reactor
    }
}

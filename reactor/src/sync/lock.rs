use crate::error::ReactorError;
use crate::fiber::FiberHandle;
use crate::queue::FiberQueue;
use crate::scheduler::{self, Timeout};
use std::cell::UnsafeCell;

struct Inner {
    locked: bool,
    owner: Option<FiberHandle>,
    waiters: FiberQueue,
}

/// A simple mutual-exclusion lock.
///
/// Unlike `std::sync::Mutex` there is no guard tying the lock's lifetime
/// to the protected data's borrow — fibers, not stack frames, own the
/// lock, so `unlock` is a separate call the holder is responsible for
/// making (typically from a `defer`-style block around the critical
/// section).
///
/// Tracks its holder: `unlock` asserts it's being called by the fiber
/// that last acquired the lock, and a fiber that tries to re-acquire a
/// lock it already holds hits a fatal assertion rather than hanging
/// forever waiting on itself.
///
/// `&self`-based — see [`Signal`](super::Signal)'s docs for why.
pub struct Lock {
    inner: UnsafeCell<Inner>,
}

impl Lock {
    pub fn new() -> Self {
        Self {
            inner: UnsafeCell::new(Inner { locked: false, owner: None, waiters: FiberQueue::new() }),
        }
    }

    fn inner(&self) -> &mut Inner {
        unsafe { &mut *self.inner.get() }
    }

    pub fn lock(&self) {
        let _ = self.lock_timeout(Timeout::never());
    }

    pub fn lock_timeout(&self, timeout: Timeout) -> Result<(), ReactorError> {
        loop {
            let current = scheduler::current_fiber_handle_opt();
            let inner = self.inner();
            if !inner.locked {
                inner.locked = true;
                inner.owner = current;
                return Ok(());
            }
            assert!(
                current.is_none() || current != inner.owner,
                "fiber re-entered a lock it already holds"
            );
            let waiters: *mut FiberQueue = &mut inner.waiters;
            // Safety: see `Semaphore::acquire_timeout`.
            unsafe { (*waiters).suspend(timeout) }?;
        }
    }

    pub fn try_lock(&self) -> bool {
        let current = scheduler::current_fiber_handle_opt();
        let inner = self.inner();
        if inner.locked {
            false
        } else {
            inner.locked = true;
            inner.owner = current;
            true
        }
    }

    pub fn unlock(&self) {
        let current = scheduler::current_fiber_handle_opt();
        let inner = self.inner();
        debug_assert!(inner.locked, "unlock called on a lock that isn't held");
        assert!(
            current.is_none() || inner.owner.is_none() || current == inner.owner,
            "lock released by a fiber other than its owner"
        );
        inner.locked = false;
        inner.owner = None;
        inner.waiters.resume_one(false);
    }

    pub fn is_locked(&self) -> bool {
        self.inner().locked
    }

    /// The fiber currently holding the lock, if any and if called from
    /// inside a reactor.
    pub fn owner(&self) -> Option<FiberHandle> {
        self.inner().owner
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_lock_respects_mutual_exclusion() {
        let lock = Lock::new();
        assert!(lock.try_lock());
        assert!(!lock.try_lock());
        lock.unlock();
        assert!(lock.try_lock());
    }

    #[test]
    fn is_locked_reflects_current_state() {
        let lock = Lock::new();
        assert!(!lock.is_locked());
        lock.lock();
        assert!(lock.is_locked());
        lock.unlock();
        assert!(!lock.is_locked());
    }

    #[test]
    fn owner_tracks_the_acquiring_fiber() {
        use crate::{Reactor, ReactorConfig};

        let exit_code = Reactor::new(ReactorConfig::new()).run(|| {
            let lock = Lock::new();
            lock.lock();
            assert_eq!(lock.owner(), Some(crate::scheduler::current_fiber_handle()));
            lock.unlock();
            assert_eq!(lock.owner(), None);
            crate::stop(0);
        });
        assert_eq!(exit_code, 0);
    }

    #[test]
    #[should_panic(expected = "fiber re-entered a lock it already holds")]
    fn reacquiring_a_held_lock_is_a_fatal_assertion() {
        use crate::{Reactor, ReactorConfig};

        Reactor::new(ReactorConfig::new()).run(|| {
            let lock = Lock::new();
            lock.lock();
            lock.lock(); // same fiber, already the owner: must not silently deadlock
        });
    }

    #[test]
    #[should_panic(expected = "lock released by a fiber other than its owner")]
    fn unlock_by_a_non_owner_is_a_fatal_assertion() {
        use crate::{Reactor, ReactorConfig};

        Reactor::new(ReactorConfig::new()).run(|| {
            let lock = std::rc::Rc::new(Lock::new());
            lock.lock();
            let other = lock.clone();
            crate::scheduler::spawn_fiber(move || {
                other.unlock();
            });
            crate::scheduler::yield_now();
        });
    }
}

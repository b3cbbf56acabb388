use crate::error::ReactorError;
use crate::queue::FiberQueue;
use crate::scheduler::Timeout;
use std::cell::UnsafeCell;

struct Inner {
    capacity: i64,
    available: i64,
    deficit: i64,
    /// Fibers currently somewhere in `acquire_timeout` — queued behind
    /// others, or the primary waiter actively rechecking `available`.
    /// `try_acquire` refuses outright whenever this is nonzero: queue
    /// order is only meaningful to waiters that actually suspended.
    requests_pending: u32,
    /// Set whenever a wakeup has been dispatched to the front of `waiters`
    /// but that fiber hasn't yet run and checked in. Throttles `release`
    /// to at most one outstanding wakeup at a time — without this, two
    /// `release` calls in a row before the first wakeup is processed
    /// would each pop a different waiter, promoting the second one to
    /// primary out of turn.
    resume_pending: bool,
    waiters: FiberQueue,
}

/// A counting semaphore, acquired and released `n` permits at a time.
///
/// Strictly FIFO: `acquire` joins the back of the line if anyone is
/// already ahead, then — once first in line — becomes the sole "primary"
/// waiter, repeatedly rechecking `available` and re-suspending at the
/// *front* of the queue (never losing its place to a fiber that joins
/// later) until its request fits. On success it deducts its share and,
/// if permits remain and someone is still queued, wakes the next in line
/// to become primary in its turn. This sacrifices the "a smaller request
/// behind a still-unsatisfied larger one could proceed first" cascade for
/// strict ordering: a later, smaller request never jumps the queue.
///
/// `set_capacity` can grow or shrink the permit count live. Growing wakes
/// the primary waiter so it can recheck against the new capacity.
/// Shrinking has two modes: `immediate = true` reaches directly into
/// `available`, which can go negative when more permits are outstanding
/// than the new capacity allows — subsequent `release`s merely bring it
/// back up to zero before any are actually handed out again.
/// `immediate = false` instead leaves `available` alone and records the
/// reduction as a deficit that future `release` calls absorb first, so a
/// caller reading `available` never sees a number that implies more
/// permits are "missing" than are actually held.
///
/// `&self`-based — see [`Signal`](super::Signal)'s docs for why.
pub struct Semaphore {
    inner: UnsafeCell<Inner>,
}

impl Semaphore {
    pub fn new(capacity: u32) -> Self {
        let capacity = capacity as i64;
        Self {
            inner: UnsafeCell::new(Inner {
                capacity,
                available: capacity,
                deficit: 0,
                requests_pending: 0,
                resume_pending: false,
                waiters: FiberQueue::new(),
            }),
        }
    }

    fn inner(&self) -> &mut Inner {
        unsafe { &mut *self.inner.get() }
    }

    pub fn capacity(&self) -> u32 {
        self.inner().capacity.max(0) as u32
    }

    pub fn available(&self) -> u32 {
        self.inner().available.max(0) as u32
    }

    /// Wakes the front of the line, unless a wakeup is already in flight.
    fn wake_next(inner: &mut Inner) {
        if !inner.resume_pending && !inner.waiters.is_empty() {
            inner.resume_pending = true;
            inner.waiters.resume_one(false);
        }
    }

    pub fn acquire(&self, n: u32) {
        let _ = self.acquire_timeout(n, Timeout::never());
    }

    pub fn acquire_timeout(&self, n: u32, timeout: Timeout) -> Result<(), ReactorError> {
        let n = i64::from(n);
        let inner = self.inner();
        let ahead = inner.requests_pending > 0;
        inner.requests_pending += 1;

        // Strictly FIFO: join the back of the line and wait our turn
        // before even looking at `available`, if anyone got here first.
        if ahead {
            let waiters: *mut FiberQueue = &mut self.inner().waiters;
            // Safety: see the note on the loop below.
            if let Err(e) = unsafe { (*waiters).suspend(timeout) } {
                self.inner().requests_pending -= 1;
                return Err(e);
            }
        }

        // Now the primary waiter: keep re-checking, re-suspending at the
        // *front* of the queue (not the back) so a fiber that joins while
        // we're waiting can't leapfrog us.
        loop {
            let inner = self.inner();
            inner.resume_pending = false;
            if inner.available >= n {
                inner.available -= n;
                inner.requests_pending -= 1;
                if inner.requests_pending > 0 && inner.available > 0 {
                    Self::wake_next(inner);
                }
                return Ok(());
            }
            let waiters: *mut FiberQueue = &mut inner.waiters;
            // Safety: no reference derived from `self.inner` is alive
            // past this point; `suspend_front` may switch to another
            // fiber that reaches back into this same `Semaphore`.
            if let Err(e) = unsafe { (*waiters).suspend_front(timeout) } {
                self.inner().requests_pending -= 1;
                return Err(e);
            }
        }
    }

    /// Succeeds only when nobody is already queued and enough permits are
    /// free — matching `acquire`'s strict FIFO ordering by refusing to
    /// let a `try_acquire` cut ahead of a waiter that's already in line.
    pub fn try_acquire(&self, n: u32) -> bool {
        let n = i64::from(n);
        let inner = self.inner();
        if inner.requests_pending == 0 && inner.available >= n {
            inner.available -= n;
            true
        } else {
            false
        }
    }

    pub fn release(&self, n: u32) {
        let mut n = i64::from(n);
        let inner = self.inner();
        if inner.deficit > 0 {
            let absorbed = inner.deficit.min(n);
            inner.deficit -= absorbed;
            n -= absorbed;
        }
        if n > 0 {
            inner.available += n;
        }
        Self::wake_next(inner);
    }

    pub fn set_capacity(&self, new_capacity: u32, immediate: bool) {
        let new_capacity = new_capacity as i64;
        let inner = self.inner();
        let delta = new_capacity - inner.capacity;
        inner.capacity = new_capacity;
        if delta > 0 {
            inner.available += delta;
            Self::wake_next(inner);
        } else if delta < 0 {
            if immediate {
                inner.available += delta;
            } else {
                inner.deficit += -delta;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_acquire_respects_available_count() {
        let sem = Semaphore::new(1);
        assert!(sem.try_acquire(1));
        assert!(!sem.try_acquire(1));
        sem.release(1);
        assert!(sem.try_acquire(1));
    }

    #[test]
    fn weighted_acquire_and_release() {
        let sem = Semaphore::new(3);
        assert!(sem.try_acquire(2));
        assert!(!sem.try_acquire(2)); // only 1 left
        sem.release(2);
        assert!(sem.try_acquire(2));
    }

    #[test]
    fn immediate_shrink_can_go_negative_then_self_corrects() {
        let sem = Semaphore::new(2);
        assert!(sem.try_acquire(1));
        assert!(sem.try_acquire(1));
        sem.set_capacity(0, true);
        assert_eq!(sem.available(), 0); // really -2, clamped for display
        sem.release(1);
        sem.release(1);
        assert!(!sem.try_acquire(1)); // available is back to 0, not yet positive
        sem.release(1);
        assert!(sem.try_acquire(1));
    }

    #[test]
    fn lazy_shrink_absorbs_future_releases() {
        let sem = Semaphore::new(2);
        assert!(sem.try_acquire(1));
        assert!(sem.try_acquire(1));
        sem.set_capacity(0, false);
        assert_eq!(sem.available(), 0);
        sem.release(1);
        assert_eq!(sem.available(), 0);
        sem.release(1);
        assert_eq!(sem.available(), 0);
    }

    #[test]
    fn try_acquire_refuses_while_anyone_is_queued() {
        use crate::{Reactor, ReactorConfig};
        use std::cell::RefCell;
        use std::rc::Rc;

        let exit_code = Reactor::new(ReactorConfig::new()).run(|| {
            let sem = Rc::new(Semaphore::new(1));
            assert!(sem.try_acquire(1));

            let woke = Rc::new(RefCell::new(false));
            let sem2 = Rc::clone(&sem);
            let woke2 = Rc::clone(&woke);
            crate::scheduler::spawn_fiber(move || {
                sem2.acquire(1); // queues, since the 1 permit is already held
                *woke2.borrow_mut() = true;
            });
            crate::scheduler::yield_now();

            // A second fiber is already in line: try_acquire must not cut
            // ahead of it even though no permits would need to be shared.
            assert!(!sem.try_acquire(1));
            crate::stop(0);
        });
        assert_eq!(exit_code, 0);
    }

    #[test]
    fn a_later_smaller_request_does_not_jump_an_earlier_larger_one() {
        use crate::{Reactor, ReactorConfig};
        use std::cell::RefCell;
        use std::rc::Rc;

        let exit_code = Reactor::new(ReactorConfig::new()).run(|| {
            let sem = Rc::new(Semaphore::new(3));
            assert!(sem.try_acquire(3)); // drain it, so both acquires below queue

            let order = Rc::new(RefCell::new(Vec::new()));

            let sem_a = Rc::clone(&sem);
            let order_a = Rc::clone(&order);
            crate::scheduler::spawn_fiber(move || {
                sem_a.acquire(3); // needs the whole bucket
                order_a.borrow_mut().push('A');
            });
            crate::scheduler::yield_now(); // let A reach the front of the line

            let sem_b = Rc::clone(&sem);
            let order_b = Rc::clone(&order);
            crate::scheduler::spawn_fiber(move || {
                sem_b.acquire(1); // would fit on its own, but A is ahead
                order_b.borrow_mut().push('B');
            });
            crate::scheduler::yield_now();

            // Only 1 permit back: not enough for A, and plenty for B — but
            // strict FIFO means B must still wait for A.
            sem.release(1);
            crate::scheduler::yield_now();
            assert!(order.borrow().is_empty(), "B must not jump A's place in line");

            sem.release(2); // now A's request of 3 is satisfiable
            crate::scheduler::yield_now();
            crate::scheduler::yield_now();
            assert_eq!(*order.borrow(), vec!['A', 'B']);

            crate::stop(0);
        });
        assert_eq!(exit_code, 0);
    }
}

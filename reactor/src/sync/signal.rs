use crate::error::ReactorError;
use crate::queue::FiberQueue;
use crate::scheduler::{Scheduler, Timeout};
use std::cell::UnsafeCell;

/// Edge-triggered wakeup: `wait` always sleeps, `signal` resumes every
/// fiber currently waiting. A `signal` with nobody waiting is simply
/// lost — there is no latched "already signalled" state to observe,
/// unlike [`Event`](super::Event). Used internally to implement fiber
/// join.
///
/// Takes `&self`, not `&mut self`: the waiter queue lives behind an
/// [`UnsafeCell`] so a `Signal` can be shared (typically via `Rc`)
/// across the fibers that wait on and signal it, without forcing callers
/// through a `RefCell` whose borrow would have to span a suspend point.
/// Sound here specifically because the reactor is single-threaded —
/// never two instruction streams touching the cell at once, only
/// sequential handoffs — the same reasoning behind
/// [`scheduler::with`](crate::scheduler::with)'s raw thread-local
/// pointer.
pub struct Signal {
    waiters: UnsafeCell<FiberQueue>,
}

impl Signal {
    pub fn new() -> Self {
        Self { waiters: UnsafeCell::new(FiberQueue::new()) }
    }

    fn waiters_ptr(&self) -> *mut FiberQueue {
        self.waiters.get()
    }

    pub fn wait(&self) {
        // Safety: see type docs; no other access to `waiters` is alive
        // across this call.
        let _ = unsafe { (*self.waiters_ptr()).suspend(Timeout::never()) };
    }

    pub fn wait_timeout(&self, timeout: Timeout) -> Result<(), ReactorError> {
        unsafe { (*self.waiters_ptr()).suspend(timeout) }
    }

    pub fn signal(&self) {
        unsafe { (*self.waiters_ptr()).resume_all() };
    }

    pub(crate) fn resume_all_with(&self, s: &mut Scheduler) {
        unsafe { (*self.waiters_ptr()).resume_all_with(s) };
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Reactor, ReactorConfig};
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn wait_wakes_on_signal_and_carries_no_latch() {
        let woke = Rc::new(Cell::new(false));
        let woke_for_main = Rc::clone(&woke);

        let exit_code = Reactor::new(ReactorConfig::new()).run(move || {
            let signal = Rc::new(Signal::new());
            let waiter_signal = Rc::clone(&signal);
            let woke = Rc::clone(&woke);
            crate::spawn_fiber(move || {
                waiter_signal.wait();
                woke.set(true);
                crate::stop(0);
            });
            crate::spawn_fiber(move || {
                signal.signal();
            });
        });

        assert_eq!(exit_code, 0);
        assert!(woke_for_main.get());
    }
}

//! Cross-fiber synchronization primitives, all built on [`FiberQueue`](crate::queue::FiberQueue).
//!
//! None of these types are `Send`/`Sync` and none need to be: every fiber
//! runs on the same OS thread, so "synchronization" here means ordering
//! suspensions and wakeups correctly, not protecting against concurrent
//! access from multiple cores.

mod barrier;
mod bounded_queue;
mod event;
mod lock;
mod rwlock;
mod semaphore;
mod signal;
mod throttler;

pub use barrier::Barrier;
pub use bounded_queue::BoundedQueue;
pub use event::Event;
pub use lock::Lock;
pub use rwlock::RwLock;
pub use semaphore::Semaphore;
pub use signal::Signal;
pub use throttler::{Throttler, ThrottlerOverdraft};

use crate::scheduler::Scheduler;

/// Wakes every fiber parked on a just-finished fiber's join signal.
///
/// Takes the scheduler directly rather than going through
/// [`scheduler::with`](crate::scheduler::with) because it runs from
/// inside the trampoline's own `with` call, and `with` is not
/// reentrant-safe to call twice without good reason.
pub(crate) fn signal_join(s: &mut Scheduler, slot_index: usize) {
    let mut waiters = std::mem::replace(&mut s.table.slot_mut(slot_index).join, Signal::new());
    waiters.resume_all_with(s);
    s.table.slot_mut(slot_index).join = waiters;
}

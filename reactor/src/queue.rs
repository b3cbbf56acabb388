//! The fiber queue: a FIFO of suspended fibers, used by every
//! synchronization primitive and by the scheduler's own ready queue.
//!
//! Implemented as an intrusive doubly-linked list over slot indices (the
//! "arena + index" strategy from the design notes): no allocation, O(1)
//! push/pop/remove-from-middle, at the cost of every fiber belonging to at
//! most one such queue at a time.

use crate::fiber::Table;
use crate::scheduler::{self, Scheduler, Timeout};
use crate::error::ReactorError;
use crate::fiber::FiberHandle;

/// A FIFO of parked fibers.
///
/// `Volatile` queues (used e.g. by [`Event`](crate::sync::Event)) may be
/// dropped out from under a waiter that is being unwound by an injected
/// exception; such a queue does not guarantee "exactly one wakeup per
/// resume" during unwinding, in exchange for allowing its storage to
/// vanish mid-wait. Non-`Volatile` queues (semaphores, locks, ...)
/// guarantee that property always holds, by passing the wakeup baton to a
/// successor when an already-scheduled waiter is unwound instead.
pub struct FiberQueue {
    head: Option<usize>,
    tail: Option<usize>,
    volatile: bool,
}

impl FiberQueue {
    pub fn new() -> Self {
        Self { head: None, tail: None, volatile: false }
    }

    pub fn volatile() -> Self {
        Self { head: None, tail: None, volatile: true }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn push_back(&mut self, table: &mut Table, index: usize) {
        debug_assert!(table.slot(index).owner.is_none(), "fiber already owned by a queue");
        table.slot_mut(index).owner = Some(self as *mut FiberQueue);
        table.slot_mut(index).next = None;
        table.slot_mut(index).prev = self.tail;
        if let Some(tail) = self.tail {
            table.slot_mut(tail).next = Some(index);
        } else {
            self.head = Some(index);
        }
        self.tail = Some(index);
    }

    pub(crate) fn push_front(&mut self, table: &mut Table, index: usize) {
        debug_assert!(table.slot(index).owner.is_none(), "fiber already owned by a queue");
        table.slot_mut(index).owner = Some(self as *mut FiberQueue);
        table.slot_mut(index).prev = None;
        table.slot_mut(index).next = self.head;
        if let Some(head) = self.head {
            table.slot_mut(head).prev = Some(index);
        } else {
            self.tail = Some(index);
        }
        self.head = Some(index);
    }

    pub(crate) fn pop_front(&mut self, table: &mut Table) -> Option<usize> {
        let index = self.head?;
        self.remove(table, index);
        Some(index)
    }

    /// Removes `index` from wherever it sits in the list. O(1): this is
    /// the whole point of a doubly-linked intrusive list.
    pub(crate) fn remove(&mut self, table: &mut Table, index: usize) {
        let (prev, next) = {
            let slot = table.slot(index);
            (slot.prev, slot.next)
        };
        match prev {
            Some(p) => table.slot_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => table.slot_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let slot = table.slot_mut(index);
        slot.prev = None;
        slot.next = None;
        slot.owner = None;
    }

    /// Parks the current fiber on this queue until woken or timed out.
    ///
    /// Mirrors the fiber-queue `suspend` contract: mark the slot
    /// `SLEEPING`, enqueue it, optionally arm a one-shot timer that
    /// records a timeout and resumes, then `suspend_current_fiber`. If
    /// the wakeup turns out to be a spurious exception-injection wakeup,
    /// this queue's volatility determines whether it is still safe to
    /// touch `self` afterwards; see the type docs.
    pub fn suspend(&mut self, timeout: Timeout) -> Result<(), ReactorError> {
        self.suspend_inner(timeout, false)
    }

    /// Like [`suspend`](Self::suspend), but parks at the *front* of the
    /// queue instead of the back. Used by a waiter that already holds its
    /// place in line (e.g. a semaphore's primary waiter, re-suspending
    /// because resources still aren't enough) and must not lose it to a
    /// fiber that only just joined the queue.
    pub fn suspend_front(&mut self, timeout: Timeout) -> Result<(), ReactorError> {
        self.suspend_inner(timeout, true)
    }

    fn suspend_inner(&mut self, timeout: Timeout, front: bool) -> Result<(), ReactorError> {
        if timeout.is_elapsed() {
            return Err(ReactorError::Timeout(crate::error::TimeoutExpired));
        }

        let current = scheduler::with(|s| {
            let current = s.current_slot();
            s.table.slot_mut(current).flags.insert(crate::fiber::FiberFlags::SLEEPING);
            if front {
                self.push_front(&mut s.table, current);
            } else {
                self.push_back(&mut s.table, current);
            }
            current
        });

        let timer = if let Some(deadline) = timeout.deadline() {
            let handle = scheduler::with(|s| s.current_handle());
            Some(scheduler::with(|s| {
                s.timers.register_at(deadline, move || {
                    scheduler::with(|s| s.resume_timed_out(handle));
                })
            }))
        } else {
            None
        };

        let timed_out = Scheduler::suspend_current_fiber();

        if let Some(t) = timer {
            scheduler::with(|s| s.timers.cancel(t));
        }

        // Non-volatile queues guarantee at-most-one-wakeup-per-resume even
        // when this fiber is being unwound by an injected exception rather
        // than a normal wakeup: if it is still linked into *some* queue
        // (meaning nobody dequeued it), remove it and pass the baton on.
        if !self.volatile {
            scheduler::with(|s| {
                if s.table.slot(current).owner.is_some() {
                    self.remove(&mut s.table, current);
                }
            });
        }

        if timed_out {
            Err(ReactorError::Timeout(crate::error::TimeoutExpired))
        } else {
            Ok(())
        }
    }

    /// Pops the head and resumes it. A no-op on an empty queue that
    /// doesn't even touch the running reactor, so primitives can release
    /// with nobody waiting from contexts with no reactor at all (plain
    /// unit tests included).
    pub fn resume_one(&mut self, immediate: bool) -> Option<FiberHandle> {
        if self.is_empty() {
            return None;
        }
        scheduler::with(|s| self.resume_one_with(s, immediate))
    }

    pub fn resume_all(&mut self) {
        if self.is_empty() {
            return;
        }
        scheduler::with(|s| while self.resume_one_with(s, false).is_some() {})
    }

    /// Same as [`resume_one`](Self::resume_one), for callers that already
    /// hold the scheduler borrow (e.g. a timer or another queue's own
    /// wakeup path) and would otherwise re-enter [`scheduler::with`].
    pub(crate) fn resume_one_with(&mut self, s: &mut Scheduler, immediate: bool) -> Option<FiberHandle> {
        let index = self.pop_front(&mut s.table)?;
        s.table.slot_mut(index).flags.remove(crate::fiber::FiberFlags::SLEEPING);
        let handle = s.table.handle_for(index);
        s.resume_fiber(handle, immediate);
        Some(handle)
    }

    pub(crate) fn resume_all_with(&mut self, s: &mut Scheduler) {
        while self.resume_one_with(s, false).is_some() {}
    }
}

impl Default for FiberQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Forcibly unlinks `index` from whatever queue currently owns it, if any.
///
/// Rescheduling a slot (onto the ready queue or anywhere else) while it's
/// still linked into a primitive's wait queue corrupts both: the owning
/// queue's `head`/`tail` and the slot's neighbors would keep referencing a
/// slot that's no longer there. Used wherever a fiber is resumed from
/// outside the queue's own wakeup path — timeouts and injected
/// exceptions — since those bypass the queue's `pop_front`.
pub(crate) fn force_unlink(table: &mut Table, index: usize) {
    if let Some(ptr) = table.slot(index).owner {
        // Safety: `ptr` was stashed by `push_back`/`push_front` when this
        // slot was linked into `*ptr`, and is cleared as soon as the slot
        // leaves that queue by any means (including this one). The queues
        // this can point to (embedded in a sync primitive, or the
        // scheduler's own ready queue) are never relocated while a fiber
        // is parked on them.
        unsafe { (*ptr).remove(table, index) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber::Table;

    #[test]
    fn fifo_order_and_remove_from_middle() {
        let mut table = Table::new(8);
        let a = table.spawn(Box::new(|| {}));
        let b = table.spawn(Box::new(|| {}));
        let c = table.spawn(Box::new(|| {}));

        let mut q = FiberQueue::new();
        q.push_back(&mut table, a);
        q.push_back(&mut table, b);
        q.push_back(&mut table, c);

        // remove from the middle
        q.remove(&mut table, b);

        assert_eq!(q.pop_front(&mut table), Some(a));
        assert_eq!(q.pop_front(&mut table), Some(c));
        assert_eq!(q.pop_front(&mut table), None);
    }
}

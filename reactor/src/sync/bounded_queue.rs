use crate::error::ReactorError;
use crate::queue::FiberQueue;
use crate::scheduler::Timeout;
use std::cell::UnsafeCell;
use std::collections::VecDeque;

struct Inner<T> {
    items: VecDeque<T>,
    not_full: FiberQueue,
    not_empty: FiberQueue,
}

/// A bounded FIFO channel between fibers: `push` blocks while full,
/// `pop` blocks while empty.
///
/// `&self`-based — see [`Signal`](super::Signal)'s docs for why.
pub struct BoundedQueue<T> {
    capacity: usize,
    inner: UnsafeCell<Inner<T>>,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "a bounded queue needs positive capacity");
        Self {
            capacity,
            inner: UnsafeCell::new(Inner {
                items: VecDeque::with_capacity(capacity),
                not_full: FiberQueue::new(),
                not_empty: FiberQueue::new(),
            }),
        }
    }

    fn inner(&self) -> &mut Inner<T> {
        unsafe { &mut *self.inner.get() }
    }

    pub fn push(&self, value: T) {
        let _ = self.push_timeout(value, Timeout::never());
    }

    /// On timeout, the value is handed back so the caller doesn't lose it.
    pub fn push_timeout(&self, value: T, timeout: Timeout) -> Result<(), (T, ReactorError)> {
        loop {
            let inner = self.inner();
            if inner.items.len() < self.capacity {
                inner.items.push_back(value);
                inner.not_empty.resume_one(false);
                return Ok(());
            }
            let waiters: *mut FiberQueue = &mut inner.not_full;
            // Safety: see `Semaphore::acquire_timeout`.
            match unsafe { (*waiters).suspend(timeout) } {
                Ok(()) => {} // retry with the same value
                Err(e) => return Err((value, e)),
            }
        }
    }

    pub fn pop(&self) -> T {
        self.pop_timeout(Timeout::never())
            .unwrap_or_else(|_| unreachable!("a Timeout::never() wait cannot time out"))
    }

    pub fn pop_timeout(&self, timeout: Timeout) -> Result<T, ReactorError> {
        loop {
            let inner = self.inner();
            if let Some(value) = inner.items.pop_front() {
                inner.not_full.resume_one(false);
                return Ok(value);
            }
            let waiters: *mut FiberQueue = &mut inner.not_empty;
            // Safety: see `Semaphore::acquire_timeout`.
            unsafe { (*waiters).suspend(timeout) }?;
        }
    }

    pub fn try_push(&self, value: T) -> Result<(), T> {
        let inner = self.inner();
        if inner.items.len() < self.capacity {
            inner.items.push_back(value);
            inner.not_empty.resume_one(false);
            Ok(())
        } else {
            Err(value)
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        let inner = self.inner();
        let value = inner.items.pop_front();
        if value.is_some() {
            inner.not_full.resume_one(false);
        }
        value
    }

    pub fn len(&self) -> usize {
        self.inner().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner().items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.inner().items.len() >= self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Reactor, ReactorConfig};

    #[test]
    fn try_push_and_try_pop_respect_capacity_and_fifo_order() {
        let exit_code = Reactor::new(ReactorConfig::new()).run(|| {
            let queue: BoundedQueue<u32> = BoundedQueue::new(2);
            assert!(queue.is_empty());
            assert!(queue.try_push(1).is_ok());
            assert!(queue.try_push(2).is_ok());
            assert!(queue.is_full());
            assert_eq!(queue.try_push(3), Err(3));
            assert_eq!(queue.try_pop(), Some(1));
            assert_eq!(queue.try_pop(), Some(2));
            assert_eq!(queue.try_pop(), None);
            crate::stop(0);
        });
        assert_eq!(exit_code, 0);
    }
}

use crate::error::ReactorError;
use crate::queue::FiberQueue;
use crate::scheduler::Timeout;
use std::cell::UnsafeCell;

struct Inner {
    readers: u32,
    writer: bool,
    waiters: FiberQueue,
}

/// A reader/writer lock: any number of concurrent readers, or exactly one
/// writer, never both.
///
/// Readers and writers share a single wait queue; every unlock wakes
/// everyone waiting and lets them re-check the condition they're waiting
/// for, rather than maintaining separate reader/writer queues. This
/// favors simplicity over strict writer-priority fairness.
///
/// `&self`-based — see [`Signal`](super::Signal)'s docs for why.
pub struct RwLock {
    inner: UnsafeCell<Inner>,
}

impl RwLock {
    pub fn new() -> Self {
        Self { inner: UnsafeCell::new(Inner { readers: 0, writer: false, waiters: FiberQueue::new() }) }
    }

    fn inner(&self) -> &mut Inner {
        unsafe { &mut *self.inner.get() }
    }

    pub fn read_lock(&self) {
        let _ = self.read_lock_timeout(Timeout::never());
    }

    pub fn read_lock_timeout(&self, timeout: Timeout) -> Result<(), ReactorError> {
        loop {
            let inner = self.inner();
            if !inner.writer {
                inner.readers += 1;
                return Ok(());
            }
            let waiters: *mut FiberQueue = &mut inner.waiters;
            // Safety: see `Semaphore::acquire_timeout`.
            unsafe { (*waiters).suspend(timeout) }?;
        }
    }

    pub fn try_read_lock(&self) -> bool {
        let inner = self.inner();
        if inner.writer {
            false
        } else {
            inner.readers += 1;
            true
        }
    }

    pub fn read_unlock(&self) {
        let inner = self.inner();
        debug_assert!(inner.readers > 0, "read_unlock called with no readers held");
        inner.readers -= 1;
        if inner.readers == 0 {
            inner.waiters.resume_all();
        }
    }

    pub fn write_lock(&self) {
        let _ = self.write_lock_timeout(Timeout::never());
    }

    pub fn write_lock_timeout(&self, timeout: Timeout) -> Result<(), ReactorError> {
        loop {
            let inner = self.inner();
            if !inner.writer && inner.readers == 0 {
                inner.writer = true;
                return Ok(());
            }
            let waiters: *mut FiberQueue = &mut inner.waiters;
            // Safety: see `Semaphore::acquire_timeout`.
            unsafe { (*waiters).suspend(timeout) }?;
        }
    }

    pub fn try_write_lock(&self) -> bool {
        let inner = self.inner();
        if inner.writer || inner.readers > 0 {
            false
        } else {
            inner.writer = true;
            true
        }
    }

    pub fn write_unlock(&self) {
        let inner = self.inner();
        debug_assert!(inner.writer, "write_unlock called without holding the write lock");
        inner.writer = false;
        inner.waiters.resume_all();
    }
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_readers_allowed_concurrently() {
        let lock = RwLock::new();
        assert!(lock.try_read_lock());
        assert!(lock.try_read_lock());
        assert!(!lock.try_write_lock());
        lock.read_unlock();
        assert!(!lock.try_write_lock()); // one reader remains
        lock.read_unlock();
        assert!(lock.try_write_lock());
    }

    #[test]
    fn writer_excludes_readers_and_other_writers() {
        let lock = RwLock::new();
        assert!(lock.try_write_lock());
        assert!(!lock.try_read_lock());
        assert!(!lock.try_write_lock());
        lock.write_unlock();
        assert!(lock.try_read_lock());
    }
}

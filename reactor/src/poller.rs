//! Readiness polling and the blocking-call adapter.
//!
//! One `epoll` instance per reactor, owned by the [`Scheduler`]. Fibers
//! never call `epoll_wait` directly: the idle fiber does, with a timeout
//! derived from [`Timers::time_till_next`](crate::timer::Timers::time_till_next)
//! so a reactor with only timers pending still sleeps instead of spinning.
//! A fiber that wants to block on a file descriptor registers interest,
//! suspends on a private queue, and is woken once `epoll_wait` reports the
//! fd ready (or its own timeout expires, if it gave one).

use crate::error::{ReactorError, SyscallError};
use crate::queue::FiberQueue;
use crate::scheduler::{self, Timeout};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const READABLE: Self = Self { readable: true, writable: false };
    pub const WRITABLE: Self = Self { readable: false, writable: true };
    pub const READABLE_WRITABLE: Self = Self { readable: true, writable: true };

    fn to_epoll_events(self) -> u32 {
        let mut events = libc::EPOLLET as u32;
        if self.readable {
            events |= libc::EPOLLIN as u32;
        }
        if self.writable {
            events |= libc::EPOLLOUT as u32;
        }
        events
    }
}

struct Registration {
    waiters: FiberQueue,
    interest: Interest,
}

/// Owns the epoll instance backing the reactor's I/O readiness. Created
/// once by [`Scheduler::new`](crate::scheduler::Scheduler) and driven from
/// the idle fiber's body.
pub(crate) struct Poller {
    epoll_fd: RawFd,
    // Boxed so a registration's address (and therefore the `FiberQueue`'s,
    // which a parked slot may hold a raw pointer back to) stays stable
    // across inserts that grow the map.
    registrations: HashMap<RawFd, Box<Registration>>,
}

impl Poller {
    pub(crate) fn new() -> io::Result<Self> {
        // Safety: epoll_create1 with no flags is infallible given valid
        // arguments; failure is reported through errno as usual.
        let epoll_fd = unsafe { libc::epoll_create1(0) };
        if epoll_fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { epoll_fd, registrations: HashMap::new() })
    }

    pub(crate) fn register(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        let mut event = libc::epoll_event { events: interest.to_epoll_events(), u64: fd as u64 };
        let (op, result) = if let Some(reg) = self.registrations.get_mut(&fd) {
            reg.interest = interest;
            (libc::EPOLL_CTL_MOD, unsafe {
                libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_MOD, fd, &mut event)
            })
        } else {
            self.registrations.insert(fd, Box::new(Registration { waiters: FiberQueue::volatile(), interest }));
            (libc::EPOLL_CTL_ADD, unsafe {
                libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_ADD, fd, &mut event)
            })
        };
        if result != 0 {
            let err = io::Error::last_os_error();
            if op == libc::EPOLL_CTL_ADD {
                self.registrations.remove(&fd);
            }
            return Err(err);
        }
        Ok(())
    }

    pub(crate) fn deregister(&mut self, fd: RawFd) {
        if self.registrations.remove(&fd).is_some() {
            // Safety: fd was previously added; EPOLL_CTL_DEL ignores the
            // event pointer, so a null-ish dummy is fine here but libc's
            // signature still asks for one.
            let mut dummy = libc::epoll_event { events: 0, u64: 0 };
            unsafe {
                libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, &mut dummy);
            }
        }
    }

    /// Raw pointer to the wait queue for an already-registered fd. Used
    /// by [`wait_for_readiness`] to suspend outside of any `with` borrow.
    pub(crate) fn waiters_ptr(&mut self, fd: RawFd) -> *mut FiberQueue {
        &mut self
            .registrations
            .get_mut(&fd)
            .expect("waiters_ptr called for an unregistered fd")
            .waiters as *mut _
    }

    /// Blocks up to `timeout` (or forever, if `None`) waiting for any
    /// registered fd to become ready, then wakes every fiber parked on a
    /// now-ready fd. Called once per idle-fiber turn.
    pub(crate) fn poll(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        let timeout_ms = match timeout {
            Some(d) => i32::try_from(d.as_millis()).unwrap_or(i32::MAX),
            None => -1,
        };
        let mut events: [libc::epoll_event; 64] = unsafe { std::mem::zeroed() };
        // Safety: `events` is a valid, appropriately sized buffer for up
        // to 64 results; epoll_wait never writes more than `maxevents`.
        let n = unsafe {
            libc::epoll_wait(self.epoll_fd, events.as_mut_ptr(), events.len() as i32, timeout_ms)
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }
        for event in &events[..n as usize] {
            let fd = event.u64 as RawFd;
            if let Some(reg) = self.registrations.get_mut(&fd) {
                reg.waiters.resume_all();
            }
        }
        Ok(())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll_fd);
        }
    }
}

/// Suspends the current fiber until `fd` reports one of `interest`'s
/// readiness conditions, or `timeout` elapses.
pub fn wait_for_readiness(fd: RawFd, interest: Interest, timeout: Timeout) -> Result<(), ReactorError> {
    scheduler::with(|s| s.poller_register(fd, interest))
        .map_err(|e| ReactorError::Syscall(SyscallError::from_io(e)))?;

    struct Deregister(RawFd);
    impl Drop for Deregister {
        fn drop(&mut self) {
            scheduler::with(|s| s.poller_deregister(self.0));
        }
    }
    let _dereg = Deregister(fd);

    let waiters_ptr: *mut FiberQueue = scheduler::with(|s| s.poller_waiters_ptr(fd));
    unsafe { (*waiters_ptr).suspend(timeout) }
}

/// Retries `op` (expected to be a raw non-blocking syscall returning `-1`
/// on failure) until it succeeds or fails with something other than
/// `EAGAIN`/`EWOULDBLOCK`, suspending on `fd`'s readiness between
/// attempts. Mirrors the shape of a blocking `read`/`write`/`accept` call
/// without ever blocking the reactor thread.
pub fn blocking_call<T>(
    fd: RawFd,
    interest: Interest,
    timeout: Timeout,
    mut op: impl FnMut() -> i64,
) -> Result<T, ReactorError>
where
    T: TryFrom<i64>,
{
    loop {
        let result = op();
        if result >= 0 {
            return Ok(T::try_from(result).unwrap_or_else(|_| unreachable!("op returned a value out of T's range")));
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::WouldBlock {
            return Err(ReactorError::Syscall(SyscallError::from_io(err)));
        }
        wait_for_readiness(fd, interest, timeout)?;
    }
}

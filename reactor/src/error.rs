//! Error taxonomy.
//!
//! Mirrors the style used throughout this codebase: plain enums with a
//! hand-written `Display` and `std::error::Error` impl, no derive-macro
//! crate. Fatal programming errors (exhausted fiber pool, releasing a lock
//! you don't own, nested critical-section violations, hangs) are not part
//! of this taxonomy at all — those are `panic!`/`assert!`, by design.

use std::fmt;
use std::io;

/// A bounded wait (timer, semaphore, lock, ...) hit its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutExpired;

impl fmt::Display for TimeoutExpired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("timeout expired")
    }
}

impl std::error::Error for TimeoutExpired {}

/// Sentinel used to unwind fibers during reactor shutdown. Never meant to
/// be caught by application code; [`crate::scheduler::Scheduler::run`]
/// catches it exactly once, at the top of the main fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReactorExit(pub i32);

impl fmt::Display for ReactorExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reactor exiting with code {}", self.0)
    }
}

impl std::error::Error for ReactorExit {}

/// Cross-fiber cancellation, delivered via
/// [`throw_in_fiber`](crate::scheduler::Scheduler::throw_in_fiber) or a
/// [`FiberGroup`](crate::group::FiberGroup) closing. The fiber runner
/// catches this so the fiber ends cleanly and its slot is recycled; it is
/// not expected to propagate out of `start()`.
#[derive(Debug, Clone)]
pub enum FiberInterrupt {
    /// Plain cancellation requested via `throw_in_fiber`.
    Cancelled,
    /// Cancellation caused by a [`FiberGroup`](crate::group::FiberGroup)
    /// closing; carries the group's id so nested `run_tracked` calls can
    /// tell which group they're being unwound for.
    GroupExtinction { group_id: u64 },
}

impl fmt::Display for FiberInterrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FiberInterrupt::Cancelled => f.write_str("fiber interrupted"),
            FiberInterrupt::GroupExtinction { group_id } => {
                write!(f, "fiber group {group_id} closed")
            }
        }
    }
}

impl std::error::Error for FiberInterrupt {}

/// A [`Throttler`](crate::sync::Throttler) withdrawal asked for more
/// tokens than the bucket's burst size could ever hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestExceedsCapacity;

impl fmt::Display for RequestExceedsCapacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("requested withdrawal exceeds the throttler's burst size")
    }
}

impl std::error::Error for RequestExceedsCapacity {}

/// A future-bound fiber (one joined via [`join_fiber`](
/// crate::scheduler::Scheduler::join_fiber)) ended before setting its
/// result — typically because it panicked or was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiberKilledWithNoResult;

impl fmt::Display for FiberKilledWithNoResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("fiber was killed before producing a result")
    }
}

impl std::error::Error for FiberKilledWithNoResult {}

/// Raised from the blocking-call adapter (`read`, `write`, `accept`,
/// `connect`, ...) when the underlying syscall fails with anything other
/// than `EAGAIN`/`EWOULDBLOCK`.
#[derive(Debug)]
pub struct SyscallError {
    pub errno: i32,
    source: io::Error,
}

impl SyscallError {
    pub(crate) fn last_os_error() -> Self {
        Self::from_io(io::Error::last_os_error())
    }

    pub(crate) fn from_io(source: io::Error) -> Self {
        Self {
            errno: source.raw_os_error().unwrap_or(0),
            source,
        }
    }
}

impl fmt::Display for SyscallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "syscall failed (errno {}): {}", self.errno, self.source)
    }
}

impl std::error::Error for SyscallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// The union of errors a blocking-call or suspending primitive can raise.
#[derive(Debug)]
pub enum ReactorError {
    Timeout(TimeoutExpired),
    Interrupt(FiberInterrupt),
    Syscall(SyscallError),
    KilledWithNoResult(FiberKilledWithNoResult),
    ExceedsCapacity(RequestExceedsCapacity),
}

impl fmt::Display for ReactorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReactorError::Timeout(e) => e.fmt(f),
            ReactorError::Interrupt(e) => e.fmt(f),
            ReactorError::Syscall(e) => e.fmt(f),
            ReactorError::KilledWithNoResult(e) => e.fmt(f),
            ReactorError::ExceedsCapacity(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for ReactorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReactorError::Timeout(e) => Some(e),
            ReactorError::Interrupt(e) => Some(e),
            ReactorError::Syscall(e) => Some(e),
            ReactorError::KilledWithNoResult(e) => Some(e),
            ReactorError::ExceedsCapacity(e) => Some(e),
        }
    }
}

impl From<TimeoutExpired> for ReactorError {
    fn from(e: TimeoutExpired) -> Self {
        Self::Timeout(e)
    }
}

impl From<FiberInterrupt> for ReactorError {
    fn from(e: FiberInterrupt) -> Self {
        Self::Interrupt(e)
    }
}

impl From<SyscallError> for ReactorError {
    fn from(e: SyscallError) -> Self {
        Self::Syscall(e)
    }
}

impl From<FiberKilledWithNoResult> for ReactorError {
    fn from(e: FiberKilledWithNoResult) -> Self {
        Self::KilledWithNoResult(e)
    }
}

impl From<RequestExceedsCapacity> for ReactorError {
    fn from(e: RequestExceedsCapacity) -> Self {
        Self::ExceedsCapacity(e)
    }
}

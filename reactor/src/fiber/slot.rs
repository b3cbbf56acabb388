use crate::exception::PendingException;
use crate::queue::FiberQueue;
use bitflags::bitflags;
use fiber::Stack;
use std::any::Any;
use std::time::Instant;

/// The state of a fiber slot, as tracked internally by the table.
///
/// `getFiberState` (see [`Table::fiber_state`](super::Table::fiber_state))
/// reports `Scheduled` whenever the slot is `Sleeping` but [`FiberFlags::SCHEDULED`]
/// is set — that composite view, not this raw enum, is what external code
/// is meant to observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FiberState {
    /// The slot is free and available to `spawn`.
    None,
    /// `spawn` installed a closure but the fiber has not been switched
    /// into yet.
    Starting,
    /// Scheduled to run, but not currently running (see `getFiberState`'s
    /// special treatment of this vs. `Sleeping` + `SCHEDULED`).
    Scheduled,
    /// Currently the one fiber executing on the reactor thread.
    Running,
    /// Suspended, parked on some fiber queue (or none, if the suspension
    /// path hasn't parked it yet).
    Sleeping,
    /// Returned or raised past its entry function; awaiting recycling.
    Done,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FiberFlags: u32 {
        /// A closure has been installed (distinguishes a genuinely free
        /// slot from one merely reset between incarnations).
        const CALLBACK_SET = 1 << 0;
        /// One of the two special fibers (main, idle); never eligible for
        /// `throw_in_fiber` unless explicitly allowed, never recycled.
        const SPECIAL       = 1 << 1;
        /// On the ready queue (or about to be: `resume_fiber` sets this
        /// before the fiber actually reaches the head).
        const SCHEDULED     = 1 << 2;
        /// Parked on a fiber queue.
        const SLEEPING      = 1 << 3;
        /// A pending exception is installed; thrown on next switch-in.
        const HAS_EXCEPTION = 1 << 4;
        /// The pending exception's backtrace should be rewritten to the
        /// resuming fiber's current suspend point.
        const EXCEPTION_BT  = 1 << 5;
        /// GC integration enabled for this fiber (stack-descriptor
        /// scanning hook); the core only tracks the flag, GC itself is
        /// out of scope.
        const GC_ENABLED    = 1 << 6;
        /// Boosted priority: next `resume_fiber` on this handle prepends
        /// instead of appending.
        const PRIORITY      = 1 << 7;
        /// Set by `resume_timed_out` so the fiber can tell, once resumed,
        /// whether it woke up normally or because its deadline passed.
        const TIMED_OUT     = 1 << 8;
    }
}

/// One entry in the fiber table.
pub(crate) struct Slot {
    pub state: FiberState,
    pub flags: FiberFlags,
    pub incarnation: u32,

    /// The fiber's own stack. `None` for the two special fibers, which run
    /// directly on the reactor thread / are driven by the scheduler loop
    /// rather than owning a `fiber::Stack` of their own.
    pub stack: Option<Stack>,
    /// Saved stack pointer of a suspended fiber, or `0` while `Running`
    /// (a real stack pointer is never zero). Also used by the main slot
    /// to save the reactor thread's own resume point across a switch.
    pub sp: usize,

    /// Intrusive doubly-linked list membership: at most one queue (the
    /// ready queue or a primitive's fiber queue) owns a slot at a time.
    pub prev: Option<usize>,
    pub next: Option<usize>,
    /// Raw pointer to the queue currently owning this slot, or `None` if
    /// unowned. Lets a forced removal (timeout, injected exception) unlink
    /// the slot from wherever it's actually parked — not just clear its
    /// own `prev`/`next` — by calling back into that queue's own `remove`.
    /// Set by `FiberQueue::push_back`/`push_front`, cleared by `remove`.
    pub owner: Option<*mut FiberQueue>,

    pub pending_exception: Option<PendingException>,

    /// Closure installed by `spawn`, taken by the trampoline on first
    /// entry. `None` once the fiber has started (or before `spawn`).
    pub entry: Option<Box<dyn FnOnce() + 'static>>,
    /// Panic payload captured by the trampoline, if the entry function
    /// unwound instead of returning normally.
    pub panic: Option<Box<dyn Any + Send + 'static>>,

    /// Timestamp the fiber most recently became `Running`, used by hogger
    /// and hang detection.
    pub run_started_at: Option<Instant>,

    /// Signalled once when the fiber reaches `Done`; `join_fiber` waits
    /// on this.
    pub join: crate::sync::Signal,
}

impl Slot {
    pub fn free() -> Self {
        Self {
            state: FiberState::None,
            flags: FiberFlags::empty(),
            incarnation: 0,
            stack: None,
            sp: 0,
            prev: None,
            next: None,
            owner: None,
            pending_exception: None,
            entry: None,
            panic: None,
            run_started_at: None,
            join: crate::sync::Signal::new(),
        }
    }

    pub fn is_free(&self) -> bool {
        self.state == FiberState::None
    }
}

//! The reactor core: the ready queue, the single context-switch point, and
//! every operation a running fiber uses to interact with the scheduler
//! that owns it.
//!
//! # Safety invariant
//!
//! Exactly one [`Scheduler`] is reachable per OS thread, through the
//! thread-local raw pointer in [`with`]. Every access goes through `with`,
//! and `with`'s closure must never itself call [`fiber::switch`] — the
//! convention followed throughout this module is: borrow the scheduler,
//! compute whatever raw stack pointers are needed, let the borrow end,
//! *then* perform the raw switch, then re-borrow via a fresh `with` call
//! to handle whatever happens after the destination fiber eventually
//! switches back. This is what lets a stackful, symmetric-switch
//! scheduler exist at all in safe-looking Rust: the switch itself steps
//! outside of what the borrow checker can see.

use crate::config::ReactorConfig;
use crate::defer::DeferPool;
use crate::error::{FiberInterrupt, ReactorError, TimeoutExpired};
use crate::exception::PendingException;
use crate::fiber::{FiberFlags, FiberHandle, FiberState, Table, IDLE_SLOT, MAIN_SLOT};
use crate::hang_detector::HangDetector;
use crate::process::ProcessSubsystem;
use crate::poller::{Interest, Poller};
use crate::queue::FiberQueue;
use crate::test_support::{Clock, SystemClock};
use crate::timer::{TimerId, Timers};
use fiber::Stack;
use std::any::Any;
use std::cell::Cell;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

thread_local! {
    static CURRENT: Cell<*mut Scheduler> = const { Cell::new(std::ptr::null_mut()) };
}

/// Runs `f` with exclusive access to the scheduler driving the current
/// thread. Panics if called from a thread with no reactor running.
pub(crate) fn with<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    let ptr = CURRENT.with(Cell::get);
    assert!(!ptr.is_null(), "no reactor is running on this thread");
    // Safety: see module invariant above; `ptr` is valid for the dynamic
    // extent of `Reactor::run`.
    f(unsafe { &mut *ptr })
}

/// Like [`with`], but `None` instead of a panic when no reactor is
/// running on this thread — for call sites (mostly sync-primitive unit
/// tests) that legitimately operate on a primitive outside any reactor.
pub(crate) fn try_with<R>(f: impl FnOnce(&mut Scheduler) -> R) -> Option<R> {
    let ptr = CURRENT.with(Cell::get);
    if ptr.is_null() {
        None
    } else {
        // Safety: see module invariant above; `ptr` is valid for the
        // dynamic extent of `Reactor::run`.
        Some(f(unsafe { &mut *ptr }))
    }
}

/// The currently running fiber's handle, or `None` outside a reactor.
pub(crate) fn current_fiber_handle_opt() -> Option<FiberHandle> {
    try_with(|s| s.current_handle())
}

/// The current time, as seen by whatever clock the running reactor was
/// configured with (the system clock in production, a mock in tests).
pub fn now() -> Instant {
    with(|s| s.now())
}

/// A deadline for a suspending operation.
#[derive(Debug, Clone, Copy)]
pub enum Timeout {
    Never,
    At(Instant),
}

impl Timeout {
    pub fn never() -> Self {
        Timeout::Never
    }

    pub fn after(duration: Duration) -> Self {
        Timeout::At(with(|s| s.now()) + duration)
    }

    pub fn at(instant: Instant) -> Self {
        Timeout::At(instant)
    }

    pub(crate) fn is_elapsed(&self) -> bool {
        match self {
            Timeout::Never => false,
            Timeout::At(t) => *t <= with(|s| s.now()),
        }
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        match self {
            Timeout::Never => None,
            Timeout::At(t) => Some(*t),
        }
    }
}

/// The scheduler's view of one critical section: while any are open,
/// suspending operations are a programming error.
pub struct CriticalSectionGuard {
    _private: (),
}

impl Drop for CriticalSectionGuard {
    fn drop(&mut self) {
        with(|s| {
            debug_assert!(s.critical_section_depth > 0);
            s.critical_section_depth -= 1;
        });
    }
}

pub struct Scheduler {
    pub(crate) table: Table,
    ready: FiberQueue,
    pub(crate) timers: Timers,
    clock: Box<dyn Clock>,
    config: ReactorConfig,
    current: usize,
    critical_section_depth: u32,
    idle_callbacks: Vec<Box<dyn FnMut()>>,
    stop_code: Option<i32>,
    gc_requests: u64,
    pub(crate) groups: std::collections::HashMap<u64, crate::group::GroupState>,
    next_group_id: u64,
    poller: Poller,
    defer_pool: DeferPool,
    hang_detector: Option<HangDetector>,
    process: ProcessSubsystem,
}

impl Scheduler {
    fn new(
        config: ReactorConfig,
        clock: Box<dyn Clock>,
        signals: Box<dyn crate::process::SignalSource>,
        children: Box<dyn crate::process::ChildWait>,
    ) -> Self {
        let now = clock.now();
        let hang_detector = (config.hang_detector_timeout > Duration::ZERO)
            .then(|| HangDetector::spawn(config.hang_detector_timeout));
        let mut scheduler = Self {
            table: Table::new(config.num_fibers),
            ready: FiberQueue::new(),
            timers: Timers::new(config.timer_granularity, config.num_timers, now),
            clock,
            config,
            current: MAIN_SLOT,
            critical_section_depth: 0,
            idle_callbacks: Vec::new(),
            stop_code: None,
            gc_requests: 0,
            groups: std::collections::HashMap::new(),
            next_group_id: 1,
            poller: Poller::new().expect("failed to create epoll instance"),
            defer_pool: DeferPool::new(config.num_threads_in_pool, config.thread_stack_size),
            hang_detector,
            process: ProcessSubsystem::new(signals, children),
        };
        // The idle fiber is never placed on the ready queue: `switch_to_next`
        // falls back to it directly whenever the ready queue is empty. Its
        // body runs idle callbacks, drains any finished deferred-to-thread
        // jobs, then polls for I/O readiness with a timeout bounded by the
        // nearest timer deadline, so a reactor with nothing to do actually
        // sleeps instead of spinning.
        scheduler.table.slot_mut(IDLE_SLOT).entry = Some(Box::new(|| loop {
            with(|s| {
                s.run_idle_callbacks();
                crate::defer::drain_completions(s);
                crate::process::drain(s);
            });
            let timeout = with(|s| s.timers.time_till_next(s.now()));
            with(|s| {
                if let Err(err) = s.poller.poll(timeout) {
                    tracing::warn!(%err, "epoll_wait failed");
                }
            });
            Scheduler::switch_to_next();
        }));
        scheduler
    }

    pub(crate) fn now(&self) -> Instant {
        self.clock.now()
    }

    pub(crate) fn current_slot(&self) -> usize {
        self.current
    }

    pub(crate) fn current_handle(&self) -> FiberHandle {
        self.table.handle_for(self.current)
    }

    pub(crate) fn in_critical_section(&self) -> bool {
        self.critical_section_depth > 0
    }

    /// Installs `body` as a new fiber, scheduled to run. Does not switch
    /// to it immediately — it joins the ready queue behind whatever is
    /// already runnable.
    pub(crate) fn spawn_fiber(&mut self, body: Box<dyn FnOnce()>) -> FiberHandle {
        let index = self.table.spawn(body);
        let handle = self.table.handle_for(index);
        self.ready.push_back(&mut self.table, index);
        handle
    }

    /// Appends (or, if the fiber was priority-boosted, prepends) `handle`
    /// to the ready queue. No-op if the handle no longer resolves.
    ///
    /// Unlinks the slot from whatever queue currently owns it first: a
    /// caller resuming a fiber out-of-band (a timeout, an injected
    /// exception) rather than through the owning queue's own `pop_front`
    /// would otherwise double-link the slot into both queues.
    pub(crate) fn resume_fiber(&mut self, handle: FiberHandle, immediate: bool) {
        let Some(index) = self.table.resolve(handle) else { return };
        crate::queue::force_unlink(&mut self.table, index);
        let priority = self.table.slot(index).flags.contains(FiberFlags::PRIORITY);
        self.table.transition_scheduled(index);
        if immediate || priority {
            self.ready.push_front(&mut self.table, index);
        } else {
            self.ready.push_back(&mut self.table, index);
        }
    }

    pub(crate) fn resume_timed_out(&mut self, handle: FiberHandle) {
        if let Some(index) = self.table.resolve(handle) {
            self.table.slot_mut(index).flags.insert(FiberFlags::TIMED_OUT);
            self.resume_fiber(handle, false);
        }
    }

    fn check_hogger(&self) {
        let Some(started) = self.table.slot(self.current).run_started_at else { return };
        let elapsed = self.now().saturating_duration_since(started);
        if elapsed >= self.config.hogger_warning_threshold {
            tracing::warn!(
                slot = self.current,
                elapsed_ms = elapsed.as_millis() as u64,
                "fiber ran longer than the hogger warning threshold without yielding"
            );
        }
    }

    /// The one true context switch. Parks the calling fiber exactly where
    /// the caller already left it (ready queue, a primitive's queue, or
    /// nowhere if it is about to be recycled) and resumes whatever is
    /// next in line, falling back to the idle fiber.
    pub(crate) fn switch_to_next() {
        let (from_ptr, to_sp, same) = with(|s| {
            s.check_hogger();
            let next = s.ready.pop_front(&mut s.table).unwrap_or(IDLE_SLOT);
            let prev = s.current;
            if next == prev {
                return (std::ptr::null_mut(), 0usize, true);
            }

            if next != MAIN_SLOT && s.table.slot(next).stack.is_none() {
                let stack = Stack::new(s.config.fiber_stack_size)
                    .expect("failed to allocate fiber stack");
                let sp = unsafe { fiber::init_stack(&stack, trampoline, next) };
                s.table.slot_mut(next).stack = Some(stack);
                s.table.slot_mut(next).sp = sp;
            }

            s.table.transition_running(next);
            s.table.slot_mut(next).run_started_at = Some(s.now());
            s.current = next;

            let from_ptr: *mut usize = &mut s.table.slot_mut(prev).sp;
            let to_sp = s.table.slot(next).sp;
            (from_ptr, to_sp, false)
        });

        if !same {
            // Safety: `from_ptr` points into the table's fixed-capacity
            // slot array, stable for the scheduler's whole lifetime.
            unsafe { fiber::switch(from_ptr, to_sp) };
        }

        with(|s| s.on_resumed());
    }

    /// Runs whenever control returns to a fiber after a switch, whether
    /// that fiber just woke up normally or is about to be killed by an
    /// injected exception.
    fn on_resumed(&mut self) {
        if let Some(detector) = &self.hang_detector {
            detector.beat();
        }
        let index = self.current;
        self.drive_timers();
        let has_exception = self.table.slot(index).flags.contains(FiberFlags::HAS_EXCEPTION);
        if has_exception {
            self.table.slot_mut(index).flags.remove(FiberFlags::HAS_EXCEPTION);
            let exc = self.table.slot_mut(index).pending_exception.take();
            if let Some(exc) = exc {
                exc.throw();
            }
        }
    }

    fn drive_timers(&mut self) {
        let now = self.now();
        let fired = self.timers.advance_and_fire(now);
        for cb in fired {
            cb();
        }
    }

    /// Blocks the calling fiber until some other code calls
    /// [`Scheduler::resume_fiber`] or [`Scheduler::resume_timed_out`] on
    /// its handle. Returns whether the wakeup was a timeout.
    pub(crate) fn suspend_current_fiber() -> bool {
        assert!(
            !with(|s| s.in_critical_section()),
            "attempted to suspend a fiber while inside a critical section"
        );
        let index = with(|s| s.current_slot());
        Scheduler::switch_to_next();
        with(|s| {
            let timed_out = s.table.slot(index).flags.contains(FiberFlags::TIMED_OUT);
            s.table.slot_mut(index).flags.remove(FiberFlags::TIMED_OUT);
            timed_out
        })
    }

    pub(crate) fn register_timer_at(
        &mut self,
        deadline: Instant,
        callback: impl FnOnce() + 'static,
    ) -> TimerId {
        self.timers.register_at(deadline, callback)
    }

    pub(crate) fn cancel_timer(&mut self, id: TimerId) {
        self.timers.cancel(id);
    }

    pub(crate) fn register_idle_callback(&mut self, callback: impl FnMut() + 'static) {
        self.idle_callbacks.push(Box::new(callback));
    }

    fn run_idle_callbacks(&mut self) {
        for cb in &mut self.idle_callbacks {
            cb();
        }
    }

    pub(crate) fn request_gc_collection(&mut self) {
        self.gc_requests += 1;
    }

    #[cfg(test)]
    pub(crate) fn gc_requests(&self) -> u64 {
        self.gc_requests
    }

    pub(crate) fn allocate_group_id(&mut self) -> u64 {
        let id = self.next_group_id;
        self.next_group_id += 1;
        id
    }

    pub(crate) fn max_desired_run_time(&self) -> Duration {
        self.config.max_desired_run_time
    }

    pub(crate) fn poller_register(&mut self, fd: RawFd, interest: Interest) -> std::io::Result<()> {
        self.poller.register(fd, interest)
    }

    pub(crate) fn poller_deregister(&mut self, fd: RawFd) {
        self.poller.deregister(fd);
    }

    pub(crate) fn poller_waiters_ptr(&mut self, fd: RawFd) -> *mut FiberQueue {
        self.poller.waiters_ptr(fd)
    }

    pub(crate) fn defer_pool_mut(&mut self) -> &mut DeferPool {
        &mut self.defer_pool
    }

    pub(crate) fn process_subsystem_mut(&mut self) -> &mut ProcessSubsystem {
        &mut self.process
    }
}

/// First (and only) entry point of a brand-new fiber's stack: fetches its
/// installed closure, runs it under `catch_unwind` so a panicking body (or
/// one killed by an injected exception) still lets the scheduler recycle
/// the slot and wake any joiners, then falls back into the scheduler
/// forever. Never returns: returning here would mean resuming into
/// garbage, which is exactly what the architecture-specific trampolines'
/// illegal-instruction traps guard against.
extern "C" fn trampoline(slot_index: usize) -> ! {
    let entry = with(|s| s.table.slot_mut(slot_index).entry.take())
        .expect("fiber trampoline entered with no installed closure");
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(entry));
    with(|s| finish_fiber(s, slot_index, result));
    loop {
        Scheduler::switch_to_next();
    }
}

fn finish_fiber(s: &mut Scheduler, index: usize, result: Result<(), Box<dyn Any + Send>>) {
    if let Err(panic) = result {
        if panic.downcast_ref::<FiberInterrupt>().is_some() {
            tracing::debug!(slot = index, "fiber terminated by an injected exception");
        } else {
            tracing::warn!(slot = index, "fiber body panicked");
        }
        s.table.slot_mut(index).panic = Some(panic);
    }
    s.table.transition_done(index);
    crate::sync::signal_join(s, index);
}

/// The top-level handle: owns the scheduler, installs it as the current
/// thread's reactor for the duration of [`Reactor::run`], and drives the
/// run loop.
pub struct Reactor {
    scheduler: Box<Scheduler>,
}

impl Reactor {
    pub fn new(config: ReactorConfig) -> Self {
        Self {
            scheduler: Box::new(Scheduler::new(
                config,
                Box::new(SystemClock),
                Box::new(crate::process::NoSignals),
                Box::new(crate::process::OsChildWait::default()),
            )),
        }
    }

    /// Like [`Reactor::new`], but against a caller-supplied clock. Used by
    /// tests that need deterministic timer firing order without racing
    /// the wall clock; see [`crate::test_support::MockClock`].
    pub fn with_clock(config: ReactorConfig, clock: Box<dyn Clock>) -> Self {
        Self {
            scheduler: Box::new(Scheduler::new(
                config,
                clock,
                Box::new(crate::process::NoSignals),
                Box::new(crate::process::OsChildWait::default()),
            )),
        }
    }

    /// Like [`Reactor::new`], but with caller-supplied signal and child-exit
    /// sources plugged into the [`SignalSource`](crate::process::SignalSource)/
    /// [`ChildWait`](crate::process::ChildWait) seam, in place of the
    /// defaults (no signal delivery, OS-backed `waitpid` reaping).
    pub fn with_process_sources(
        config: ReactorConfig,
        signals: Box<dyn crate::process::SignalSource>,
        children: Box<dyn crate::process::ChildWait>,
    ) -> Self {
        Self { scheduler: Box::new(Scheduler::new(config, Box::new(SystemClock), signals, children)) }
    }

    /// Installs `main` as the first fiber and hands control to it.
    ///
    /// Under symmetric switching the main slot (the calling OS thread's
    /// own stack) is resumed exactly once more after this: when
    /// [`stop`] hands control back to it. There is no separate dispatch
    /// loop running on this stack in between — every scheduling decision
    /// happens inside [`Scheduler::switch_to_next`], which runs on
    /// whichever fiber's stack called it.
    pub fn run(mut self, main: impl FnOnce() + 'static) -> i32 {
        if self.scheduler.config.fault_handlers_enabled {
            crate::fault::install();
        }
        CURRENT.with(|cell| {
            assert!(cell.get().is_null(), "a reactor is already running on this thread");
            cell.set(self.scheduler.as_mut() as *mut Scheduler);
        });

        self.scheduler.spawn_fiber(Box::new(main));
        Scheduler::switch_to_next();

        let exit_code = self
            .scheduler
            .stop_code
            .expect("main slot resumed without a stop code having been set");
        CURRENT.with(|cell| cell.set(std::ptr::null_mut()));
        exit_code
    }
}

/// Stops the reactor: hands control back to [`Reactor::run`]'s caller
/// with `exit_code`. Whatever fiber calls this does not get control back
/// — the reactor tears down once `run` returns.
pub fn stop(exit_code: i32) -> ! {
    with(|s| {
        s.stop_code = Some(exit_code);
        s.table.transition_scheduled(MAIN_SLOT);
        s.ready.push_front(&mut s.table, MAIN_SLOT);
    });
    loop {
        Scheduler::switch_to_next();
    }
}

/// Spawns a new fiber running `body`, scheduled behind whatever is
/// already runnable.
pub fn spawn_fiber(body: impl FnOnce() + 'static) -> FiberHandle {
    with(|s| s.spawn_fiber(Box::new(body)))
}

/// Gives up the rest of the current fiber's turn, letting any other
/// ready fiber run before this one is resumed.
pub fn yield_now() {
    with(|s| {
        let index = s.current_slot();
        s.table.transition_scheduled(index);
        s.ready.push_back(&mut s.table, index);
    });
    Scheduler::switch_to_next();
}

/// Suspends the current fiber for at least `duration`.
pub fn sleep(duration: Duration) {
    let index = with(|s| s.current_slot());
    let deadline = with(|s| s.now()) + duration;
    with(|s| {
        s.table.slot_mut(index).flags.insert(FiberFlags::SLEEPING);
        let handle = s.table.handle_for(index);
        s.register_timer_at(deadline, move || with(|s| s.resume_timed_out(handle)));
    });
    Scheduler::suspend_current_fiber();
    with(|s| s.table.slot_mut(index).flags.remove(FiberFlags::SLEEPING));
}

/// Whether the current fiber has been running long enough, without
/// yielding, that it should give other fibers a turn. Consult this in
/// CPU-bound loops instead of yielding unconditionally every iteration.
pub fn should_yield() -> bool {
    with(|s| {
        let Some(started) = s.table.slot(s.current_slot()).run_started_at else { return false };
        s.now().saturating_duration_since(started) >= s.max_desired_run_time()
    })
}

/// Yields if [`should_yield`] says it's time to.
pub fn consider_yield() {
    if should_yield() {
        yield_now();
    }
}

pub fn current_fiber_id() -> crate::fiber::FiberId {
    with(|s| s.current_handle().fiber_id())
}

pub fn current_fiber_handle() -> FiberHandle {
    with(|s| s.current_handle())
}

pub fn get_fiber_state(handle: FiberHandle) -> FiberState {
    with(|s| s.table.fiber_state(handle))
}

/// Waits for `handle` to finish, returning `Ok(())` if its body returned
/// normally. If it panicked (including via an injected exception), the
/// panic is re-raised in the *caller* — matching `std::thread::JoinHandle`
/// more than a `Result`-returning join. Only the first caller to join a
/// given fiber gets this; its slot is recycled as part of the call, so an
/// `Err` for a handle nobody has joined yet means the handle doesn't
/// resolve to anything (already reaped, or never existed).
pub fn join_fiber(handle: FiberHandle) -> Result<(), ReactorError> {
    loop {
        let state = with(|s| {
            let index = s.table.resolve(handle)?;
            Some((index, s.table.slot(index).state))
        });
        let Some((index, state)) = state else {
            return Err(ReactorError::KilledWithNoResult(crate::error::FiberKilledWithNoResult));
        };
        if state == FiberState::Done {
            let panic = with(|s| {
                let panic = s.table.slot_mut(index).panic.take();
                s.table.finish_and_recycle(index);
                panic
            });
            return match panic {
                Some(p) => std::panic::resume_unwind(p),
                None => Ok(()),
            };
        }
        // Safety: `signal_ptr` points into the table's fixed-capacity slot
        // array; `wait_timeout` itself borrows the scheduler afresh via
        // `with` once it actually needs to suspend, so no borrow of
        // `Scheduler` spans the call.
        let signal_ptr: *mut crate::sync::Signal =
            with(|s| &mut s.table.slot_mut(index).join as *mut _);
        let _ = unsafe { (*signal_ptr).wait_timeout(Timeout::never()) };
    }
}

pub fn register_idle_callback(callback: impl FnMut() + 'static) {
    with(|s| s.register_idle_callback(callback));
}

/// Arms a one-shot timer, independent of any particular fiber.
pub fn register_timer(after: Duration, callback: impl FnOnce() + 'static) -> TimerId {
    let deadline = with(|s| s.now()) + after;
    with(|s| s.register_timer_at(deadline, callback))
}

/// Arms a timer that reschedules itself every `interval` until cancelled.
pub fn register_recurring_timer(interval: Duration, callback: impl FnMut() + 'static) -> TimerId {
    fn schedule(interval: Duration, mut callback: impl FnMut() + 'static) {
        let deadline = with(|s| s.now()) + interval;
        with(|s| {
            s.register_timer_at(deadline, move || {
                callback();
                schedule(interval, callback);
            })
        });
    }
    let deadline = with(|s| s.now()) + interval;
    let mut callback = callback;
    with(|s| {
        s.register_timer_at(deadline, move || {
            callback();
            schedule(interval, callback);
        })
    })
}

pub fn cancel_timer(id: TimerId) {
    with(|s| s.cancel_timer(id));
}

/// Opens a no-suspend region: any attempt to suspend the current fiber
/// while the returned guard is alive is a programming error (an
/// `assert!` failure, not a `Result`).
#[must_use]
pub fn critical_section() -> CriticalSectionGuard {
    with(|s| s.critical_section_depth += 1);
    CriticalSectionGuard { _private: () }
}

/// Injects `exc` into `handle`, to be raised as a panic the next time
/// that fiber is switched into. Delivered ahead of its normal position in
/// the ready queue.
pub fn throw_in_fiber<E: Any + Send + 'static>(
    handle: FiberHandle,
    exc: E,
    rewrite_backtrace: bool,
) -> Result<(), ReactorError> {
    with(|s| {
        let Some(index) = s.table.resolve(handle) else {
            return Err(ReactorError::KilledWithNoResult(crate::error::FiberKilledWithNoResult));
        };
        s.table.slot_mut(index).pending_exception =
            Some(PendingException::new(exc, rewrite_backtrace));
        s.table.slot_mut(index).flags.insert(FiberFlags::HAS_EXCEPTION);
        // A fiber throwing into itself is already running: it will pass
        // through `on_resumed` on its own next suspend point without any
        // help, and forcing it into the ready queue here would double-
        // link a slot that's also about to enqueue itself there (e.g.
        // inside `yield_now`).
        if index != s.current {
            s.resume_fiber(handle, true);
        }
        Ok(())
    })
}

/// Marks `handle` so its next `resume_fiber` call prepends to the ready
/// queue instead of appending.
pub fn boost_fiber_priority(handle: FiberHandle) {
    with(|s| {
        if let Some(index) = s.table.resolve(handle) {
            s.table.slot_mut(index).flags.insert(FiberFlags::PRIORITY);
        }
    });
}

pub fn request_gc_collection() {
    with(|s| s.request_gc_collection());
}

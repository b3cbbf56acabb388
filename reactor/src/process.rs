//! Signal delivery and subprocess exit notification, specified only at
//! their reactor-facing seam: a caller asks to wait on a signal number
//! or a child pid, and suspends until an idle-callback-driven poll
//! reports it. The actual OS plumbing (signalfd, fork/exec) stays out
//! of scope; [`SignalSource`] and [`ChildWait`] are the trait seam that
//! lets it be plugged in without touching scheduler internals, the same
//! shape as [`crate::defer`]'s worker pool but polled instead of
//! channel-driven.

use crate::scheduler::{self, Scheduler};
use crate::sync::Signal;
use std::collections::HashMap;

/// Reports which watched signal numbers have fired since the last poll.
/// Implementations must be non-blocking and cheap to call once per
/// scheduler tick.
pub trait SignalSource {
    /// Registers interest in `signum`; a no-op if already watched.
    fn watch(&mut self, signum: i32);
    /// Returns every watched signal number that fired since the last
    /// call.
    fn poll_pending(&mut self) -> Vec<i32>;
}

/// Default [`SignalSource`]: watches nothing, reports nothing. Real
/// signal delivery (signalfd, a self-pipe, ...) is OS glue the core
/// takes no dependency on; a host that needs it supplies its own
/// `SignalSource` at construction.
#[derive(Default)]
pub struct NoSignals;

impl SignalSource for NoSignals {
    fn watch(&mut self, _signum: i32) {}
    fn poll_pending(&mut self) -> Vec<i32> {
        Vec::new()
    }
}

/// Reports which watched child pids have exited since the last poll,
/// non-blocking, with each child's raw exit status.
pub trait ChildWait {
    /// Registers interest in `pid`; a no-op if already watched.
    fn watch(&mut self, pid: i32);
    /// Returns `(pid, exit_status)` for every watched child that exited
    /// since the last call.
    fn poll_exited(&mut self) -> Vec<(i32, i32)>;
}

/// Default [`ChildWait`]: watches nothing.
#[derive(Default)]
pub struct NoChildren;

impl ChildWait for NoChildren {
    fn watch(&mut self, _pid: i32) {}
    fn poll_exited(&mut self) -> Vec<(i32, i32)> {
        Vec::new()
    }
}

/// [`ChildWait`] backed by a non-blocking `waitpid(WNOHANG)` sweep over
/// the watched set. Reaping a pid the caller already knows about (has
/// already forked/spawned elsewhere) is squarely the reactor-facing
/// contract; starting the child is not this crate's concern.
#[derive(Default)]
pub struct OsChildWait {
    watched: Vec<i32>,
}

impl ChildWait for OsChildWait {
    fn watch(&mut self, pid: i32) {
        if !self.watched.contains(&pid) {
            self.watched.push(pid);
        }
    }

    fn poll_exited(&mut self) -> Vec<(i32, i32)> {
        let mut exited = Vec::new();
        self.watched.retain(|&pid| {
            let mut status: libc::c_int = 0;
            // Safety: `pid` was handed to us by `watch`; WNOHANG makes
            // this non-blocking regardless of the child's state.
            let result = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
            if result == pid {
                exited.push((pid, status));
                false
            } else {
                true
            }
        });
        exited
    }
}

struct Pending<T> {
    result: Option<T>,
    signal: Signal,
}

/// Owns the two poll sources plus the bookkeeping that lets several
/// fibers wait on the same signal number or pid concurrently. Drained
/// once per tick from an idle callback, the same wiring as
/// `defer::drain_completions`.
pub(crate) struct ProcessSubsystem {
    signals: Box<dyn SignalSource>,
    children: Box<dyn ChildWait>,
    next_id: u64,
    signal_pending: HashMap<u64, Pending<()>>,
    signal_index: HashMap<i32, Vec<u64>>,
    child_pending: HashMap<u64, Pending<i32>>,
    child_index: HashMap<i32, Vec<u64>>,
}

impl ProcessSubsystem {
    pub(crate) fn new(signals: Box<dyn SignalSource>, children: Box<dyn ChildWait>) -> Self {
        Self {
            signals,
            children,
            next_id: 0,
            signal_pending: HashMap::new(),
            signal_index: HashMap::new(),
            child_pending: HashMap::new(),
            child_index: HashMap::new(),
        }
    }

    fn watch_signal(&mut self, signum: i32) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.signals.watch(signum);
        self.signal_pending.insert(id, Pending { result: None, signal: Signal::new() });
        self.signal_index.entry(signum).or_default().push(id);
        id
    }

    fn watch_child(&mut self, pid: i32) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.children.watch(pid);
        self.child_pending.insert(id, Pending { result: None, signal: Signal::new() });
        self.child_index.entry(pid).or_default().push(id);
        id
    }

    /// Called once per tick from the idle fiber. Polls both sources and
    /// resolves every waiter registered against a signum/pid that just
    /// fired.
    fn drain(&mut self) {
        for signum in self.signals.poll_pending() {
            if let Some(ids) = self.signal_index.remove(&signum) {
                for id in ids {
                    if let Some(pending) = self.signal_pending.get_mut(&id) {
                        pending.result = Some(());
                        pending.signal.signal();
                    }
                }
            }
        }
        for (pid, status) in self.children.poll_exited() {
            if let Some(ids) = self.child_index.remove(&pid) {
                for id in ids {
                    if let Some(pending) = self.child_pending.get_mut(&id) {
                        pending.result = Some(status);
                        pending.signal.signal();
                    }
                }
            }
        }
    }

    fn take_signal_result(&mut self, id: u64) -> Option<()> {
        let pending = self.signal_pending.get_mut(&id)?;
        let result = pending.result.take()?;
        self.signal_pending.remove(&id);
        Some(result)
    }

    fn take_child_result(&mut self, id: u64) -> Option<i32> {
        let pending = self.child_pending.get_mut(&id)?;
        let result = pending.result.take()?;
        self.child_pending.remove(&id);
        Some(result)
    }
}

pub(crate) fn drain(s: &mut Scheduler) {
    s.process_subsystem_mut().drain();
}

/// Suspends the calling fiber until `signum` is next reported by the
/// reactor's installed [`SignalSource`]. With the default [`NoSignals`]
/// source this never returns; a host that cares about real signal
/// delivery installs its own source via
/// [`Reactor::with_process_sources`](crate::scheduler::Reactor::with_process_sources).
pub fn wait_for_signal(signum: i32) {
    let id = scheduler::with(|s| s.process_subsystem_mut().watch_signal(signum));
    loop {
        if scheduler::with(|s| s.process_subsystem_mut().take_signal_result(id)).is_some() {
            return;
        }
        let signal_ptr: *mut Signal = scheduler::with(|s| {
            &mut s.process_subsystem_mut().signal_pending.get_mut(&id).unwrap().signal as *mut _
        });
        // Safety: the pending entry for `id` stays in the map until the
        // `take_signal_result` call above removes it, so the pointer
        // stays valid across this wait; no `Scheduler` borrow spans it.
        unsafe { (*signal_ptr).wait() };
    }
}

/// Suspends the calling fiber until `pid` is reported exited by the
/// reactor's installed [`ChildWait`], returning its raw exit status.
pub fn wait_for_child(pid: i32) -> i32 {
    let id = scheduler::with(|s| s.process_subsystem_mut().watch_child(pid));
    loop {
        if let Some(status) = scheduler::with(|s| s.process_subsystem_mut().take_child_result(id)) {
            return status;
        }
        let signal_ptr: *mut Signal = scheduler::with(|s| {
            &mut s.process_subsystem_mut().child_pending.get_mut(&id).unwrap().signal as *mut _
        });
        // Safety: see `wait_for_signal`.
        unsafe { (*signal_ptr).wait() };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_child_wait_reaps_an_already_exited_child() {
        let pid = unsafe { libc::fork() };
        if pid == 0 {
            unsafe { libc::_exit(7) };
        }
        assert!(pid > 0, "fork failed");

        let mut wait = OsChildWait::default();
        wait.watch(pid);

        let mut status = Vec::new();
        for _ in 0..1000 {
            status = wait.poll_exited();
            if !status.is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].0, pid);
        assert!(libc::WIFEXITED(status[0].1));
        assert_eq!(libc::WEXITSTATUS(status[0].1), 7);
    }

    #[test]
    fn no_signals_never_reports_anything() {
        let mut source = NoSignals;
        source.watch(libc::SIGUSR1);
        assert!(source.poll_pending().is_empty());
    }
}

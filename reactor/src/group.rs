//! Fiber groups: bulk-cancellable sets of fibers.
//!
//! A group is a cheap `Copy` handle; its actual membership lives in the
//! scheduler, the same way a [`FiberHandle`](crate::fiber::FiberHandle)'s
//! slot lives in the fiber table. `spawn_fiber` starts a new member
//! fiber; `run_tracked` instead marks the *calling* fiber as a member for
//! the duration of a closure, so code already running on some other
//! fiber's stack can still be reached by the group's cancellation.

use crate::error::FiberInterrupt;
use crate::fiber::FiberHandle;
use crate::scheduler;

pub(crate) struct GroupState {
    open: bool,
    members: Vec<FiberHandle>,
}

/// A handle to a fiber group opened with [`FiberGroup::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiberGroup(u64);

impl FiberGroup {
    pub fn open() -> Self {
        let id = scheduler::with(|s| {
            let id = s.allocate_group_id();
            s.groups.insert(id, GroupState { open: true, members: Vec::new() });
            id
        });
        Self(id)
    }

    pub fn is_open(&self) -> bool {
        scheduler::with(|s| s.groups.get(&self.0).is_some_and(|g| g.open))
    }

    /// Spawns a member fiber. Returns `None` without spawning anything if
    /// the group has already been closed: a `close()` racing a
    /// `spawn_fiber()` call on another fiber must never leave an
    /// uncancelled member behind, so membership is checked and the fiber
    /// installed atomically with respect to any other scheduler
    /// operation (nothing suspends in between; this all runs inside one
    /// `with` call).
    pub fn spawn_fiber(&self, body: impl FnOnce() + 'static) -> Option<FiberHandle> {
        let group_id = self.0;
        scheduler::with(|s| {
            if !s.groups.get(&group_id).is_some_and(|g| g.open) {
                return None;
            }
            let handle = s.spawn_fiber(Box::new(body));
            s.groups.get_mut(&group_id).unwrap().members.push(handle);
            Some(handle)
        })
    }

    /// Runs `body` directly on the calling fiber, with that fiber
    /// tracked as a group member for the duration — so a concurrent
    /// `close()` can still reach it with
    /// [`FiberInterrupt::GroupExtinction`] while it's suspended somewhere
    /// inside `body`.
    pub fn run_tracked<R>(&self, body: impl FnOnce() -> R) -> R {
        let group_id = self.0;
        let handle = scheduler::with(|s| {
            let handle = s.current_handle();
            if let Some(group) = s.groups.get_mut(&group_id) {
                group.members.push(handle);
            }
            handle
        });

        struct Untrack {
            group_id: u64,
            handle: FiberHandle,
        }
        impl Drop for Untrack {
            fn drop(&mut self) {
                scheduler::with(|s| {
                    if let Some(group) = s.groups.get_mut(&self.group_id) {
                        group.members.retain(|h| *h != self.handle);
                    }
                });
            }
        }
        let _untrack = Untrack { group_id, handle };

        body()
    }

    /// Closes the group: no further `spawn_fiber` calls succeed, and
    /// every current member is sent [`FiberInterrupt::GroupExtinction`].
    /// With `wait_for_exit`, blocks until every member (spawned ones, via
    /// join; `run_tracked` ones, via their untrack-on-drop) has actually
    /// left the group.
    pub fn close(&self, wait_for_exit: bool) {
        let group_id = self.0;
        let members = scheduler::with(|s| {
            let Some(group) = s.groups.get_mut(&group_id) else { return Vec::new() };
            group.open = false;
            group.members.clone()
        });

        for handle in &members {
            let _ = scheduler::throw_in_fiber(
                *handle,
                FiberInterrupt::GroupExtinction { group_id },
                false,
            );
        }

        if wait_for_exit {
            let current = scheduler::current_fiber_handle();
            loop {
                let remaining = scheduler::with(|s| {
                    s.groups.get(&group_id).map(|g| g.members.clone()).unwrap_or_default()
                });
                if remaining.is_empty() {
                    break;
                }
                for handle in remaining {
                    // A closer that is itself a tracked member can't wait
                    // on its own join signal (it would be waiting on a
                    // call frame it's currently inside of); it leaves the
                    // group via its own pending exception instead, which
                    // the `yield_now` below gives a chance to land.
                    if handle == current {
                        continue;
                    }
                    // `join_fiber` only succeeds for spawned members (it
                    // consumes the slot); `run_tracked` members leave the
                    // group via their drop guard instead, which a plain
                    // yield gives a chance to run.
                    if crate::scheduler::get_fiber_state(handle) == crate::fiber::FiberState::None {
                        continue;
                    }
                    let _ = crate::scheduler::join_fiber(handle);
                }
                crate::scheduler::yield_now();
            }
        }

        scheduler::with(|s| {
            s.groups.remove(&group_id);
        });
    }
}

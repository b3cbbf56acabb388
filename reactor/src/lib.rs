//! A single-threaded, cooperative micro-threading reactor.
//!
//! One OS thread multiplexes many lightweight fibers, switching between
//! them only at explicit suspension points (never preemptively). The
//! core provides: fiber spawn/join, a cascading timer wheel, an epoll
//! readiness poller, cross-fiber synchronization primitives, structured
//! cancellation via exception injection, bulk-cancellable fiber groups,
//! a worker-thread pool for offloading blocking work, and a polled seam
//! for signal delivery and subprocess exit notification.
//!
//! ```no_run
//! use reactor::{Reactor, ReactorConfig};
//!
//! let exit_code = Reactor::new(ReactorConfig::new()).run(|| {
//!     reactor::spawn_fiber(|| {
//!         reactor::sleep(std::time::Duration::from_millis(10));
//!         reactor::stop(0);
//!     });
//! });
//! assert_eq!(exit_code, 0);
//! ```
//!
//! # Module map
//!
//! - [`scheduler`] — the ready queue, the context-switch point, and the
//!   free-function API (`spawn_fiber`, `yield_now`, `sleep`, `join_fiber`,
//!   `throw_in_fiber`, ...) that fibers call to talk to the reactor
//!   driving them.
//! - [`fiber`] — fiber identity (`FiberHandle`/`FiberId`) and the
//!   fixed-capacity slot table backing it.
//! - [`timer`] — the cascading timer wheel.
//! - [`queue`] — the intrusive fiber queue every suspending primitive is
//!   built on.
//! - [`sync`] — cross-fiber synchronization: `Signal`, `Event`,
//!   `Semaphore`, `Lock`, `RwLock`, `Barrier`, `BoundedQueue`, `Throttler`,
//!   `ThrottlerOverdraft`.
//! - [`group`] — bulk-cancellable fiber groups.
//! - [`defer`] — the worker-thread pool behind `defer_to_thread`.
//! - [`poller`] — the epoll-backed readiness poller and blocking-call
//!   adapter.
//! - [`process`] — the `SignalSource`/`ChildWait` seam behind
//!   `wait_for_signal`/`wait_for_child`.
//! - [`config`] — [`ReactorConfig`].
//! - [`error`] — the error taxonomy.

pub mod config;
pub mod defer;
pub mod error;
mod exception;
mod fault;
pub mod fiber;
pub mod group;
mod hang_detector;
pub mod poller;
pub mod process;
mod queue;
pub mod scheduler;
pub mod sync;
pub mod test_support;
pub mod timer;

pub use config::ReactorConfig;
pub use defer::defer_to_thread;
pub use error::ReactorError;
pub use fiber::{FiberHandle, FiberId, FiberState};
pub use group::FiberGroup;
pub use process::{wait_for_child, wait_for_signal};
pub use scheduler::{
    boost_fiber_priority, cancel_timer, consider_yield, critical_section, current_fiber_handle,
    current_fiber_id, get_fiber_state, join_fiber, now, register_idle_callback,
    register_recurring_timer, register_timer, request_gc_collection, should_yield, sleep,
    spawn_fiber, stop, throw_in_fiber, yield_now, CriticalSectionGuard, Reactor, Timeout,
};
pub use timer::TimerId;

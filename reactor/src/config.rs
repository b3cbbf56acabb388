use std::time::Duration;

/// Options recognized at reactor open. Every field has a default; use the
/// `with_*` builders to override only what you need.
///
/// This is a plain typed value rather than a file/env-loaded configuration
/// object: the reactor core takes no dependency on a config-file format or
/// CLI parser (those live in the out-of-scope packaging layer, see the
/// crate's module docs).
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Total fiber slots, including the two special ones (main, idle).
    pub(crate) num_fibers: usize,
    /// Requested per-fiber stack size; rounded up to a page, plus one
    /// guard page that is always reserved on top of this.
    pub(crate) fiber_stack_size: usize,
    /// If `Some`, a recurring timer at this period asks the host runtime
    /// to run a GC collection cycle (see [`request_gc_collection`]).
    ///
    /// [`request_gc_collection`]: crate::scheduler::Scheduler::request_gc_collection
    pub(crate) gc_interval: Option<Duration>,
    /// Base granularity of the timer wheel.
    pub(crate) timer_granularity: Duration,
    /// `switch_to_next` warns when a fiber runs uninterrupted for longer
    /// than this.
    pub(crate) hogger_warning_threshold: Duration,
    /// Consulted by `should_yield`/`consider_yield`.
    pub(crate) max_desired_run_time: Duration,
    /// Zero disables hang detection entirely.
    pub(crate) hang_detector_timeout: Duration,
    pub(crate) fault_handlers_enabled: bool,
    /// Capacity of the timer wheel's entry pool.
    pub(crate) num_timers: usize,
    pub(crate) num_threads_in_pool: usize,
    pub(crate) thread_stack_size: usize,
    pub(crate) thread_deferral_enabled: bool,
    /// Test-only: disable the GC-interval timer even when `gc_interval`
    /// is set, so unit tests get deterministic timer-wheel occupancy.
    pub(crate) ut_gc_disabled: bool,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            num_fibers: 256,
            fiber_stack_size: 512 * 1024,
            gc_interval: None,
            timer_granularity: Duration::from_millis(1),
            hogger_warning_threshold: Duration::from_millis(100),
            max_desired_run_time: Duration::from_millis(20),
            hang_detector_timeout: Duration::ZERO,
            fault_handlers_enabled: false,
            num_timers: 4096,
            num_threads_in_pool: 4,
            thread_stack_size: 256 * 1024,
            thread_deferral_enabled: true,
            ut_gc_disabled: false,
        }
    }
}

macro_rules! builder_field {
    ($name:ident: $ty:ty) => {
        #[must_use]
        pub fn $name(mut self, value: $ty) -> Self {
            self.$name = value;
            self
        }
    };
}

impl ReactorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    builder_field!(num_fibers: usize);
    builder_field!(fiber_stack_size: usize);
    builder_field!(gc_interval: Option<Duration>);
    builder_field!(timer_granularity: Duration);
    builder_field!(hogger_warning_threshold: Duration);
    builder_field!(max_desired_run_time: Duration);
    builder_field!(hang_detector_timeout: Duration);
    builder_field!(fault_handlers_enabled: bool);
    builder_field!(num_timers: usize);
    builder_field!(num_threads_in_pool: usize);
    builder_field!(thread_stack_size: usize);
    builder_field!(thread_deferral_enabled: bool);
    builder_field!(ut_gc_disabled: bool);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_only_requested_fields() {
        let cfg = ReactorConfig::new().num_fibers(16).fault_handlers_enabled(true);
        assert_eq!(cfg.num_fibers, 16);
        assert!(cfg.fault_handlers_enabled);
        assert_eq!(cfg.fiber_stack_size, ReactorConfig::default().fiber_stack_size);
    }
}

//! Stackful fibers: guarded stacks plus a minimal symmetric context switch.
//!
//! This crate provides exactly two things, on purpose: a [`Stack`] that
//! allocates a guarded region of memory suitable for running arbitrary code
//! on, and an [`init_stack`]/[`switch`] pair that lets one stack transfer
//! control directly to another.
//!
//! Unlike generator-style fiber crates (e.g. [`corosensei`]), the switch here
//! is *symmetric*: any stack can switch to any other stack, there is no
//! parent/child link, and no value is threaded through the switch except a
//! single `usize`. Ordering, scheduling and data exchange between fibers are
//! the caller's problem — that caller is `reactor`.
//!
//! [`corosensei`]: https://github.com/Amanieu/corosensei

#![cfg_attr(not(test), allow(dead_code))]

mod arch;
mod stack;

pub use stack::{Stack, StackError, MIN_STACK_SIZE};

pub use arch::STACK_ALIGNMENT;

/// Prepares a freshly allocated stack so that the first [`switch`] onto it
/// begins executing `entry(arg)`.
///
/// # Safety
///
/// `stack` must not be in use by any other fiber, and must outlive every
/// [`switch`] performed onto the returned stack pointer.
pub unsafe fn init_stack(stack: &Stack, entry: extern "C" fn(usize) -> !, arg: usize) -> usize {
    // Safety: forwarded to the caller.
    unsafe { arch::init_stack(stack.top(), entry, arg) }
}

/// Switches from the currently running stack to `to`.
///
/// Saves all callee-saved registers and the return address onto the current
/// stack, stores the resulting stack pointer into `*from_sp`, loads `to` into
/// the stack pointer register, and resumes execution there as if returning
/// from a prior call to `switch`.
///
/// The first switch onto a stack prepared by [`init_stack`] does not return
/// from a prior `switch` at all: control instead emerges inside the
/// trampoline that calls `entry`. If `entry` ever returns, the trampoline
/// aborts the process — an entry function that returns or unwinds past the
/// top of its fiber is a fatal programming error, not a value to propagate.
///
/// # Safety
///
/// `from_sp` must point to a valid, writable `usize` that nothing else reads
/// concurrently. `to` must have come from [`init_stack`] or from a previous
/// `switch`'s `from_sp` and must not currently be running anywhere else.
pub unsafe fn switch(from_sp: *mut usize, to: usize) {
    // Safety: forwarded to the caller.
    unsafe { arch::switch(from_sp, to) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::atomic::{AtomicUsize, Ordering};

    thread_local! {
        static CALLER_SP: Cell<usize> = const { Cell::new(0) };
    }

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn count_and_return(_arg: usize) -> ! {
        COUNTER.fetch_add(1, Ordering::SeqCst);
        let mut from = 0usize;
        // Safety: CALLER_SP was populated by the test's own `switch` call
        // before it jumped here, and nothing else resumes this fiber.
        unsafe { switch(&mut from, CALLER_SP.with(Cell::get)) };
        unreachable!("fiber resumed after its caller returned")
    }

    #[test]
    fn switch_round_trips() {
        let stack = Stack::new(MIN_STACK_SIZE).unwrap();
        // Safety: `stack` is exclusively owned by this test.
        let sp = unsafe { init_stack(&stack, count_and_return, 0) };

        // Safety: `sp` was just prepared above and isn't running elsewhere.
        unsafe { switch(CALLER_SP.with(Cell::as_ptr), sp) };

        assert_eq!(COUNTER.load(Ordering::SeqCst), 1);
    }
}

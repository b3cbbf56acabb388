//! x86-64 (System V) context switch.
//!
//! The switch only needs to preserve what the callee-saved half of the ABI
//! promises a caller: `rbx`, `rbp`, `r12`-`r15`, plus the return address.
//! This switch is symmetric and unlinked: nothing here assumes a
//! caller/callee relationship between the two stacks, so there is no
//! parent-link bookkeeping to maintain across suspend points.

use core::arch::{asm, naked_asm};

pub const STACK_ALIGNMENT: usize = 16;

/// Prepares `top` (the highest address of a stack growing down) so that the
/// first [`switch`] onto the returned stack pointer enters `trampoline`,
/// which in turn calls `entry(arg)`.
///
/// # Safety
/// `top` must be 16-byte aligned and point at a region of writable memory
/// large enough to hold the seven words this function pushes.
pub unsafe fn init_stack(top: usize, entry: extern "C" fn(usize) -> !, arg: usize) -> usize {
    // Safety: forwarded to the caller; `top` is treated as a raw stack
    // pointer we push onto, exactly as `switch`'s prologue would.
    unsafe {
        let mut sp = top as *mut usize;

        // Return address for the `ret` at the end of `switch`'s epilogue:
        // the very first "resume" of this stack lands here.
        sp = sp.sub(1);
        sp.write(trampoline as usize);

        // Placeholders for rbx/rbp, restored (to zero) by the first switch.
        sp = sp.sub(1);
        sp.write(0);
        sp = sp.sub(1);
        sp.write(0);

        // r12/r13 double as the argument registers for `trampoline`, since
        // nothing else threads a value through the very first switch.
        sp = sp.sub(1);
        sp.write(entry as usize);
        sp = sp.sub(1);
        sp.write(arg);

        // r14/r15 placeholders.
        sp = sp.sub(1);
        sp.write(0);
        sp = sp.sub(1);
        sp.write(0);

        sp as usize
    }
}

/// First-entry trampoline. Reached via `ret` from [`switch`]'s epilogue with
/// `r12` holding the entry function and `r13` holding its argument — see the
/// push order in [`init_stack`].
#[unsafe(naked)]
unsafe extern "C" fn trampoline() -> ! {
    naked_asm! {
        // r12/r13 were just restored by switch()'s epilogue.
        "mov rdi, r13",
        "call r12",
        // `entry` is `-> !`; returning here means a fiber's entry function
        // returned or unwound past the trampoline, which is a fatal
        // programming error (see the crate-level docs on `switch`).
        "ud2",
    }
}

/// Saves callee-saved registers and the return address on the current
/// stack, stores the resulting stack pointer into `*from_sp`, and resumes
/// execution on `to` as if returning from this same function.
///
/// # Safety
/// See [`crate::switch`].
pub unsafe fn switch(from_sp: *mut usize, to: usize) {
    // Safety: inline assembly implementing the documented contract.
    unsafe {
        asm!(
            "push rbx",
            "push rbp",
            "push r12",
            "push r13",
            "push r14",
            "push r15",
            "mov [{from}], rsp",
            "mov rsp, {to}",
            "pop r15",
            "pop r14",
            "pop r13",
            "pop r12",
            "pop rbp",
            "pop rbx",
            from = in(reg) from_sp,
            to = in(reg) to,
            // Every general-purpose register may be clobbered by whatever
            // runs on the other side of the switch.
            out("rax") _, out("rcx") _, out("rdx") _, out("rsi") _, out("rdi") _,
            out("r8") _, out("r9") _, out("r10") _, out("r11") _,
            clobber_abi("C"),
        );
    }
}

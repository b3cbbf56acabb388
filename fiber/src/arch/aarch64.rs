//! AArch64 (AAPCS64) context switch. See `x86_64.rs` for the general shape;
//! this just swaps in AArch64's callee-saved set (`x19`-`x28`, `x29`/`x30`).

use core::arch::{asm, naked_asm};

pub const STACK_ALIGNMENT: usize = 16;

/// # Safety
/// See the x86-64 implementation; same contract, AArch64 register file.
pub unsafe fn init_stack(top: usize, entry: extern "C" fn(usize) -> !, arg: usize) -> usize {
    // Safety: forwarded to the caller.
    unsafe {
        let mut sp = top as *mut usize;

        // `switch`'s prologue stores six register pairs with `stp rA, rB,
        // [sp, #-16]!`, which lands rA at the lower address of the pair and
        // rB at the higher one, pair-by-pair in the order x19/x20 (highest
        // overall) down to x29/x30 (lowest, i.e. the final stack pointer).
        // Replicate that layout with plain word pushes: push rB then rA.
        let mut push = |val: usize| {
            sp = sp.sub(1);
            sp.write(val);
        };

        // x19/x20 double as entry/arg for `trampoline`.
        push(arg);
        push(entry as usize);
        push(0); // x22
        push(0); // x21
        push(0); // x24
        push(0); // x23
        push(0); // x26
        push(0); // x25
        push(0); // x28
        push(0); // x27
        // x30 (lr): where the first switch-in "returns" to; x29 (fp)
        // placeholder ends up at the lowest address, matching the stack
        // pointer `switch` will be handed.
        push(trampoline as usize);
        push(0);

        sp as usize
    }
}

#[unsafe(naked)]
unsafe extern "C" fn trampoline() -> ! {
    naked_asm! {
        "mov x0, x20",
        "blr x19",
        "udf #0",
    }
}

/// # Safety
/// See [`crate::switch`].
pub unsafe fn switch(from_sp: *mut usize, to: usize) {
    // Safety: inline assembly implementing the documented contract.
    unsafe {
        asm!(
            "stp x19, x20, [sp, #-16]!",
            "stp x21, x22, [sp, #-16]!",
            "stp x23, x24, [sp, #-16]!",
            "stp x25, x26, [sp, #-16]!",
            "stp x27, x28, [sp, #-16]!",
            "stp x29, x30, [sp, #-16]!",
            "mov x9, sp",
            "str x9, [{from}]",
            "mov sp, {to}",
            "ldp x29, x30, [sp], #16",
            "ldp x27, x28, [sp], #16",
            "ldp x25, x26, [sp], #16",
            "ldp x23, x24, [sp], #16",
            "ldp x21, x22, [sp], #16",
            "ldp x19, x20, [sp], #16",
            from = in(reg) from_sp,
            to = in(reg) to,
            out("x9") _,
            clobber_abi("C"),
        );
    }
}

//! Best-effort fault handlers for fatal signals.
//!
//! Installed only when [`ReactorConfig::fault_handlers_enabled`](
//! crate::config::ReactorConfig) asks for them. The handler writes a
//! fixed, allocation-free message to stderr with a raw `write(2)` (the
//! only kind of I/O that's actually safe from inside a signal handler),
//! restores the signal's default disposition, and re-raises it so the
//! process still exits/core-dumps the way it would have without this
//! crate installed at all.

const WATCHED: [libc::c_int; 3] = [libc::SIGSEGV, libc::SIGBUS, libc::SIGILL];

extern "C" fn handler(signum: libc::c_int) {
    let msg: &[u8] = match signum {
        s if s == libc::SIGSEGV => b"reactor: fatal signal SIGSEGV\n",
        s if s == libc::SIGBUS => b"reactor: fatal signal SIGBUS\n",
        s if s == libc::SIGILL => b"reactor: fatal signal SIGILL\n",
        _ => b"reactor: fatal signal\n",
    };
    unsafe {
        libc::write(libc::STDERR_FILENO, msg.as_ptr().cast(), msg.len());
        let mut default: libc::sigaction = std::mem::zeroed();
        default.sa_sigaction = libc::SIG_DFL;
        libc::sigaction(signum, &default, std::ptr::null_mut());
        libc::raise(signum);
    }
}

/// Installs handlers for `SIGSEGV`/`SIGBUS`/`SIGILL`. Idempotent; called
/// once from [`Reactor::run`](crate::scheduler::Reactor::run).
pub(crate) fn install() {
    for &signum in &WATCHED {
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = handler as usize;
            action.sa_flags = libc::SA_RESETHAND;
            libc::sigemptyset(&mut action.sa_mask);
            libc::sigaction(signum, &action, std::ptr::null_mut());
        }
    }
}

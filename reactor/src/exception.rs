//! Exception injection: the pending-exception slot every fiber carries and
//! the machinery that throws it in on the next switch.

use std::any::Any;
use std::fmt;

/// An exception queued for delivery into a fiber on its next switch-in.
///
/// Stored as a type-erased boxed payload (anything `Any + Send`) so that
/// both the core's own sentinels (`ReactorExit`, `FiberInterrupt`) and
/// application-defined exception types can be injected uniformly; the
/// fiber runner downcasts it back to a concrete type when delivering it.
pub struct PendingException {
    payload: Box<dyn Any + Send>,
    /// Set when the injector asked for the traceback to be rewritten to
    /// the target fiber's current suspend point (`EXCEPTION_BT`).
    pub rewrite_backtrace: bool,
}

impl fmt::Debug for PendingException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingException")
            .field("rewrite_backtrace", &self.rewrite_backtrace)
            .finish_non_exhaustive()
    }
}

impl PendingException {
    pub fn new<E: Any + Send + 'static>(exc: E, rewrite_backtrace: bool) -> Self {
        Self { payload: Box::new(exc), rewrite_backtrace }
    }

    /// Downcasts and unwinds the current fiber with this exception as the
    /// panic payload. Called from the context-switch epilogue once control
    /// has returned to the destination fiber.
    pub fn throw(self) -> ! {
        std::panic::resume_unwind(self.payload);
    }

    pub fn downcast_ref<E: Any>(&self) -> Option<&E> {
        self.payload.downcast_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downcast_round_trips() {
        let pending = PendingException::new(42i32, false);
        assert_eq!(pending.downcast_ref::<i32>(), Some(&42));
        assert_eq!(pending.downcast_ref::<&str>(), None);
    }
}

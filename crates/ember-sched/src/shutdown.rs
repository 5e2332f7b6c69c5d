use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

/// Identifies why the machine shut down. Transmitted to the host as a
/// `static_string_id`; ids below 32 are reserved for the scheduler core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShutdownReason(pub u16);

impl ShutdownReason {
    /// The sentinel timer was dispatched: the timer list is corrupt.
    pub const SENTINEL_TIMER_CALLED: Self = Self(1);
    /// A timer was added with a waketime already in the past.
    pub const TIMER_TOO_CLOSE: Self = Self(2);
    /// The dispatch loop fell more than 100 ms behind its timers.
    pub const RESCHEDULED_TIMER_IN_PAST: Self = Self(3);
    /// `clear_shutdown` was called while not shut down.
    pub const SHUTDOWN_CLEARED: Self = Self(4);

    pub fn static_string_id(self) -> u16 {
        self.0
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::SENTINEL_TIMER_CALLED => "sentinel timer called",
            Self::TIMER_TOO_CLOSE => "Timer too close",
            Self::RESCHEDULED_TIMER_IN_PAST => "Rescheduled timer in the past",
            Self::SHUTDOWN_CLEARED => "Shutdown cleared when not shutdown",
            _ => "host-defined shutdown",
        }
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.describe(), self.0)
    }
}

/// Panic payload carrying a shutdown out to the landing pad.
///
/// The type is private to this crate, so arbitrary callers cannot catch the
/// transfer: only [`catch_shutdown`] can resolve it.
struct ShutdownSignal {
    reason: ShutdownReason,
}

/// Forces the machine to run its shutdown handler immediately.
///
/// This is a non-local transfer: the call never returns, and control resumes
/// at the task runner's landing pad. Must only be called from the scheduler's
/// own execution context.
pub fn shutdown(reason: ShutdownReason) -> ! {
    tracing::debug!(%reason, "shutdown requested");
    panic::panic_any(ShutdownSignal { reason });
}

/// Runs `f`, converting a [`shutdown`] transfer into an `Err`.
///
/// Panics other than the shutdown signal are propagated unchanged.
pub(crate) fn catch_shutdown<R>(f: impl FnOnce() -> R) -> Result<R, ShutdownReason> {
    install_signal_silencer();
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(payload) => match payload.downcast::<ShutdownSignal>() {
            Ok(signal) => Err(signal.reason),
            Err(other) => panic::resume_unwind(other),
        },
    }
}

/// Keeps the default panic hook from printing a backtrace for the shutdown
/// signal, which is an ordinary control transfer rather than a fault.
fn install_signal_silencer() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if info.payload().downcast_ref::<ShutdownSignal>().is_none() {
                previous(info);
            }
        }));
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catch_shutdown_resolves_the_signal() {
        let result = catch_shutdown(|| -> () { shutdown(ShutdownReason(7)) });
        assert_eq!(result, Err(ShutdownReason(7)));
    }

    #[test]
    fn ordinary_results_pass_through() {
        assert_eq!(catch_shutdown(|| 42), Ok(42));
    }

    #[test]
    fn foreign_panics_are_not_swallowed() {
        let caught = panic::catch_unwind(|| catch_shutdown(|| panic!("unrelated")));
        assert!(caught.is_err());
    }

    #[test]
    fn core_reasons_have_descriptions() {
        assert_eq!(
            ShutdownReason::TIMER_TOO_CLOSE.describe(),
            "Timer too close"
        );
        assert_eq!(ShutdownReason(999).describe(), "host-defined shutdown");
    }
}

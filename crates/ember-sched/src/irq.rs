use std::thread;
use std::time::Duration;

/// Saved interrupt state returned by [`IrqControl::save`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IrqToken(pub u8);

/// Interrupt-control capability.
///
/// The scheduler brackets every critical section (timer queue, wake flags,
/// shutdown status) with `save`/`restore` or `disable`/`enable` even though
/// the host simulation never takes an interrupt, so that a port to an
/// interrupt-capable target only has to supply a different implementation.
/// The invariant the brackets preserve: the timer queue, the wake-timers
/// flag, and the shutdown status are never observed in an intermediate state.
pub trait IrqControl {
    fn save(&mut self) -> IrqToken;
    fn restore(&mut self, token: IrqToken);
    fn disable(&mut self);
    fn enable(&mut self);

    /// Idle briefly while waiting for work; must return promptly.
    /// `wake_pending` is true when a timer dispatch is already due.
    fn wait(&mut self, wake_pending: bool);
}

/// Interrupt stubs for the single-threaded host simulation: all control
/// operations are no-ops, and waiting sleeps the process for a microsecond
/// to keep the idle loop from spinning the host CPU.
#[derive(Debug, Default)]
pub struct SimIrq;

impl IrqControl for SimIrq {
    fn save(&mut self) -> IrqToken {
        IrqToken(0)
    }

    fn restore(&mut self, _token: IrqToken) {}

    fn disable(&mut self) {}

    fn enable(&mut self) {}

    fn wait(&mut self, wake_pending: bool) {
        if !wake_pending {
            thread::sleep(Duration::from_micros(1));
        }
    }
}

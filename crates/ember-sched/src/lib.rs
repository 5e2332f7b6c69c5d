//! Timer queue, dispatch loop and cooperative task runner for the ember
//! firmware simulator.
//!
//! The scheduler owns a waketime-ordered list of software timers and a
//! cooperative task loop. Timer callbacks run on the task loop's execution
//! context; "interrupts" are a compile-time no-op capability ([`IrqControl`])
//! kept at every critical section so the code stays portable to targets with
//! real interrupts. Fatal conditions never return an error: they transfer
//! control to the shutdown landing pad (see [`shutdown`]).

mod hooks;
mod irq;
mod sched;
mod shutdown;
mod timers;
mod wake;

pub use hooks::{Hooks, Message, MessageSink, NullHooks, NullSink};
pub use irq::{IrqControl, IrqToken, SimIrq};
pub use sched::{
    Dispatch, SchedState, Scheduler, TimerFn, TIMER_IDLE_REPEAT_COUNT, TIMER_MIN_TRY_TICKS,
    TIMER_REPEAT_COUNT,
};
pub use shutdown::{shutdown, ShutdownReason};
pub use timers::TimerId;
pub use wake::{Signals, TaskWake};

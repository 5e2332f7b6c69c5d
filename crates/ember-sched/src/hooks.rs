use crate::sched::SchedState;

/// Host-supplied function registries and statistics hook.
///
/// The scheduler core treats these as opaque: `run_initfuncs` runs once
/// before the task loop starts, `run_taskfuncs` runs once per task-loop
/// iteration, `run_shutdownfuncs` runs from the shutdown handler, and
/// `stats_update` receives the tick range spent on the iteration.
pub trait Hooks {
    fn run_initfuncs(&mut self, sched: &mut SchedState);
    fn run_taskfuncs(&mut self, sched: &mut SchedState);
    fn run_shutdownfuncs(&mut self, sched: &mut SchedState);
    fn stats_update(&mut self, sched: &mut SchedState, start: u32, cur: u32);
}

/// Hooks implementation that does nothing. Useful for tests and for
/// embedders that drive the dispatcher directly.
#[derive(Debug, Default)]
pub struct NullHooks;

impl Hooks for NullHooks {
    fn run_initfuncs(&mut self, _sched: &mut SchedState) {}
    fn run_taskfuncs(&mut self, _sched: &mut SchedState) {}
    fn run_shutdownfuncs(&mut self, _sched: &mut SchedState) {}
    fn stats_update(&mut self, _sched: &mut SchedState, _start: u32, _cur: u32) {}
}

/// Outbound messages the scheduler core and the standard task set emit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Message {
    /// The task loop is about to start.
    Starting,
    /// The machine entered emergency stop at tick `clock`.
    Shutdown { clock: u32, static_string_id: u16 },
    /// Reply to a host query for the last shutdown reason.
    IsShutdown { static_string_id: u16 },
    /// Task-loop statistics: iteration count, summed ticks, and the scaled
    /// sum of squared ticks.
    Stats { count: u32, sum: u32, sumsq: u32 },
    /// Reply to a host clock query.
    Clock { clock: u32 },
}

/// Sink for outbound messages, implemented by the host transport.
pub trait MessageSink {
    fn send(&mut self, msg: Message);
}

/// Sink that drops every message.
#[derive(Debug, Default)]
pub struct NullSink;

impl MessageSink for NullSink {
    fn send(&mut self, _msg: Message) {}
}

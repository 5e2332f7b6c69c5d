use ember_sched::{Hooks, SchedState};

use crate::stats::LoopStats;

pub type HookFn = Box<dyn FnMut(&mut SchedState)>;

/// Init/task/shutdown function registries, run in registration order.
///
/// The firmware equivalent builds these tables at link time; the simulator
/// populates them during setup and installs the registry as the scheduler's
/// hooks before entering the task loop.
#[derive(Default)]
pub struct FuncRegistry {
    initfuncs: Vec<HookFn>,
    taskfuncs: Vec<HookFn>,
    shutdownfuncs: Vec<HookFn>,
    stats: LoopStats,
}

impl FuncRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_init(&mut self, func: impl FnMut(&mut SchedState) + 'static) {
        self.initfuncs.push(Box::new(func));
    }

    pub fn register_task(&mut self, func: impl FnMut(&mut SchedState) + 'static) {
        self.taskfuncs.push(Box::new(func));
    }

    pub fn register_shutdown(&mut self, func: impl FnMut(&mut SchedState) + 'static) {
        self.shutdownfuncs.push(Box::new(func));
    }
}

impl Hooks for FuncRegistry {
    fn run_initfuncs(&mut self, sched: &mut SchedState) {
        for func in &mut self.initfuncs {
            func(sched);
        }
    }

    fn run_taskfuncs(&mut self, sched: &mut SchedState) {
        for func in &mut self.taskfuncs {
            func(sched);
        }
    }

    fn run_shutdownfuncs(&mut self, sched: &mut SchedState) {
        for func in &mut self.shutdownfuncs {
            func(sched);
        }
    }

    fn stats_update(&mut self, sched: &mut SchedState, start: u32, cur: u32) {
        self.stats.update(sched, start, cur);
    }
}

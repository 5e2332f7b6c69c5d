use std::sync::Arc;

use ember_time::{from_us, is_before, TickClock, TimeSource};
use tracing::{debug, info, trace};

use crate::hooks::{Hooks, Message, MessageSink};
use crate::irq::{IrqControl, SimIrq};
use crate::shutdown::{catch_shutdown, shutdown, ShutdownReason};
use crate::timers::{TimerId, TimerList};
use crate::wake::{
    Signals, SHUTDOWN_DONE, SHUTDOWN_IN_PROGRESS, SHUTDOWN_NORMAL, TS_REQUESTED, TS_RUNNING,
};

/// Outcome of a timer callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// The timer is finished; remove it from the queue.
    Done,
    /// Keep the timer queued at its (possibly updated) waketime.
    Reschedule,
}

/// A timer callback. It may update its own waketime through the scheduler
/// state before returning [`Dispatch::Reschedule`], and may add or delete
/// other timers and wake tasks.
pub type TimerFn = Box<dyn FnMut(&mut SchedState, TimerId) -> Dispatch>;

/// Timers dispatched per wakeup before the loop checks how late it runs.
pub const TIMER_REPEAT_COUNT: u32 = 20;
/// Relaxed dispatch budget used while the task loop is idle.
pub const TIMER_IDLE_REPEAT_COUNT: u32 = 100;
/// Don't schedule a sleep for a timer closer than this; busy-wait instead.
pub const TIMER_MIN_TRY_TICKS: u32 = from_us(2);

/// Scheduler state reachable from timer callbacks and task functions: the
/// timer queue, the tick clock, status flags, the outbound sink, and the
/// interrupt capability. Callback tables live outside this struct, in
/// [`Scheduler`], so a running callback can be handed `&mut SchedState`.
pub struct SchedState {
    timers: TimerList,
    clock: TickClock,
    signals: Arc<Signals>,
    sink: Box<dyn MessageSink>,
    irq: Box<dyn IrqControl>,
}

impl SchedState {
    fn new(
        source: Box<dyn TimeSource>,
        sink: Box<dyn MessageSink>,
        irq: Box<dyn IrqControl>,
    ) -> Self {
        let signals = Arc::new(Signals::default());
        signals.timer_kick();
        Self {
            timers: TimerList::new(),
            clock: TickClock::new(source),
            signals,
            sink,
            irq,
        }
    }

    /// Samples the clock, returning the current tick counter value.
    pub fn read_time(&mut self) -> u32 {
        self.clock.read_time()
    }

    /// The most recent value returned by [`SchedState::read_time`].
    pub fn last_read_time(&self) -> u32 {
        self.clock.last_read_time()
    }

    /// See [`TickClock::check_periodic`].
    pub fn check_periodic(&self, deadline: &mut u32) -> bool {
        self.clock.check_periodic(deadline)
    }

    /// Schedules `id` to fire at `waketime`.
    ///
    /// If the timer becomes the new queue head, the head is swapped through
    /// the `deleted` trampoline and a dispatch wakeup is requested; a head
    /// waketime already in the past shuts the machine down.
    pub fn add_timer(&mut self, id: TimerId, waketime: u32) {
        let token = self.irq.save();
        self.timers.set_waketime(id, waketime);
        let head = self.timers.head();
        if is_before(waketime, self.timers.waketime(head)) {
            if is_before(waketime, self.read_time()) {
                self.try_shutdown(ShutdownReason::TIMER_TOO_CLOSE);
            }
            // This timer runs before every other scheduled timer: swap in a
            // new head through the trampoline so an in-flight dispatch still
            // sees a well-formed list.
            if head == TimerId::DELETED {
                let next = self.timers.next(TimerId::DELETED);
                self.timers.set_next(id, next);
            } else {
                self.timers.set_next(id, Some(head));
            }
            self.timers.set_waketime(TimerId::DELETED, waketime);
            self.timers.set_next(TimerId::DELETED, Some(id));
            self.timers.set_head(TimerId::DELETED);
            self.signals.timer_kick();
        } else {
            self.timers.insert_from(head, id, waketime);
        }
        self.irq.restore(token);
    }

    /// Removes `id` from the queue. Safe to call for a timer that is not
    /// queued, including from within its own callback.
    pub fn del_timer(&mut self, id: TimerId) {
        let token = self.irq.save();
        self.timers.del(id);
        self.irq.restore(token);
    }

    pub fn waketime(&self, id: TimerId) -> u32 {
        self.timers.waketime(id)
    }

    /// Updates the waketime recorded for `id` without re-sorting the queue.
    /// Only meaningful from the timer's own callback just before returning
    /// [`Dispatch::Reschedule`].
    pub fn set_waketime(&mut self, id: TimerId, waketime: u32) {
        self.timers.set_waketime(id, waketime);
    }

    pub fn timer_is_queued(&self, id: TimerId) -> bool {
        self.timers.is_queued(id)
    }

    /// Drops all user timers and requests a dispatch wakeup.
    pub fn reset_timers(&mut self) {
        let token = self.irq.save();
        self.timers.reset();
        self.signals.timer_kick();
        self.irq.restore(token);
    }

    /// Marks that at least one task is ready to run.
    pub fn wake_tasks(&self) {
        self.signals.wake_tasks();
    }

    /// Shared handle to the status flags, for wake flags and external threads.
    pub fn signals(&self) -> Arc<Signals> {
        self.signals.clone()
    }

    pub fn is_shutdown(&self) -> bool {
        self.signals.is_shutdown()
    }

    /// Shuts the machine down unless it already is.
    pub fn try_shutdown(&self, reason: ShutdownReason) {
        if !self.signals.is_shutdown() {
            shutdown(reason);
        }
    }

    /// Leaves the shutdown state. Calling this while not shut down is itself
    /// a fatal error; during shutdown processing it is ignored.
    pub fn clear_shutdown(&self) {
        match self.signals.shutdown_status() {
            SHUTDOWN_NORMAL => shutdown(ShutdownReason::SHUTDOWN_CLEARED),
            SHUTDOWN_IN_PROGRESS => {}
            _ => self.signals.set_shutdown_status(SHUTDOWN_NORMAL),
        }
    }

    /// Reports the last shutdown reason to the host.
    pub fn report_shutdown(&mut self) {
        let id = self.signals.shutdown_reason().static_string_id();
        self.send(Message::IsShutdown {
            static_string_id: id,
        });
    }

    /// Emits a message through the host sink.
    pub fn send(&mut self, msg: Message) {
        self.sink.send(msg);
    }

    /// The periodic timer keeps the queue non-empty and the sentinel anchored,
    /// and makes sure tasks run at least every 100 ms.
    fn periodic_event(&mut self) -> Dispatch {
        self.signals.wake_tasks();
        let waketime = self
            .timers
            .waketime(TimerId::PERIODIC)
            .wrapping_add(from_us(100_000));
        self.timers.set_waketime(TimerId::PERIODIC, waketime);
        self.timers
            .set_waketime(TimerId::SENTINEL, waketime.wrapping_add(0x8000_0000));
        Dispatch::Reschedule
    }
}

impl std::fmt::Debug for SchedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedState")
            .field("timers", &self.timers)
            .field("clock", &self.clock)
            .field("signals", &self.signals)
            .finish_non_exhaustive()
    }
}

/// The cooperative scheduler: timer dispatch plus the main task loop.
pub struct Scheduler {
    state: SchedState,
    handlers: Vec<Option<TimerFn>>,
    hooks: Box<dyn Hooks>,
}

impl Scheduler {
    pub fn new(
        source: Box<dyn TimeSource>,
        hooks: Box<dyn Hooks>,
        sink: Box<dyn MessageSink>,
    ) -> Self {
        Self::with_irq(source, hooks, sink, Box::new(SimIrq))
    }

    pub fn with_irq(
        source: Box<dyn TimeSource>,
        hooks: Box<dyn Hooks>,
        sink: Box<dyn MessageSink>,
        irq: Box<dyn IrqControl>,
    ) -> Self {
        Self {
            state: SchedState::new(source, sink, irq),
            handlers: vec![None, None, None],
            hooks,
        }
    }

    /// Replaces the host hooks. Hosts typically construct the scheduler
    /// first (so wake flags can be tied to its [`Signals`]), then install
    /// their populated registries before calling [`Scheduler::run`].
    pub fn set_hooks(&mut self, hooks: Box<dyn Hooks>) {
        self.hooks = hooks;
    }

    pub fn state(&self) -> &SchedState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SchedState {
        &mut self.state
    }

    /// Allocates a timer record with the given callback. The returned id is
    /// the owner's handle for `add_timer`/`del_timer`. Registration happens
    /// during host setup, before the task loop runs.
    pub fn register_timer(
        &mut self,
        func: impl FnMut(&mut SchedState, TimerId) -> Dispatch + 'static,
    ) -> TimerId {
        let id = self.state.timers.alloc();
        if self.handlers.len() <= id.index() {
            self.handlers.resize_with(id.index() + 1, || None);
        }
        self.handlers[id.index()] = Some(Box::new(func));
        id
    }

    /// Removes the timer from the queue and frees its record.
    pub fn unregister_timer(&mut self, id: TimerId) {
        self.state.del_timer(id);
        self.handlers[id.index()] = None;
        self.state.timers.release(id);
    }

    /// Dispatches the queue head and re-places or removes it according to the
    /// callback's outcome. Returns the new head's waketime.
    fn dispatch_one(&mut self) -> u32 {
        let t = self.state.timers.head();
        let res = match t {
            TimerId::PERIODIC => self.state.periodic_event(),
            TimerId::SENTINEL => shutdown(ShutdownReason::SENTINEL_TIMER_CALLED),
            TimerId::DELETED => Dispatch::Done,
            _ => {
                let handler = self.handlers[t.index()]
                    .as_mut()
                    .expect("queued timer has no registered callback");
                handler(&mut self.state, t)
            }
        };

        let updated_waketime = self.state.timers.waketime(t);
        let next = self
            .state
            .timers
            .next(t)
            .expect("dispatched timer had no successor");
        let mut next_waketime = updated_waketime;
        match res {
            Dispatch::Done => {
                next_waketime = self.state.timers.waketime(next);
                self.state.timers.set_head(next);
                if self.state.timers.last_insert() == t {
                    self.state.timers.set_last_insert(next);
                }
            }
            Dispatch::Reschedule => {
                if !is_before(updated_waketime, self.state.timers.waketime(next)) {
                    // No longer ahead of its successor: unlink and re-insert,
                    // starting the walk from the last insertion point when
                    // that saves a walk from the head.
                    next_waketime = self.state.timers.waketime(next);
                    self.state.timers.set_head(next);
                    let mut pos = self.state.timers.last_insert();
                    if is_before(updated_waketime, self.state.timers.waketime(pos)) {
                        pos = self.state.timers.head();
                    }
                    self.state.timers.insert_from(pos, t, updated_waketime);
                    self.state.timers.set_last_insert(t);
                }
            }
        }
        next_waketime
    }

    /// Runs ready timers until the queue is no longer due.
    ///
    /// Called when a dispatch wakeup is pending. Bounds the work done per
    /// wakeup: after [`TIMER_REPEAT_COUNT`] dispatches the loop checks how
    /// late it is (shutting down past 100 ms), yields to the task loop if
    /// tasks are contending, and otherwise continues with the relaxed
    /// [`TIMER_IDLE_REPEAT_COUNT`] budget.
    fn dispatch_timers(&mut self) {
        let mut repeat_count = TIMER_REPEAT_COUNT;
        let next = loop {
            let next = self.dispatch_one();

            repeat_count -= 1;
            let lrt = self.state.clock.last_read_time();
            if !is_before(lrt, next) && repeat_count != 0 {
                // Next timer already due: run it without the overhead of
                // re-reading the clock.
                continue;
            }

            let now = self.state.read_time();
            let mut diff = next.wrapping_sub(now) as i32;
            if diff > TIMER_MIN_TRY_TICKS as i32 {
                break next;
            }

            if repeat_count == 0 {
                if diff < -(from_us(100_000) as i32) {
                    self.state
                        .try_shutdown(ShutdownReason::RESCHEDULED_TIMER_IN_PAST);
                }
                if self.state.signals.check_set_tasks_busy() {
                    // Tasks are contending; let them run. The wakeup request
                    // stays pending so dispatch resumes on the next poll.
                    trace!("timer dispatch yielding to busy tasks");
                    return;
                }
                repeat_count = TIMER_IDLE_REPEAT_COUNT;
            }

            // Next timer in the near future: wait for it to become ready.
            while diff > 0 {
                diff = next.wrapping_sub(self.state.read_time()) as i32;
            }
        };

        self.state.clock.note_next_wake(next);
        self.state.signals.clear_must_wake_timers();
    }

    /// Polls for pending work the way a timer interrupt would: requests a
    /// dispatch wakeup once wall time passes the projected next-wake point,
    /// then dispatches if a wakeup is pending.
    pub fn irq_poll(&mut self) {
        if self.state.clock.next_wake_due() {
            self.state.signals.timer_kick();
        }
        if self.state.signals.must_wake_timers() {
            self.dispatch_timers();
        }
    }

    /// Idles briefly, then polls. The suspension point of the task loop.
    pub fn irq_wait(&mut self) {
        let pending = self.state.signals.must_wake_timers();
        self.state.irq.wait(pending);
        self.irq_poll();
    }

    /// One iteration of the task loop: poll, sleep until a task is woken,
    /// run task functions, update stats. `start` is the tick the iteration's
    /// stats range begins at; returns the tick the next range begins at.
    fn task_iteration(&mut self, mut start: u32) -> u32 {
        self.irq_poll();
        if self.state.signals.tasks_status() != TS_REQUESTED {
            // Nothing to run: sleep (timers only) until a task is woken.
            // The sleep interval is excluded from the stats range.
            start = start.wrapping_sub(self.state.read_time());
            self.state.irq.disable();
            if self.state.signals.tasks_status() != TS_REQUESTED {
                self.state.signals.set_tasks_idle();
                loop {
                    self.irq_wait();
                    if self.state.signals.tasks_status() == TS_REQUESTED {
                        break;
                    }
                }
            }
            self.state.irq.enable();
            start = start.wrapping_add(self.state.read_time());
        }
        self.state.signals.set_tasks_status(TS_RUNNING);

        self.hooks.run_taskfuncs(&mut self.state);

        let cur = self.state.read_time();
        self.hooks.stats_update(&mut self.state, start, cur);
        cur
    }

    /// The main task loop. Never returns; leaves only through the shutdown
    /// transfer.
    fn run_tasks(&mut self) -> ! {
        let mut start = self.state.read_time();
        loop {
            start = self.task_iteration(start);
        }
    }

    /// Runs a single task-loop iteration under the shutdown landing pad.
    ///
    /// For embedders that own the outer loop (and for tests); [`Scheduler::run`]
    /// is the production entry point. Blocks in the sleep cycle until a task
    /// is woken, like the real loop.
    pub fn run_slice(&mut self) -> Option<ShutdownReason> {
        self.run_protected(|sched| {
            let start = sched.state.read_time();
            sched.task_iteration(start);
        })
    }

    /// Runs `f` under the shutdown landing pad. If `f` (or anything it calls)
    /// invokes [`shutdown`], the shutdown handler runs and the reason is
    /// returned. Used by `run` for the task loop and by embedders that drive
    /// bounded slices of the scheduler.
    pub fn run_protected(&mut self, f: impl FnOnce(&mut Self)) -> Option<ShutdownReason> {
        match catch_shutdown(|| f(self)) {
            Ok(()) => None,
            Err(reason) => {
                self.run_shutdown(reason);
                Some(reason)
            }
        }
    }

    /// Runs init functions, then enters the task loop with the shutdown
    /// landing pad installed.
    pub fn run(&mut self) -> ! {
        self.hooks.run_initfuncs(&mut self.state);
        self.state.send(Message::Starting);
        info!("task loop starting");
        loop {
            self.run_protected(|sched| {
                sched.run_tasks();
            });
        }
    }

    /// The shutdown landing pad body: latch the reason, reset the timer
    /// queue, run host shutdown functions, and notify the host.
    fn run_shutdown(&mut self, reason: ShutdownReason) {
        self.state.irq.disable();
        let cur = self.state.read_time();
        if !self.state.signals.is_shutdown() {
            self.state.signals.set_shutdown_reason(reason);
        }
        self.state
            .signals
            .set_shutdown_status(SHUTDOWN_IN_PROGRESS);
        self.state.reset_timers();
        self.hooks.run_shutdownfuncs(&mut self.state);
        self.state.signals.set_shutdown_status(SHUTDOWN_DONE);
        self.state.irq.enable();

        let latched = self.state.signals.shutdown_reason();
        debug!(reason = %latched, clock = cur, "machine shut down");
        self.state.send(Message::Shutdown {
            clock: cur,
            static_string_id: latched.static_string_id(),
        });
    }
}

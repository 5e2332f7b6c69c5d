//! End-to-end scheduler behavior driven through a fake clock.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use ember_sched::{
    Dispatch, Hooks, Message, MessageSink, NullHooks, SchedState, Scheduler, ShutdownReason,
    TaskWake, TimerId,
};
use ember_time::{from_us, is_before, FakeClock};
use pretty_assertions::assert_eq;

struct Recorder(Rc<RefCell<Vec<Message>>>);

impl MessageSink for Recorder {
    fn send(&mut self, msg: Message) {
        self.0.borrow_mut().push(msg);
    }
}

/// A scheduler on a fake clock, with the periodic timer caught up so the
/// queue head sits ~100 ms ahead of "now".
fn harness() -> (Scheduler, FakeClock, Rc<RefCell<Vec<Message>>>) {
    let fake = FakeClock::new();
    let messages = Rc::new(RefCell::new(Vec::new()));
    let mut sched = Scheduler::new(
        Box::new(fake.clone()),
        Box::new(NullHooks),
        Box::new(Recorder(messages.clone())),
    );
    fake.advance_secs(2);
    sched.irq_poll();
    (sched, fake, messages)
}

fn recording_timer(
    sched: &mut Scheduler,
    order: &Rc<RefCell<Vec<&'static str>>>,
    name: &'static str,
) -> TimerId {
    let order = order.clone();
    sched.register_timer(move |_state, _id| {
        order.borrow_mut().push(name);
        Dispatch::Done
    })
}

#[test]
fn timers_fire_in_waketime_order() {
    let (mut sched, fake, _) = harness();
    let order = Rc::new(RefCell::new(Vec::new()));
    let a = recording_timer(&mut sched, &order, "A");
    let b = recording_timer(&mut sched, &order, "B");
    let c = recording_timer(&mut sched, &order, "C");

    let t = sched.state_mut().read_time();
    sched.state_mut().add_timer(a, t.wrapping_add(1000));
    sched.state_mut().add_timer(b, t.wrapping_add(500));
    sched.state_mut().add_timer(c, t.wrapping_add(2000));

    fake.advance_ns(3000 * 50);
    sched.irq_poll();

    assert_eq!(*order.borrow(), vec!["B", "A", "C"]);
}

#[test]
fn self_rescheduling_timer_stays_queued_once() {
    let (mut sched, fake, _) = harness();
    let fired = Rc::new(Cell::new(0u32));
    let fired2 = fired.clone();
    let x = sched.register_timer(move |state, id| {
        fired2.set(fired2.get() + 1);
        let wt = state.waketime(id).wrapping_add(100);
        state.set_waketime(id, wt);
        Dispatch::Reschedule
    });

    let t = sched.state_mut().read_time();
    sched.state_mut().add_timer(x, t.wrapping_add(100));

    for _ in 0..5 {
        // 101 ticks per round: one firing each, with the next waketime left
        // far enough out that the dispatcher does not busy-wait.
        fake.advance_ns(101 * 50);
        sched.irq_poll();
    }

    assert_eq!(fired.get(), 5);
    assert_eq!(sched.state().waketime(x), t.wrapping_add(600));
    assert!(sched.state().timer_is_queued(x));
}

#[test]
fn dispatch_runs_across_the_counter_wrap() {
    let (mut sched, fake, _) = harness();
    // Walk simulated time forward in 100 ms slices until the 32-bit counter
    // is about to roll over.
    for _ in 0..2137 {
        fake.advance_us(100_000);
        sched.irq_poll();
    }
    let now = sched.state_mut().read_time();
    assert!(now > 0xFFF0_0000, "counter should be close to wrapping");

    assert!(is_before(0xFFFF_FF00, 0x0000_0010));

    let order = Rc::new(RefCell::new(Vec::new()));
    let a = recording_timer(&mut sched, &order, "A");
    let y = recording_timer(&mut sched, &order, "Y");
    sched.state_mut().add_timer(a, 0xFFFF_FF00);
    sched.state_mut().add_timer(y, 0x0000_0010);

    // 50 ms forward crosses the wrap and covers both waketimes.
    fake.advance_us(50_000);
    sched.irq_poll();

    assert_eq!(*order.borrow(), vec!["A", "Y"]);
}

#[test]
fn severely_late_reschedule_is_fatal() {
    let (mut sched, fake, messages) = harness();
    let slept = Rc::new(Cell::new(false));
    let slept2 = slept.clone();
    let fake2 = fake.clone();
    let x = sched.register_timer(move |state, id| {
        if !slept2.get() {
            // Stall the dispatch thread for 200 ms of wall time.
            slept2.set(true);
            fake2.advance_us(200_000);
        }
        let wt = state.read_time().wrapping_sub(from_us(200_000));
        state.set_waketime(id, wt);
        Dispatch::Reschedule
    });

    let t = sched.state_mut().read_time();
    sched.state_mut().add_timer(x, t.wrapping_add(1000));
    fake.advance_ns(1001 * 50);

    let reason = sched.run_protected(|s| s.irq_poll());
    assert_eq!(reason, Some(ShutdownReason::RESCHEDULED_TIMER_IN_PAST));
    assert!(sched.state().is_shutdown());
    assert!(messages.borrow().iter().any(|m| matches!(
        m,
        Message::Shutdown {
            static_string_id: 3,
            ..
        }
    )));
}

#[test]
fn dispatch_yields_to_busy_tasks_after_its_budget() {
    let (mut sched, fake, _) = harness();
    let order = Rc::new(RefCell::new(Vec::new()));
    let ids: Vec<TimerId> = (0..21)
        .map(|_| recording_timer(&mut sched, &order, "t"))
        .collect();

    let t = sched.state_mut().read_time();
    for &id in &ids {
        sched.state_mut().add_timer(id, t.wrapping_add(1000));
    }

    fake.advance_ns(1001 * 50);
    sched.irq_poll();
    // Budget of 20 spent on the head trampoline plus 19 timers; the loop saw
    // the task flag requested and yielded with work remaining.
    assert_eq!(order.borrow().len(), 19);
    assert!(sched.state().timer_is_queued(ids[19]));
    assert!(sched.state().timer_is_queued(ids[20]));

    // The wakeup request stayed pending, so the next poll finishes the queue
    // without a new kick.
    sched.irq_poll();
    assert_eq!(order.borrow().len(), 21);
}

#[test]
fn shutdown_round_trip() {
    let (mut sched, _fake, messages) = harness();

    let reason = sched.run_protected(|s| s.state_mut().try_shutdown(ShutdownReason(7)));
    assert_eq!(reason, Some(ShutdownReason(7)));
    assert!(sched.state().is_shutdown());
    assert!(messages.borrow().iter().any(|m| matches!(
        m,
        Message::Shutdown {
            static_string_id: 7,
            ..
        }
    )));

    sched.state_mut().report_shutdown();
    assert!(messages
        .borrow()
        .iter()
        .any(|m| *m == Message::IsShutdown { static_string_id: 7 }));

    sched.state_mut().clear_shutdown();
    assert!(!sched.state().is_shutdown());

    let reason = sched.run_protected(|s| s.state_mut().clear_shutdown());
    assert_eq!(reason, Some(ShutdownReason::SHUTDOWN_CLEARED));
}

type TaskFn = Box<dyn FnMut(&mut SchedState)>;

struct ListHooks(Rc<RefCell<Vec<TaskFn>>>);

impl Hooks for ListHooks {
    fn run_initfuncs(&mut self, _sched: &mut SchedState) {}
    fn run_taskfuncs(&mut self, sched: &mut SchedState) {
        for func in self.0.borrow_mut().iter_mut() {
            func(sched);
        }
    }
    fn run_shutdownfuncs(&mut self, _sched: &mut SchedState) {}
    fn stats_update(&mut self, _sched: &mut SchedState, _start: u32, _cur: u32) {}
}

#[test]
fn timer_callback_wakes_a_task() {
    let fake = FakeClock::new();
    let tasks: Rc<RefCell<Vec<TaskFn>>> = Rc::new(RefCell::new(Vec::new()));
    let mut sched = Scheduler::new(
        Box::new(fake.clone()),
        Box::new(ListHooks(tasks.clone())),
        Box::new(ember_sched::NullSink),
    );
    fake.advance_secs(1);

    let wake = Arc::new(TaskWake::new(sched.state().signals()));
    let hits = Rc::new(Cell::new(0u32));

    let timer_wake = wake.clone();
    let timer = sched.register_timer(move |_state, _id| {
        timer_wake.wake();
        Dispatch::Done
    });
    {
        let wake = wake.clone();
        let hits = hits.clone();
        tasks.borrow_mut().push(Box::new(move |_sched| {
            if wake.check_wake() {
                hits.set(hits.get() + 1);
            }
        }));
    }

    let now = sched.state_mut().read_time();
    sched.state_mut().add_timer(timer, now.wrapping_add(from_us(100)));

    // Let the loop make progress on its own: every clock read moves
    // simulated time forward 10 us.
    fake.set_auto_advance_ns(10_000);
    for _ in 0..50 {
        sched.run_slice();
        if hits.get() > 0 {
            break;
        }
    }
    assert_eq!(hits.get(), 1);
}

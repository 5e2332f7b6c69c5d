use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::timespec::{Timespec, NSECS_PER_SEC};

/// A monotonic wall-clock source.
///
/// Production code uses [`HostClock`]; tests drive the scheduler
/// deterministically with a [`FakeClock`].
pub trait TimeSource {
    fn now(&self) -> Timespec;
}

/// Monotonic host clock anchored at construction time.
#[derive(Debug)]
pub struct HostClock {
    origin: Instant,
}

impl HostClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for HostClock {
    fn now(&self) -> Timespec {
        let elapsed = self.origin.elapsed();
        Timespec::new(elapsed.as_secs() as i64, elapsed.subsec_nanos() as i64)
    }
}

#[derive(Debug, Default)]
struct FakeState {
    now: Timespec,
    auto_advance_ns: i64,
}

/// Manually driven clock for tests.
///
/// Cloning yields another handle to the same underlying time, so a test can
/// keep a handle while the clock itself is boxed into the scheduler.
///
/// `set_auto_advance_ns` makes every `now()` read advance time, which lets
/// code that busy-waits on the clock make progress under test.
#[derive(Clone, Debug, Default)]
pub struct FakeClock {
    state: Arc<Mutex<FakeState>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance_ns(&self, ns: i64) {
        let mut state = self.state.lock().unwrap();
        state.now = state.now.add_nanos(ns);
    }

    pub fn advance_us(&self, us: i64) {
        self.advance_ns(us * 1_000);
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance_ns(secs * NSECS_PER_SEC);
    }

    pub fn set_auto_advance_ns(&self, ns: i64) {
        self.state.lock().unwrap().auto_advance_ns = ns;
    }
}

impl TimeSource for FakeClock {
    fn now(&self) -> Timespec {
        let mut state = self.state.lock().unwrap();
        let now = state.now;
        let step = state.auto_advance_ns;
        if step != 0 {
            state.now = now.add_nanos(step);
        }
        now
    }
}

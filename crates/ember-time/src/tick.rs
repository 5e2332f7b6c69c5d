use crate::source::TimeSource;
use crate::timespec::{Timespec, NSECS_PER_SEC};

/// Frequency of the simulated hardware clock, in Hz.
///
/// Emitted in the host handshake so an external controller can translate
/// ticks to microseconds.
pub const CLOCK_FREQ: u32 = 20_000_000;

/// Nanoseconds per tick of the simulated clock.
pub const NSECS_PER_TICK: i64 = NSECS_PER_SEC / CLOCK_FREQ as i64;

/// Returns true if `time1` is before `time2`.
///
/// Always use this function to compare tick counters: the counter wraps every
/// `2^32` ticks, so regular comparisons give the wrong answer near a
/// roll-over. The relation is well-defined when the two values are less than
/// `2^31` ticks apart.
#[inline]
pub const fn is_before(time1: u32, time2: u32) -> bool {
    (time1.wrapping_sub(time2) as i32) < 0
}

/// Returns the number of clock ticks in `us` microseconds.
#[inline]
pub const fn from_us(us: u32) -> u32 {
    us.wrapping_mul(CLOCK_FREQ / 1_000_000)
}

/// Converts monotonic wall time to the 32-bit tick counter.
///
/// The counter origin (`start_sec`) is fixed at init to one second past the
/// first clock reading, so counter value 0 corresponds to a well-defined
/// wall time. The struct also tracks the wall-time projection of the next
/// software timer wakeup, used for sleep scheduling.
pub struct TickClock {
    source: Box<dyn TimeSource>,
    /// Wall-clock second that counter value 0 corresponds to.
    start_sec: i64,
    /// Most recent value returned by [`TickClock::read_time`].
    last_read_time: u32,
    /// Tick value of the next software timer wakeup.
    next_wake_counter: u32,
    /// Wall-time projection of `next_wake_counter`.
    next_wake: Timespec,
}

impl TickClock {
    pub fn new(source: Box<dyn TimeSource>) -> Self {
        let cur = source.now();
        let mut clock = Self {
            source,
            start_sec: cur.sec + 1,
            last_read_time: 0,
            next_wake_counter: 0,
            next_wake: cur,
        };
        clock.next_wake_counter = clock.ticks_from_timespec(cur);
        clock
    }

    fn ticks_from_timespec(&self, ts: Timespec) -> u32 {
        ((ts.sec - self.start_sec) * CLOCK_FREQ as i64 + ts.nsec / NSECS_PER_TICK) as u32
    }

    /// Projects an internal tick counter value back to wall time, relative to
    /// the recorded next-wake pair.
    pub fn timespec_from_ticks(&self, time: u32) -> Timespec {
        let counter_diff = time.wrapping_sub(self.next_wake_counter) as i32;
        self.next_wake
            .add_nanos(counter_diff as i64 * NSECS_PER_TICK)
    }

    /// Samples the wall clock and returns the current tick counter value,
    /// caching it for [`TickClock::last_read_time`].
    pub fn read_time(&mut self) -> u32 {
        let t = self.ticks_from_timespec(self.source.now());
        self.last_read_time = t;
        t
    }

    /// The most recent value returned by [`TickClock::read_time`].
    pub fn last_read_time(&self) -> u32 {
        self.last_read_time
    }

    /// Checks if the given deadline has passed, judged by the cached clock.
    ///
    /// Returns false if `*deadline` is still in the future. Otherwise bumps
    /// `*deadline` two seconds past the cached time and returns true.
    pub fn check_periodic(&self, deadline: &mut u32) -> bool {
        let lrt = self.last_read_time;
        if is_before(lrt, *deadline) {
            return false;
        }
        *deadline = lrt.wrapping_add(from_us(2_000_000));
        true
    }

    /// Records the tick value of the next software timer along with its wall
    /// time projection.
    pub fn note_next_wake(&mut self, ticks: u32) {
        self.next_wake = self.timespec_from_ticks(ticks);
        self.next_wake_counter = ticks;
    }

    /// Returns true once wall time has passed the recorded next-wake point.
    pub fn next_wake_due(&self) -> bool {
        self.next_wake.is_before(self.source.now())
    }
}

impl std::fmt::Debug for TickClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickClock")
            .field("start_sec", &self.start_sec)
            .field("last_read_time", &self.last_read_time)
            .field("next_wake_counter", &self.next_wake_counter)
            .field("next_wake", &self.next_wake)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FakeClock;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn clock_pair() -> (TickClock, FakeClock) {
        let fake = FakeClock::new();
        let clock = TickClock::new(Box::new(fake.clone()));
        (clock, fake)
    }

    #[test]
    fn from_us_scales_by_clock_freq() {
        assert_eq!(from_us(0), 0);
        assert_eq!(from_us(1), CLOCK_FREQ / 1_000_000);
        assert_eq!(from_us(1_000_000), CLOCK_FREQ);
    }

    #[test]
    fn is_before_handles_wrap() {
        assert!(is_before(0xFFFF_FF00, 0x0000_0010));
        assert!(!is_before(0x0000_0010, 0xFFFF_FF00));
        assert!(!is_before(5, 5));
    }

    #[test]
    fn counter_zero_is_one_second_after_init() {
        let (mut clock, fake) = clock_pair();
        fake.advance_secs(1);
        assert_eq!(clock.read_time(), 0);
        fake.advance_us(1);
        assert_eq!(clock.read_time(), from_us(1));
    }

    #[test]
    fn read_time_updates_cache() {
        let (mut clock, fake) = clock_pair();
        assert_eq!(clock.last_read_time(), 0);
        fake.advance_secs(2);
        let t = clock.read_time();
        assert_eq!(clock.last_read_time(), t);
        assert_eq!(t, CLOCK_FREQ);
    }

    #[test]
    fn check_periodic_rearms_two_seconds_out() {
        let (mut clock, fake) = clock_pair();
        fake.advance_secs(1);
        let now = clock.read_time();

        let mut deadline = now.wrapping_add(1);
        assert!(!clock.check_periodic(&mut deadline));
        assert_eq!(deadline, now.wrapping_add(1));

        let mut deadline = now;
        assert!(clock.check_periodic(&mut deadline));
        assert_eq!(deadline, now.wrapping_add(from_us(2_000_000)));
    }

    #[test]
    fn next_wake_round_trips_through_wall_time() {
        let (mut clock, fake) = clock_pair();
        fake.advance_secs(1);
        let now = clock.read_time();

        let wake = now.wrapping_add(from_us(300));
        clock.note_next_wake(wake);
        assert!(!clock.next_wake_due());

        fake.advance_us(301);
        assert!(clock.next_wake_due());
    }

    #[test]
    fn next_wake_projection_survives_negative_diffs() {
        let (mut clock, fake) = clock_pair();
        fake.advance_secs(1);
        let now = clock.read_time();
        clock.note_next_wake(now.wrapping_add(from_us(100)));

        let earlier = clock.timespec_from_ticks(now.wrapping_sub(from_us(50)));
        let later = clock.timespec_from_ticks(now.wrapping_add(from_us(250)));
        assert!(earlier.is_before(later));
        assert_eq!(
            later.add_nanos(-300 * 1_000),
            earlier,
            "projections 300us apart"
        );
    }

    proptest! {
        #[test]
        fn is_before_matches_signed_distance(a: u32, d in 1u32..0x8000_0000) {
            let b = a.wrapping_add(d);
            prop_assert!(is_before(a, b));
            prop_assert!(!is_before(b, a));
            prop_assert!(!is_before(a, a));
        }

        #[test]
        fn is_before_is_shift_invariant(a: u32, b: u32, k: u32) {
            prop_assert_eq!(
                is_before(a.wrapping_add(k), b.wrapping_add(k)),
                is_before(a, b)
            );
        }
    }
}

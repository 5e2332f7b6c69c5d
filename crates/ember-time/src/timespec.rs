/// Number of nanoseconds in one second.
pub const NSECS_PER_SEC: i64 = 1_000_000_000;

/// A seconds/nanoseconds pair read from a monotonic clock.
///
/// Arithmetic on `Timespec` always goes through [`Timespec::normalized`], which
/// flows nanosecond carry/borrow into the seconds field so `nsec` stays in
/// `[0, NSECS_PER_SEC)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

impl Timespec {
    pub const fn new(sec: i64, nsec: i64) -> Self {
        Self { sec, nsec }
    }

    /// Returns `self` with `nsec` brought into `[0, NSECS_PER_SEC)`.
    pub fn normalized(mut self) -> Self {
        if self.nsec >= NSECS_PER_SEC {
            self.sec += self.nsec / NSECS_PER_SEC;
            self.nsec %= NSECS_PER_SEC;
        } else if self.nsec < 0 {
            let borrow = (-self.nsec + NSECS_PER_SEC - 1) / NSECS_PER_SEC;
            self.sec -= borrow;
            self.nsec += borrow * NSECS_PER_SEC;
        }
        self
    }

    /// Adds a (possibly negative) number of nanoseconds, normalizing the result.
    pub fn add_nanos(self, ns: i64) -> Self {
        Self {
            sec: self.sec,
            nsec: self.nsec + ns,
        }
        .normalized()
    }

    /// Returns true if `self` is strictly earlier than `other`.
    ///
    /// Both operands must be normalized.
    pub fn is_before(self, other: Timespec) -> bool {
        (self.sec, self.nsec) < (other.sec, other.nsec)
    }
}

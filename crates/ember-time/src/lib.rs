//! Tick clock and wrap-aware time arithmetic for the ember firmware simulator.
//!
//! The simulated hardware exposes time as a 32-bit counter running at
//! [`CLOCK_FREQ`] ticks per second, anchored to a monotonic host clock. The
//! counter wraps roughly every 3.5 minutes at 20 MHz, so all comparisons must
//! go through [`is_before`]. Production code reads the host clock through
//! [`HostClock`]; tests substitute a [`FakeClock`].

mod source;
mod tick;
mod timespec;

pub use source::{FakeClock, HostClock, TimeSource};
pub use tick::{from_us, is_before, TickClock, CLOCK_FREQ, NSECS_PER_TICK};
pub use timespec::{Timespec, NSECS_PER_SEC};

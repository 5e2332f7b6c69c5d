//! Host glue for the ember firmware simulator: function registries, the TCP
//! pseudo-serial console, and loop statistics. The `ember-sim` binary wires
//! these to the scheduler core.

pub mod console;
pub mod registry;
pub mod stats;

pub use console::{Console, ConsoleError, ConsoleSink};
pub use registry::{FuncRegistry, HookFn};
pub use stats::LoopStats;

#![forbid(unsafe_code)]

//! Host-process firmware simulator.
//!
//! Wires the scheduler core to a TCP pseudo-serial console and runs the
//! cooperative task loop against the real host clock.

use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use ember_sched::{Dispatch, NullHooks, Scheduler, TaskWake};
use ember_sim::{Console, FuncRegistry};
use ember_time::{from_us, HostClock};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Interval between console socket polls.
const CONSOLE_POLL_US: u32 = 1000;

#[derive(Debug, Parser)]
#[command(about = "Host-process firmware simulator with a TCP pseudo-serial console")]
struct Args {
    /// Address for the pseudo-serial console listener.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Exit after running for this many seconds.
    #[arg(long)]
    max_secs: Option<u64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let console = Console::new(args.bind);
    let mut sched = Scheduler::new(
        Box::new(HostClock::new()),
        Box::new(NullHooks),
        Box::new(console.sink()),
    );

    let console_wake = Arc::new(TaskWake::new(sched.state().signals()));
    console.set_wake(console_wake.clone());

    // Periodic poll keeps the console responsive while the loop is idle.
    let poll_wake = console_wake.clone();
    let poll_timer = sched.register_timer(move |state, id| {
        poll_wake.wake();
        let waketime = state.waketime(id).wrapping_add(from_us(CONSOLE_POLL_US));
        state.set_waketime(id, waketime);
        Dispatch::Reschedule
    });

    let mut registry = FuncRegistry::new();
    {
        let console = console.clone();
        registry.register_init(move |sched| {
            if let Err(err) = console.init() {
                warn!(%err, "console disabled");
            }
            let waketime = sched.read_time().wrapping_add(from_us(CONSOLE_POLL_US));
            sched.add_timer(poll_timer, waketime);
        });
    }
    {
        let console = console.clone();
        let wake = console_wake.clone();
        registry.register_task(move |sched| {
            if wake.check_wake() {
                console.pump(sched);
            }
        });
    }
    if let Some(max_secs) = args.max_secs {
        let deadline = Instant::now() + Duration::from_secs(max_secs);
        registry.register_task(move |_sched| {
            if Instant::now() >= deadline {
                info!("run bound reached, exiting");
                process::exit(0);
            }
        });
    }

    sched.set_hooks(Box::new(registry));
    info!(bind = %args.bind, "simulator starting");
    sched.run()
}

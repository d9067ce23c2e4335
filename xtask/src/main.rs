//! Drives a synthetic allocation workload through `memprof-runtime` so the
//! broker/viewer/CLI can be exercised end to end without a real
//! instrumented target program.

use std::alloc::System;
use std::time::Duration;

use clap::Parser;
use memprof_runtime::{mprof_alloc, TrackingAllocator};

#[global_allocator]
static ALLOCATOR: TrackingAllocator<System> = TrackingAllocator::new(System);

#[derive(Parser)]
#[command(name = "xtask", about = "Synthetic allocation workload for memprof-runtime")]
struct Cli {
    /// Viewer/runtime host to stream snapshots to.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    #[arg(long, default_value_t = memprof_common::DEFAULT_VIEWER_PORT)]
    port: u16,
    /// Number of alloc/free iterations to run.
    #[arg(long, default_value_t = 200)]
    iterations: u64,
    /// Fraction (0-100) of allocations intentionally never freed, to
    /// exercise leak classification.
    #[arg(long, default_value_t = 10)]
    leak_percent: u64,
}

struct Widget {
    _payload: Vec<u8>,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    memprof_runtime::init(&cli.host, cli.port);

    let mut leaked = Vec::new();
    for i in 0..cli.iterations {
        let size = 16 + (i % 4096);
        let widget = mprof_alloc!(Widget, Box::new(Widget { _payload: vec![0u8; size as usize] }));

        if i % 100 < cli.leak_percent {
            leaked.push(widget); // never dropped: becomes a leak candidate
        } else {
            drop(widget);
        }

        std::thread::sleep(Duration::from_millis(5));
    }

    println!("workload done: {} blocks intentionally leaked", leaked.len());
    // Keep the leaked blocks alive until shutdown so a late snapshot still
    // observes them.
    std::thread::sleep(Duration::from_millis(500));
    memprof_runtime::shutdown();
    drop(leaked);
}

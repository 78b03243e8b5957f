//! Stress tool for fiber creation, reuse, and switch throughput
//!
//! Runs many short resumable computations back to back. Because each one
//! finishes before the next starts, the whole loop should recycle a single
//! physical fiber through the cache.

use std::time::Instant;
use weft::{execute, Handle};

const RUNS: usize = 100_000;
const YIELDS_PER_RUN: usize = 4;

fn main() {
    weft::init();

    let start = Instant::now();
    for i in 0..RUNS {
        let mut r = execute(move |h: &mut Handle| {
            for _ in 0..YIELDS_PER_RUN {
                h.yield_now();
            }
            i as u64
        });
        while !r.is_done() {
            r.resume();
        }
        assert_eq!(*r.get::<u64>(), i as u64);
    }
    let elapsed = start.elapsed();

    // Every activation and every yield is one switch in each direction.
    let switches = RUNS * (YIELDS_PER_RUN + 1) * 2;
    println!("{} runs, {} stack switches in {:?}", RUNS, switches, elapsed);
    println!(
        "{:.0} ns/switch",
        elapsed.as_nanos() as f64 / switches as f64
    );

    let stats = weft::statistics();
    println!(
        "fibers created: {} (cached {}, trampoline entries {})",
        stats.total, stats.cached, stats.trampoline_entries
    );
    assert_eq!(stats.total, 1, "sequential runs should reuse one fiber");

    weft::done();
}

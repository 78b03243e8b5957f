//! Basic weft example
//!
//! Runs resumable computations, showing yield/resume/abort and the
//! engine statistics.
//!
//! # Environment Variables
//!
//! - `WEFT_LOG_FLUSH=1` - Flush debug output immediately (useful for crash debugging)
//! - `WEFT_LOG_LEVEL=trace` - Set log level (off, error, warn, info, debug, trace)

use weft::{execute, kinfo, yield_now, Handle};

// WEFT_LOG_LEVEL=trace cargo run -p weft-basic --features weft/debug-logging
fn main() {
    println!("=== weft basic example ===\n");

    weft::init();

    // A computation that pauses between chunks of work.
    let mut summed = execute(|_: &mut Handle| {
        let mut total = 0u64;
        for chunk in 1..=3u64 {
            kinfo!("[fiber] processed chunk {}", chunk);
            total += chunk;
            yield_now();
        }
        total
    });

    let mut rounds = 0;
    while !summed.is_done() {
        rounds += 1;
        kinfo!("[main] round {}: fiber suspended, resuming", rounds);
        summed.resume();
    }
    println!(
        "sum computed across {} suspensions: {}",
        rounds,
        summed.get::<u64>()
    );

    // Cancellation: the payload never gets past its first yield, but its
    // stack unwinds cleanly.
    let mut cancelled = execute(|h: &mut Handle| {
        h.yield_now();
        "finished anyway"
    });
    cancelled.abort();
    println!(
        "cancelled resumable: done={} has_result={}",
        cancelled.is_done(),
        cancelled.has_result()
    );

    let stats = weft::statistics();
    println!(
        "\nfibers: total={} live={} cached={} peak-live={} peak-stack={}B trampoline-entries={}",
        stats.total,
        stats.live,
        stats.cached,
        stats.max_live,
        stats.max_stack_used,
        stats.trampoline_entries
    );

    weft::done();
}

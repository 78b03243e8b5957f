//! Process-wide fiber statistics
//!
//! Monotonic counters shared by every fiber context in the process,
//! consumed by telemetry tooling and the test suite. Only payload fibers
//! are tracked; main and switch-trampoline fibers are infrastructure.

use core::sync::atomic::{AtomicU64, Ordering};

static TOTAL: AtomicU64 = AtomicU64::new(0);
static LIVE: AtomicU64 = AtomicU64::new(0);
static CACHED: AtomicU64 = AtomicU64::new(0);
static MAX_LIVE: AtomicU64 = AtomicU64::new(0);
static MAX_STACK_USED: AtomicU64 = AtomicU64::new(0);
static TRAMPOLINE_ENTRIES: AtomicU64 = AtomicU64::new(0);

/// Snapshot of the process-wide fiber counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statistics {
    /// Fibers ever created
    pub total: u64,

    /// Fibers currently attached to a resumable (cached fibers excluded)
    pub live: u64,

    /// Idle fibers currently held in a context cache
    pub cached: u64,

    /// Historical peak of `live`
    pub max_live: u64,

    /// Historical peak of per-fiber stack usage in bytes, sampled at
    /// suspension points
    pub max_stack_used: u64,

    /// Number of trampoline-loop entries; stays below `total` resumptions
    /// when fiber reuse is working
    pub trampoline_entries: u64,
}

/// Take a snapshot of all counters
pub fn statistics() -> Statistics {
    Statistics {
        total: TOTAL.load(Ordering::Relaxed),
        live: LIVE.load(Ordering::Relaxed),
        cached: CACHED.load(Ordering::Relaxed),
        max_live: MAX_LIVE.load(Ordering::Relaxed),
        max_stack_used: MAX_STACK_USED.load(Ordering::Relaxed),
        trampoline_entries: TRAMPOLINE_ENTRIES.load(Ordering::Relaxed),
    }
}

/// Zero all counters. Test support only.
pub fn reset() {
    TOTAL.store(0, Ordering::Relaxed);
    LIVE.store(0, Ordering::Relaxed);
    CACHED.store(0, Ordering::Relaxed);
    MAX_LIVE.store(0, Ordering::Relaxed);
    MAX_STACK_USED.store(0, Ordering::Relaxed);
    TRAMPOLINE_ENTRIES.store(0, Ordering::Relaxed);
}

#[inline]
fn bump_live() {
    let live = LIVE.fetch_add(1, Ordering::Relaxed) + 1;
    MAX_LIVE.fetch_max(live, Ordering::Relaxed);
}

/// A payload fiber was constructed
pub fn note_created() {
    TOTAL.fetch_add(1, Ordering::Relaxed);
    bump_live();
}

/// A payload fiber left the cache for reuse
pub fn note_cache_pop() {
    CACHED.fetch_sub(1, Ordering::Relaxed);
    bump_live();
}

/// A payload fiber was parked in the cache
pub fn note_cache_push() {
    LIVE.fetch_sub(1, Ordering::Relaxed);
    CACHED.fetch_add(1, Ordering::Relaxed);
}

/// A payload fiber was destroyed without entering the cache
pub fn note_destroyed() {
    LIVE.fetch_sub(1, Ordering::Relaxed);
}

/// `n` cached fibers were dropped at context teardown
pub fn note_cache_cleared(n: usize) {
    CACHED.fetch_sub(n as u64, Ordering::Relaxed);
}

/// A fiber entered its run-trampoline loop for the first time
pub fn note_trampoline_entry() {
    TRAMPOLINE_ENTRIES.fetch_add(1, Ordering::Relaxed);
}

/// Record an observed per-fiber stack usage
pub fn note_stack_used(bytes: usize) {
    MAX_STACK_USED.fetch_max(bytes as u64, Ordering::Relaxed);
}

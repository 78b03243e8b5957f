//! Fiber identifier type

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a fiber
///
/// Monotonically increasing per process. Used to tag debug output with a
/// stable identity that survives the fiber moving between the cache and a
/// resumable.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct FiberId(u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

impl FiberId {
    /// Allocate the next identifier
    #[inline]
    pub fn next() -> FiberId {
        FiberId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw value
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FiberId({})", self.0)
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

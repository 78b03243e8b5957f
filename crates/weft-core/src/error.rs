//! Error types for the fiber engine

use core::fmt;

/// Memory-related errors from stack mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// mmap failed
    AllocationFailed,

    /// mprotect failed while installing a guard page
    ProtectionFailed,

    /// Requested stack size was zero or overflowed page rounding
    InvalidSize,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::AllocationFailed => write!(f, "stack allocation failed"),
            MemoryError::ProtectionFailed => write!(f, "guard page protection failed"),
            MemoryError::InvalidSize => write!(f, "invalid stack size"),
        }
    }
}

impl std::error::Error for MemoryError {}

/// Abort the process after logging an unrecoverable internal failure.
///
/// Used for resource exhaustion (stack or swap-buffer allocation failure),
/// an undersized OS stack limit at context construction, and internal
/// invariant violations observed after a switch. None of these are
/// conditions a caller can meaningfully recover from.
pub fn fatal_error(msg: &str) -> ! {
    crate::kerror!("fatal fiber error: {}", msg);
    std::process::abort();
}

//! Fiber state and kind types

use core::fmt;

/// Execution state of a fiber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FiberState {
    /// Constructed with a payload assigned, never activated
    Init = 0,

    /// Currently executing on its stack
    Running = 1,

    /// Suspended at a yield point, waiting for resume
    Yielded = 2,

    /// Payload finished, fiber parked in its trampoline loop for reuse
    Idle = 3,

    /// Transient state set just before a forced resume so the payload
    /// observes cancellation and unwinds
    Aborting = 4,
}

impl FiberState {
    /// Check if the fiber may be resumed
    #[inline]
    pub const fn is_resumable(&self) -> bool {
        matches!(self, FiberState::Yielded)
    }

    /// Check if the fiber's payload has run to completion
    #[inline]
    pub const fn is_finished(&self) -> bool {
        matches!(self, FiberState::Idle)
    }
}

impl fmt::Display for FiberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FiberState::Init => "init",
            FiberState::Running => "running",
            FiberState::Yielded => "yielded",
            FiberState::Idle => "idle",
            FiberState::Aborting => "aborting",
        };
        write!(f, "{}", s)
    }
}

/// Kind of fiber
///
/// The kind decides how the fiber's stack is provisioned and whether a
/// switch to or from it must route through the context's switch trampoline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FiberKind {
    /// Pseudo-fiber wrapping the thread's original call stack; never
    /// allocates and is never destroyed mid-run
    Main = 0,

    /// Relay fiber with a small dedicated stack, re-initialized on every
    /// switch that involves a shared stack
    SwitchTrampoline = 1,

    /// Fiber time-sharing the context's single physical stack region;
    /// cheapest on memory, switching pays for a stack copy
    SharedStack = 2,

    /// Fiber owning a private stack; more memory, direct switching
    IndividualStack = 3,
}

impl FiberKind {
    /// Stable tag used in debug output
    #[inline]
    pub const fn tag(&self) -> &'static str {
        match self {
            FiberKind::Main => "main",
            FiberKind::SwitchTrampoline => "switcher",
            FiberKind::SharedStack => "shared-stack",
            FiberKind::IndividualStack => "owned-stack",
        }
    }

    /// Check if this fiber runs on the context's shared physical stack
    #[inline]
    pub const fn uses_shared_stack(&self) -> bool {
        matches!(self, FiberKind::SharedStack)
    }

    /// Check if this kind carries a user payload (statistics only track
    /// these; `Main` and `SwitchTrampoline` are infrastructure)
    #[inline]
    pub const fn is_payload(&self) -> bool {
        matches!(self, FiberKind::SharedStack | FiberKind::IndividualStack)
    }
}

impl fmt::Display for FiberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(FiberState::Yielded.is_resumable());
        assert!(!FiberState::Running.is_resumable());
        assert!(!FiberState::Init.is_resumable());

        assert!(FiberState::Idle.is_finished());
        assert!(!FiberState::Yielded.is_finished());
        assert!(!FiberState::Aborting.is_finished());
    }

    #[test]
    fn test_kind_predicates() {
        assert!(FiberKind::SharedStack.uses_shared_stack());
        assert!(!FiberKind::IndividualStack.uses_shared_stack());
        assert!(!FiberKind::Main.uses_shared_stack());

        assert!(FiberKind::SharedStack.is_payload());
        assert!(FiberKind::IndividualStack.is_payload());
        assert!(!FiberKind::Main.is_payload());
        assert!(!FiberKind::SwitchTrampoline.is_payload());
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(FiberKind::Main.tag(), "main");
        assert_eq!(FiberKind::SwitchTrampoline.tag(), "switcher");
        assert_eq!(FiberKind::SharedStack.tag(), "shared-stack");
        assert_eq!(FiberKind::IndividualStack.tag(), "owned-stack");
    }
}

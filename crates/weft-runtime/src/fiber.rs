//! Fiber state machine and switch protocol
//!
//! A fiber is a switchable execution context with its own stack. Payload
//! fibers start at a fixed trampoline that loops forever: run the assigned
//! payload, record its outcome, park as idle, wake with the next payload.
//! One physical fiber thereby serves an unbounded sequence of computations,
//! amortizing stack acquisition.
//!
//! Two fibers can jump between each other directly only when neither lives
//! on the context's shared stack. Otherwise the switch routes through the
//! context's switch-trampoline fiber, which runs on its own fixed stack and
//! swaps the shared region's bytes (save the outgoing fiber, restore the
//! incoming one) before performing the final jump. Register context alone
//! is not enough when two logical fibers occupy the same physical memory.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use crate::arch::{self, SwitchRegs};
use crate::config::FiberConfig;
use crate::context::{self, FiberContext, SwitchArgs};
use crate::debug::fiber_debug;
use crate::memory::FiberStack;
use crate::stack_buffer::StackBuffer;
use weft_core::error::fatal_error;
use weft_core::id::FiberId;
use weft_core::state::{FiberKind, FiberState};
use weft_core::stats;

// Defaults for normal operation: payload fibers share one physical stack,
// and only switches involving a shared stack pay for the trampoline.
#[cfg(not(feature = "asan"))]
const DEFAULT_FIBER_KIND: FiberKind = FiberKind::SharedStack;
#[cfg(not(feature = "asan"))]
const ALWAYS_SWITCH_VIA_TRAMPOLINE: bool = false;

// Stack copying triggers false positives in the sanitizer's shadow-memory
// tracking, so sanitizer builds give every fiber its own stack. Switches
// still all route through the trampoline, the one choke point where the
// sanitizer's fiber hooks bracket each crossing.
#[cfg(feature = "asan")]
const DEFAULT_FIBER_KIND: FiberKind = FiberKind::IndividualStack;
#[cfg(feature = "asan")]
const ALWAYS_SWITCH_VIA_TRAMPOLINE: bool = true;

/// Cancellation signal raised inside a fiber resumed for abort.
///
/// Deliberately not an error type and not nameable outside the crate:
/// payload-level handling cannot catch it, so the unwind always reaches the
/// run trampoline's catch-all after running the payload's destructors.
pub(crate) struct AbortSignal;

/// Unwind payload raised by [`check_stack`] when a running fiber's
/// remaining headroom falls below the configured minimum. Propagates out
/// of `run`/`resume` like any payload failure.
#[derive(Debug)]
pub struct StackSizeExceeded {
    pub remaining: usize,
    pub required: usize,
}

/// Type-erased payload: consumes the handle-taking closure, boxes its result
pub(crate) type Payload = Box<dyn FnOnce(&mut Handle) -> Box<dyn Any> + 'static>;

/// What a finished payload left behind
pub(crate) enum Outcome {
    /// Payload still pending or mid-flight
    Pending,

    /// Payload returned a value
    Returned(Box<dyn Any>),

    /// Payload panicked; the cause is re-raised by the resumable
    Unwound(Box<dyn Any + Send>),

    /// Payload unwound in response to an abort
    Aborted,
}

/// Suspension handle passed to a payload
///
/// Borrowing it mutably for `yield_now` keeps suspension requests tied to
/// the fiber actually running the payload.
pub struct Handle {
    fiber: *mut Fiber,
}

impl Handle {
    /// Suspend this computation; control returns to whoever activated it
    pub fn yield_now(&mut self) {
        unsafe { (*self.fiber).suspend() }
    }
}

/// A switchable execution context with its own stack
pub(crate) struct Fiber {
    kind: FiberKind,
    state: FiberState,
    id: FiberId,

    /// Saved register file while suspended
    regs: SwitchRegs,

    /// Owned stack for `SwitchTrampoline` and `IndividualStack` fibers;
    /// `Main` has no known stack and `SharedStack` borrows the context's
    stack: Option<FiberStack>,

    /// Usable stack bounds the fiber runs on (null for `Main`)
    stack_low: *mut u8,
    stack_high: *mut u8,

    /// The computation to run next time the trampoline loop wakes
    payload: Option<Payload>,

    outcome: Outcome,

    /// The fiber that most recently activated this one; control returns
    /// exactly there on yield
    caller: *mut Fiber,

    /// Swap storage for shared-stack multiplexing
    stack_buffer: StackBuffer,

    #[cfg(feature = "asan")]
    pub(crate) asan: crate::sanitizer::AsanState,
}

impl Fiber {
    pub(crate) fn new(kind: FiberKind, config: &FiberConfig, shared: Option<&FiberStack>) -> Fiber {
        let (stack, stack_low, stack_high) = match kind {
            FiberKind::Main => (None, ptr::null_mut(), ptr::null_mut()),
            FiberKind::SwitchTrampoline | FiberKind::IndividualStack => {
                let s = FiberStack::alloc(config.individual_stack_size).unwrap_or_else(|e| {
                    fatal_error(&format!("could not allocate individual fiber stack: {}", e))
                });
                let (lo, hi) = (s.low(), s.high());
                (Some(s), lo, hi)
            }
            FiberKind::SharedStack => {
                let s = shared
                    .unwrap_or_else(|| fatal_error("shared-stack fiber created without a shared stack"));
                (None, s.low(), s.high())
            }
        };

        let fiber = Fiber {
            kind,
            state: FiberState::Init,
            id: FiberId::next(),
            regs: SwitchRegs::default(),
            stack,
            stack_low,
            stack_high,
            payload: None,
            outcome: Outcome::Pending,
            caller: ptr::null_mut(),
            stack_buffer: StackBuffer::new(),
            #[cfg(feature = "asan")]
            asan: crate::sanitizer::AsanState::new(
                stack_low,
                stack_high as usize - stack_low as usize,
            ),
        };

        if kind.is_payload() {
            stats::note_created();
        }

        fiber_debug!("ctor", "allocated new fiber {}", fiber);
        fiber
    }

    #[inline]
    pub(crate) fn state(&self) -> FiberState {
        self.state
    }

    /// True once the payload has run to completion and the fiber is parked
    #[inline]
    pub(crate) fn is_done(&self) -> bool {
        self.state.is_finished()
    }

    /// Assign the next computation. Only valid on a fiber that is not
    /// mid-payload; cached fibers get a fresh payload here before reuse.
    pub(crate) fn set_payload(&mut self, payload: Payload) {
        debug_assert!(self.payload.is_none());
        debug_assert!(matches!(self.state, FiberState::Init | FiberState::Idle));
        self.payload = Some(payload);
        self.outcome = Outcome::Pending;
    }

    pub(crate) fn take_outcome(&mut self) -> Outcome {
        std::mem::replace(&mut self.outcome, Outcome::Pending)
    }

    /// Activate the fiber. On first activation the stack is primed to enter
    /// the run trampoline; afterwards activation resumes wherever the fiber
    /// last suspended. When control returns here the fiber must have either
    /// yielded or finished.
    pub(crate) fn run(&mut self) {
        let init = self.state == FiberState::Init;

        if self.state != FiberState::Aborting {
            self.state = FiberState::Running;
        }

        if init {
            unsafe {
                arch::init_context(
                    &mut self.regs,
                    self.stack_high,
                    fiber_run_trampoline as usize,
                    self as *mut Fiber as usize,
                );
            }
        }

        unsafe { self.activate("run") };

        match self.state {
            FiberState::Yielded | FiberState::Idle => {}
            s => fatal_error(&format!("fiber: unexpected state after switch ({})", s)),
        }
    }

    pub(crate) fn resume(&mut self) {
        assert!(
            self.state.is_resumable(),
            "resume on a fiber that has not yielded"
        );
        self.run();
    }

    /// Forcibly resume a suspended fiber so the pending cancellation raises
    /// inside its own call stack, unwinding it with destructors. A no-op if
    /// the context has already been torn down.
    pub(crate) fn abort(&mut self) {
        assert!(
            self.state.is_resumable(),
            "abort on a fiber that has not yielded"
        );
        self.state = FiberState::Aborting;

        if context::get().is_null() {
            return;
        }

        self.run();
    }

    /// Suspend the running fiber, returning control to its caller. Raises
    /// the cancellation signal upon resumption if an abort is pending.
    pub(crate) fn suspend(&mut self) {
        assert!(
            self.state == FiberState::Running,
            "yield on a fiber that is not running"
        );

        if let Some(used) = self.live_used_size() {
            stats::note_stack_used(used);
        }

        self.state = FiberState::Yielded;
        unsafe { self.yield_to_caller("yield") };

        if self.state == FiberState::Aborting {
            // resume_unwind skips the panic hook; the unwind runs the
            // payload's destructors and stops at the trampoline's catch-all.
            panic::resume_unwind(Box::new(AbortSignal));
        }
    }

    unsafe fn activate(&mut self, tag: &str) {
        let ctx = context::get();
        debug_assert!(!ctx.is_null());
        let current = (*ctx).current;
        debug_assert!(!current.is_null() && current != self as *mut Fiber);
        debug_assert!((*current).kind != FiberKind::SwitchTrampoline);

        fiber_debug!(tag, "activating fiber {}", self);
        self.caller = current;

        let me: *mut Fiber = self;
        if ALWAYS_SWITCH_VIA_TRAMPOLINE
            || (*current).kind.uses_shared_stack()
            || self.kind.uses_shared_stack()
        {
            switch_via_trampoline(tag, current, me, ctx);
        } else {
            execute_switch(tag, current, me, ctx);
        }
    }

    unsafe fn yield_to_caller(&mut self, tag: &str) {
        let ctx = context::get();
        debug_assert!(!ctx.is_null());
        debug_assert!((*ctx).current == self as *mut Fiber);
        debug_assert!(!self.caller.is_null() && self.caller != self as *mut Fiber);
        debug_assert!(self.kind != FiberKind::SwitchTrampoline);

        fiber_debug!(tag, "yielding to caller {}", &*self.caller);

        let me: *mut Fiber = self;
        let caller = self.caller;
        if ALWAYS_SWITCH_VIA_TRAMPOLINE
            || self.kind.uses_shared_stack()
            || (*caller).kind.uses_shared_stack()
        {
            switch_via_trampoline(tag, me, caller, ctx);
        } else {
            execute_switch(tag, me, caller, ctx);
        }
    }

    /// `[low, length)` of the stack portion in use, derived from the saved
    /// stack pointer. Only well-defined while the fiber is suspended;
    /// stacks grow down on every supported architecture.
    fn active_region(&self) -> (*mut u8, usize) {
        let sp = self.regs.stack_pointer();
        debug_assert!(sp >= self.stack_low && sp <= self.stack_high);
        (sp, self.stack_high as usize - sp as usize)
    }

    unsafe fn save_stack(&mut self, swap_min: usize) {
        let (lo, len) = self.active_region();
        fiber_debug!("stack-switcher", "saving {} stack bytes of {}", len, self);
        self.stack_buffer.save(lo, len, swap_min);
    }

    unsafe fn restore_stack(&mut self) {
        let (lo, len) = self.active_region();
        debug_assert!(
            self.stack_buffer.saved_len() == 0 || self.stack_buffer.saved_len() == len
        );
        fiber_debug!(
            "stack-switcher",
            "restoring {} stack bytes of {}",
            self.stack_buffer.saved_len(),
            self
        );
        self.stack_buffer.restore(lo);
    }

    /// Stack bytes in use right now. Only valid on the currently executing
    /// fiber; `None` for infrastructure fibers.
    fn live_used_size(&self) -> Option<usize> {
        if !self.kind.is_payload() {
            return None;
        }
        let sp = unsafe { arch::current_stack_pointer() };
        debug_assert!(sp >= self.stack_low && sp < self.stack_high);
        Some(self.stack_high as usize - sp as usize)
    }

    /// Approximate stack bytes left below the live stack pointer. Only
    /// valid on the currently executing fiber.
    fn live_remaining_size(&self) -> Option<usize> {
        if !self.kind.is_payload() {
            return None;
        }
        let sp = unsafe { arch::current_stack_pointer() };
        Some(sp as usize - self.stack_low as usize)
    }

    /// Pop the most recently cached idle fiber, or construct a new one of
    /// the default kind. Never touches a popped fiber's payload; the caller
    /// assigns a fresh one before activation.
    pub(crate) fn create() -> Box<Fiber> {
        let ctx = context::acquire();
        unsafe {
            if let Some(fiber) = (*ctx).cache.pop() {
                stats::note_cache_pop();
                fiber_debug!("create", "reusing fiber {} from cache", &*fiber);
                return fiber;
            }
            Box::new(Fiber::new(
                DEFAULT_FIBER_KIND,
                &(*ctx).config,
                Some(&(*ctx).shared_stack),
            ))
        }
    }

    /// Return a fiber to the context. A still-suspended fiber is aborted
    /// first so its call stack unwinds; the fiber is then cached for reuse,
    /// or dropped when the cache is full or the context is gone.
    pub(crate) fn destroy(mut fiber: Box<Fiber>) {
        if fiber.kind == FiberKind::Main {
            return;
        }

        if fiber.state == FiberState::Yielded {
            fiber.abort();
        }

        let ctx = context::get();
        if !ctx.is_null() {
            unsafe {
                if (*ctx).cache.len() < (*ctx).config.cache_max {
                    fiber_debug!("destroy", "putting fiber {} back into cache", &*fiber);
                    stats::note_cache_push();
                    (*ctx).cache.push(fiber);
                    return;
                }
            }
            fiber_debug!("destroy", "cache full, deleting fiber {}", &*fiber);
        }

        stats::note_destroyed();
    }

    /// Eagerly fill the cache to its configured size
    pub(crate) fn prime_cache() {
        let ctx = context::acquire();
        let n = unsafe { (*ctx).config.cache_max };

        let mut fibers = Vec::with_capacity(n);
        for _ in 0..n {
            fibers.push(Fiber::create());
        }
        while let Some(fiber) = fibers.pop() {
            Fiber::destroy(fiber);
        }
    }
}

impl fmt::Display for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind.tag(), self.id)
    }
}

/// Raise [`StackSizeExceeded`] if the running fiber's remaining stack
/// headroom has fallen below the configured minimum. Intended for payload
/// code with unbounded recursion. A no-op on the main stack or outside any
/// fiber context.
pub fn check_stack() {
    let ctx = context::get();
    if ctx.is_null() {
        return;
    }
    unsafe {
        let current = (*ctx).current;
        if current.is_null() {
            return;
        }
        if let Some(used) = (*current).live_used_size() {
            stats::note_stack_used(used);
        }
        if let Some(remaining) = (*current).live_remaining_size() {
            let required = (*ctx).config.min_stack_headroom;
            if remaining < required {
                panic::resume_unwind(Box::new(StackSizeExceeded {
                    remaining,
                    required,
                }));
            }
        }
    }
}

/// Low-level switch from `from` to `to`, updating the context's notion of
/// the currently executing fiber and bracketing the jump with the
/// sanitizer hooks.
unsafe fn execute_switch(tag: &str, from: *mut Fiber, to: *mut Fiber, ctx: *mut FiberContext) {
    fiber_debug!(tag, "executing fiber switch from {} to {}", &*from, &*to);

    crate::sanitizer::start_switch_fiber(ctx, to);
    (*ctx).current = to;
    arch::context_switch(&mut (*from).regs, &(*to).regs);
    crate::sanitizer::finish_switch_fiber(context::get());

    fiber_debug!(tag, "resumed {} after switch returned", &*from);
}

/// Route a switch through the context's switch-trampoline fiber, which is
/// re-primed on its fixed stack for every crossing. The endpoints are
/// staged in the context because `from`'s stack may be swapped out before
/// the final jump.
unsafe fn switch_via_trampoline(tag: &str, from: *mut Fiber, to: *mut Fiber, ctx: *mut FiberContext) {
    (*ctx).switch_args = SwitchArgs { from, to };

    let switcher: *mut Fiber = &mut *(*ctx).switch_trampoline;
    arch::init_context(
        &mut (*switcher).regs,
        (*switcher).stack_high,
        switch_trampoline_entry as usize,
        ctx as usize,
    );

    execute_switch(tag, from, switcher, ctx);
}

/// Entry point of every payload fiber: the re-entrant trampoline loop.
extern "C" fn fiber_run_trampoline(fiber: *mut Fiber) {
    unsafe {
        crate::sanitizer::finish_switch_fiber(context::get());

        stats::note_trampoline_entry();
        fiber_debug!("trampoline-run", "entering trampoline loop");

        loop {
            if (*fiber).caller.is_null() || (*fiber).state != FiberState::Running {
                fatal_error("fiber trampoline woke in an unexpected state");
            }

            let payload = match (*fiber).payload.take() {
                Some(p) => p,
                None => fatal_error("fiber trampoline woke without a payload"),
            };

            let mut handle = Handle { fiber };
            let result = panic::catch_unwind(AssertUnwindSafe(|| payload(&mut handle)));

            (*fiber).outcome = match result {
                Ok(value) => {
                    fiber_debug!("trampoline-run", "payload finished");
                    Outcome::Returned(value)
                }
                Err(cause) if cause.is::<AbortSignal>() => {
                    fiber_debug!("trampoline-run", "payload unwound for abort");
                    Outcome::Aborted
                }
                Err(cause) => {
                    fiber_debug!("trampoline-run", "payload panicked, forwarding");
                    Outcome::Unwound(cause)
                }
            };

            (*fiber).state = FiberState::Idle;
            (*fiber).yield_to_caller("trampoline-run");
        }
    }
}

/// Entry point of the switch-trampoline fiber: swap shared-stack bytes,
/// then jump onward. Never runs to completion and keeps nothing on its
/// stack that would need cleanup.
extern "C" fn switch_trampoline_entry(ctx: *mut FiberContext) {
    unsafe {
        crate::sanitizer::finish_switch_fiber(ctx);

        let SwitchArgs { from, to } = (*ctx).switch_args;
        fiber_debug!("stack-switcher", "switching from {} to {}", &*from, &*to);

        if (*from).kind.uses_shared_stack() {
            let swap_min = (*ctx).config.shared_stack_swap_min;
            (*from).save_stack(swap_min);
        }

        if (*to).kind.uses_shared_stack() {
            (*to).restore_stack();
        }

        let switcher: *mut Fiber = &mut *(*ctx).switch_trampoline;
        execute_switch("stack-switcher", switcher, to, ctx);
    }

    unreachable!("stack switch trampoline resumed unexpectedly");
}

//! Per-thread fiber context
//!
//! One `FiberContext` owns everything a thread needs to run fibers: the
//! pseudo-fiber wrapping the original call stack, the switch-trampoline
//! relay, the shared physical stack, and the reuse cache. The context is
//! strictly single-threaded; nothing here is synchronized and a context
//! must never be shared across threads.
//!
//! The context lives behind a thread-local raw pointer with explicit
//! `init`/`done` lifecycle, constructed lazily on first use. Raw-pointer
//! access (rather than `RefCell`) is deliberate: borrows must not be held
//! across a stack switch.

use std::cell::Cell;
use std::ptr;

use crate::config::FiberConfig;
use crate::fiber::Fiber;
use crate::memory::FiberStack;
use weft_core::error::fatal_error;
use weft_core::state::FiberKind;
use weft_core::stats;

/// Endpoints of a switch that routes through the switch trampoline
#[derive(Clone, Copy)]
pub(crate) struct SwitchArgs {
    pub(crate) from: *mut Fiber,
    pub(crate) to: *mut Fiber,
}

impl SwitchArgs {
    const fn empty() -> SwitchArgs {
        SwitchArgs {
            from: ptr::null_mut(),
            to: ptr::null_mut(),
        }
    }
}

/// Per-thread home of the fiber engine
pub(crate) struct FiberContext {
    pub(crate) config: FiberConfig,

    /// Pseudo-fiber representing the thread's original stack
    pub(crate) main: Box<Fiber>,

    /// Relay fiber for switches that involve a shared stack
    pub(crate) switch_trampoline: Box<Fiber>,

    /// The single physical stack region multiplexed by all shared-stack
    /// fibers of this context
    pub(crate) shared_stack: FiberStack,

    /// LIFO pool of idle fibers available for reuse, bounded by
    /// `config.cache_max`
    pub(crate) cache: Vec<Box<Fiber>>,

    /// The one fiber currently executing
    pub(crate) current: *mut Fiber,

    /// Fiber of the innermost active resumable, so the free `yield_now`
    /// can find it
    pub(crate) resumable: *mut Fiber,

    /// Staging area for trampoline switches; lives here because the
    /// originating fiber's stack may be swapped out mid-switch
    pub(crate) switch_args: SwitchArgs,
}

impl FiberContext {
    fn new(config: FiberConfig) -> Box<FiberContext> {
        if let Err(e) = config.validate() {
            fatal_error(&format!("invalid fiber configuration: {}", e));
        }
        check_stack_limit(&config);

        let shared_stack = FiberStack::alloc(config.shared_stack_size)
            .unwrap_or_else(|e| fatal_error(&format!("could not allocate shared stack: {}", e)));
        let main = Box::new(Fiber::new(FiberKind::Main, &config, None));
        let switch_trampoline = Box::new(Fiber::new(FiberKind::SwitchTrampoline, &config, None));

        let mut ctx = Box::new(FiberContext {
            config,
            main,
            switch_trampoline,
            shared_stack,
            cache: Vec::new(),
            current: ptr::null_mut(),
            resumable: ptr::null_mut(),
            switch_args: SwitchArgs::empty(),
        });
        ctx.current = &mut *ctx.main as *mut Fiber;
        ctx
    }
}

impl Drop for FiberContext {
    fn drop(&mut self) {
        stats::note_cache_cleared(self.cache.len());
    }
}

/// Sanity-check the configured stack sizes against the process stack
/// limit. An undersized limit is a configuration error we cannot run
/// under, detected once at construction rather than as a crash later.
fn check_stack_limit(config: &FiberConfig) {
    let mut rl = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    if unsafe { libc::getrlimit(libc::RLIMIT_STACK, &mut rl) } != 0 {
        fatal_error("could not query the process stack limit");
    }
    if rl.rlim_cur == libc::RLIM_INFINITY {
        return;
    }
    let required = (config.shared_stack_size + config.min_stack_headroom) as u64;
    if (rl.rlim_cur as u64) < required {
        fatal_error(&format!(
            "process stack limit of {} bytes cannot accommodate a shared stack of {} bytes",
            rl.rlim_cur, config.shared_stack_size
        ));
    }
}

thread_local! {
    static CONTEXT: Cell<*mut FiberContext> = const { Cell::new(ptr::null_mut()) };
}

/// Initialize this thread's fiber context with default configuration.
/// Does nothing if the context already exists.
pub fn init() {
    init_with(FiberConfig::default());
}

/// Initialize this thread's fiber context with the given configuration.
/// Does nothing if the context already exists; the first initialization
/// wins.
pub fn init_with(config: FiberConfig) {
    CONTEXT.with(|cell| {
        if !cell.get().is_null() {
            return;
        }
        cell.set(Box::into_raw(FiberContext::new(config)));
    });
}

/// Tear down this thread's fiber context, releasing the shared stack and
/// all cached fibers. Must not be called from inside a running fiber.
/// Fibers still attached to a live `Resumable` are dropped without
/// unwinding when that resumable goes away.
pub fn done() {
    let ctx = CONTEXT.with(|cell| cell.replace(ptr::null_mut()));
    if !ctx.is_null() {
        drop(unsafe { Box::from_raw(ctx) });
    }
}

/// This thread's context, or null if none has been initialized
#[inline]
pub(crate) fn get() -> *mut FiberContext {
    CONTEXT.with(|cell| cell.get())
}

/// This thread's context, constructing it with defaults on first use
#[inline]
pub(crate) fn acquire() -> *mut FiberContext {
    let ctx = get();
    if ctx.is_null() {
        init();
        get()
    } else {
        ctx
    }
}

/// Clear the fiber cache and zero all statistics counters. Test support.
pub fn reset() {
    let ctx = get();
    if !ctx.is_null() {
        unsafe { (*ctx).cache.clear() };
    }
    stats::reset();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_lifecycle() {
        assert!(get().is_null());
        let ctx = acquire();
        assert!(!ctx.is_null());
        assert_eq!(acquire(), ctx);

        done();
        assert!(get().is_null());
        done(); // second teardown is a no-op
    }

    #[test]
    fn test_init_with_custom_config() {
        init_with(FiberConfig::default().cache_max(4));
        let ctx = get();
        assert!(!ctx.is_null());
        unsafe {
            assert_eq!((*ctx).config.cache_max, 4);
            assert!((*ctx).shared_stack.size() >= (*ctx).config.shared_stack_size);
            assert!(!(*ctx).current.is_null());
        }
        done();
    }
}

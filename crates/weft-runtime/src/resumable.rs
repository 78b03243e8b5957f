//! Resumable computations
//!
//! `Resumable` is the client-facing handle around one fiber executing a
//! payload: start it with `run()`, drive it with `resume()` until done,
//! cancel it early with `abort()`. Payload panics are captured at the
//! trampoline boundary and re-raised here, after the fiber has safely
//! yielded all the way back out; they never cross a raw stack switch.

use std::any::Any;
use std::panic;

use crate::context;
use crate::fiber::{Fiber, Handle, Outcome, Payload};
use weft_core::error::fatal_error;

/// Executor for a function that may yield control back to the caller
/// before it is finished
pub struct Resumable {
    /// Stored until `run()` attaches it to a fiber
    payload: Option<Payload>,

    /// The executing fiber; `None` once the payload finished and the fiber
    /// went back to the context
    fiber: Option<Box<Fiber>>,

    done: bool,
    result: Option<Box<dyn Any>>,
}

impl Resumable {
    /// Create an instance around `f`. Execution starts with [`run`].
    ///
    /// [`run`]: Resumable::run
    pub fn new<F, R>(f: F) -> Resumable
    where
        F: FnOnce(&mut Handle) -> R + 'static,
        R: Any,
    {
        let payload: Payload = Box::new(move |handle: &mut Handle| -> Box<dyn Any> {
            Box::new(f(handle))
        });
        Resumable {
            payload: Some(payload),
            fiber: None,
            done: false,
            result: None,
        }
    }

    /// Start execution. Acquires a fiber (cached or new) for the payload.
    /// Must be called exactly once.
    pub fn run(&mut self) {
        assert!(
            self.fiber.is_none() && !self.done,
            "resumable already started"
        );
        let Some(payload) = self.payload.take() else {
            panic!("resumable has no function to run");
        };

        let mut fiber = Fiber::create();
        fiber.set_payload(payload);
        self.fiber = Some(fiber);

        self.enter(|fiber| fiber.run());
    }

    /// Continue a computation that has yielded
    pub fn resume(&mut self) {
        assert!(!self.done, "resume on a finished resumable");
        assert!(self.fiber.is_some(), "resume before run");
        self.enter(|fiber| fiber.resume());
    }

    /// Cancel a yielded computation without resuming it. Its call stack
    /// unwinds first, running destructors; the resumable becomes done with
    /// no result and no propagated panic. A no-op when no fiber is
    /// attached.
    pub fn abort(&mut self) {
        if self.fiber.is_none() {
            return;
        }
        self.enter(|fiber| fiber.abort());
    }

    /// True once the payload completed, panicked, or was aborted
    #[inline]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// True if the payload completed orderly and provided a result
    #[inline]
    pub fn has_result(&self) -> bool {
        self.result.is_some()
    }

    /// The payload's result.
    ///
    /// Panics if no result is available (check [`has_result`]) or if `T`
    /// is not the payload's return type.
    ///
    /// [`has_result`]: Resumable::has_result
    pub fn get<T: Any>(&self) -> &T {
        let result = match &self.result {
            Some(r) => r,
            None => panic!("resumable result is not available"),
        };
        match result.downcast_ref::<T>() {
            Some(value) => value,
            None => panic!("mismatch in resumable result type"),
        }
    }

    /// Activate the fiber with this resumable registered as the context's
    /// innermost one (so the free `yield_now` can find it), then collect
    /// whatever the activation left behind.
    fn enter(&mut self, go: impl FnOnce(&mut Fiber)) {
        let ctx = context::acquire();
        {
            let Some(fiber) = self.fiber.as_mut() else {
                unreachable!()
            };
            unsafe {
                let previous = (*ctx).resumable;
                (*ctx).resumable = &mut **fiber as *mut Fiber;
                go(&mut **fiber);
                (*ctx).resumable = previous;
            }
        }
        self.collect();
    }

    /// Post-activation bookkeeping: on completion, detach the fiber,
    /// return it to the context, and surface the outcome. A fiber that
    /// merely yielded stays attached for a future `resume()`.
    fn collect(&mut self) {
        let finished = match &self.fiber {
            Some(fiber) => fiber.is_done(),
            None => return,
        };
        if !finished {
            return;
        }

        let Some(mut fiber) = self.fiber.take() else {
            return;
        };
        self.done = true;

        match fiber.take_outcome() {
            Outcome::Returned(value) => {
                self.result = Some(value);
                Fiber::destroy(fiber);
            }
            Outcome::Aborted => {
                self.result = None;
                Fiber::destroy(fiber);
            }
            Outcome::Unwound(cause) => {
                self.result = None;
                Fiber::destroy(fiber);
                panic::resume_unwind(cause);
            }
            Outcome::Pending => fatal_error("fiber went idle without recording an outcome"),
        }
    }
}

impl Drop for Resumable {
    fn drop(&mut self) {
        // A still-suspended fiber is aborted inside destroy, unwinding the
        // payload's frames before the fiber is cached or freed.
        if let Some(fiber) = self.fiber.take() {
            Fiber::destroy(fiber);
        }
    }
}

/// Execute a resumable function: construct it and immediately start it
pub fn execute<F, R>(f: F) -> Resumable
where
    F: FnOnce(&mut Handle) -> R + 'static,
    R: Any,
{
    let mut resumable = Resumable::new(f);
    resumable.run();
    resumable
}

/// Suspend the innermost active resumable computation.
///
/// Panics when called outside any resumable payload; suspension has no
/// meaning there.
pub fn yield_now() {
    let ctx = context::get();
    let fiber = if ctx.is_null() {
        std::ptr::null_mut()
    } else {
        unsafe { (*ctx).resumable }
    };
    if fiber.is_null() {
        panic!("'yield' in non-suspendable context");
    }
    unsafe {
        (*fiber).suspend();
        (*ctx).resumable = fiber;
    }
}

/// Eagerly populate this thread's fiber cache to its configured size
pub fn prime_cache() {
    Fiber::prime_cache();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FiberConfig;
    use crate::fiber::{check_stack, StackSizeExceeded};
    use serial_test::serial;
    use std::cell::{Cell, RefCell};
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::rc::Rc;
    use weft_core::stats;

    /// Appends "ctor"/"dtor" to a shared log over its lifetime
    struct DtorProbe {
        log: Rc<RefCell<String>>,
    }

    impl DtorProbe {
        fn new(log: Rc<RefCell<String>>) -> DtorProbe {
            log.borrow_mut().push_str("ctor");
            DtorProbe { log }
        }
    }

    impl Drop for DtorProbe {
        fn drop(&mut self) {
            self.log.borrow_mut().push_str("dtor");
        }
    }

    #[test]
    #[serial]
    fn test_execute_immediate_result() {
        context::init();
        context::reset();

        let log = Rc::new(RefCell::new(String::new()));
        let probe_log = log.clone();
        let r = execute(move |_: &mut Handle| {
            let _probe = DtorProbe::new(probe_log);
            42i64
        });

        assert!(r.is_done());
        assert!(r.has_result());
        assert_eq!(*r.get::<i64>(), 42);
        assert_eq!(*log.borrow(), "ctordtor");

        let s = stats::statistics();
        assert_eq!(s.live, 0);
        assert_eq!(s.cached, 1);
        assert_eq!(s.total, 1);
    }

    #[test]
    #[serial]
    fn test_yield_and_resume() {
        context::init();

        let text = Rc::new(RefCell::new(String::new()));
        let inner = text.clone();
        let mut r = execute(move |h: &mut Handle| {
            inner.borrow_mut().push_str("Hello");
            h.yield_now();
            inner.borrow_mut().push_str(" from");
            h.yield_now();
            inner.borrow_mut().push_str(" fiber");
            7u32
        });

        assert!(!r.is_done());
        assert_eq!(*text.borrow(), "Hello");

        r.resume();
        assert!(!r.is_done());
        assert_eq!(*text.borrow(), "Hello from");

        r.resume();
        assert!(r.is_done());
        assert!(r.has_result());
        assert_eq!(*r.get::<u32>(), 7);
        assert_eq!(*text.borrow(), "Hello from fiber");
    }

    #[test]
    #[serial]
    fn test_free_yield_now() {
        context::init();

        let steps = Rc::new(Cell::new(0u32));
        let inner = steps.clone();
        let mut r = execute(move |_: &mut Handle| {
            inner.set(1);
            yield_now();
            inner.set(2);
            "done"
        });

        assert!(!r.is_done());
        assert_eq!(steps.get(), 1);

        r.resume();
        assert!(r.is_done());
        assert_eq!(steps.get(), 2);
        assert_eq!(*r.get::<&str>(), "done");
    }

    #[test]
    #[serial]
    fn test_yield_outside_payload_panics() {
        context::init();
        let err = catch_unwind(yield_now);
        assert!(err.is_err());
    }

    #[test]
    #[serial]
    fn test_payload_panic_propagates_from_run() {
        context::init();

        let log = Rc::new(RefCell::new(String::new()));
        let probe_log = log.clone();
        let mut r = Resumable::new(move |_: &mut Handle| -> u32 {
            let _probe = DtorProbe::new(probe_log);
            panic!("boom");
        });

        let cause = catch_unwind(AssertUnwindSafe(|| r.run())).unwrap_err();
        assert_eq!(cause.downcast_ref::<&str>().copied(), Some("boom"));

        assert!(r.is_done());
        assert!(!r.has_result());
        assert_eq!(*log.borrow(), "ctordtor");
    }

    #[test]
    #[serial]
    fn test_payload_panic_propagates_from_resume() {
        context::init();

        let mut r = execute(|h: &mut Handle| -> u8 {
            h.yield_now();
            panic!("kaputt")
        });
        assert!(!r.is_done());

        let cause = catch_unwind(AssertUnwindSafe(|| r.resume())).unwrap_err();
        assert_eq!(cause.downcast_ref::<&str>().copied(), Some("kaputt"));
        assert!(r.is_done());
        assert!(!r.has_result());
    }

    #[test]
    #[serial]
    fn test_abort_runs_cleanup() {
        context::init();

        let log = Rc::new(RefCell::new(String::new()));
        let probe_log = log.clone();
        let mut r = execute(move |h: &mut Handle| {
            let _probe = DtorProbe::new(probe_log);
            h.yield_now();
            1u8
        });

        assert!(!r.is_done());
        assert_eq!(*log.borrow(), "ctor");

        r.abort();
        assert!(r.is_done());
        assert!(!r.has_result());
        assert_eq!(*log.borrow(), "ctordtor");
    }

    #[test]
    #[serial]
    fn test_abort_without_fiber_is_noop() {
        context::init();

        let mut never_started = Resumable::new(|_: &mut Handle| 0u8);
        never_started.abort();
        assert!(!never_started.is_done());

        let mut finished = execute(|_: &mut Handle| 3u8);
        assert!(finished.is_done());
        finished.abort();
        assert!(finished.is_done());
        assert_eq!(*finished.get::<u8>(), 3);
    }

    #[test]
    #[serial]
    fn test_drop_aborts_suspended_fiber() {
        context::init();

        let log = Rc::new(RefCell::new(String::new()));
        let probe_log = log.clone();
        {
            let _r = execute(move |h: &mut Handle| {
                let _probe = DtorProbe::new(probe_log);
                h.yield_now();
                0u8
            });
            assert_eq!(*log.borrow(), "ctor");
        }
        assert_eq!(*log.borrow(), "ctordtor");
    }

    #[test]
    #[serial]
    fn test_reuse_from_cache() {
        context::init();
        context::reset();

        let counter = Rc::new(Cell::new(0u32));

        let c1 = counter.clone();
        let r1 = execute(move |_: &mut Handle| c1.set(c1.get() + 1));
        assert!(r1.is_done());

        let c2 = counter.clone();
        let r2 = execute(move |_: &mut Handle| c2.set(c2.get() + 1));
        assert!(r2.is_done());

        assert_eq!(counter.get(), 2);

        let s = stats::statistics();
        assert_eq!(s.total, 1);
        assert_eq!(s.live, 0);
        assert_eq!(s.cached, 1);
        assert_eq!(s.trampoline_entries, 1);
    }

    #[test]
    #[serial]
    fn test_statistics_flow() {
        context::init();
        context::reset();

        let suspender = |h: &mut Handle| {
            h.yield_now();
        };

        let mut r1 = execute(suspender);
        let mut r2 = execute(suspender);
        r2.resume();
        assert!(r2.is_done());

        let mut r3 = execute(suspender); // reuses r2's fiber from the cache
        r1.resume();
        assert!(r1.is_done());

        let s = stats::statistics();
        assert_eq!(s.total, 2);
        assert_eq!(s.live, 1);
        assert_eq!(s.cached, 1);
        assert_eq!(s.max_live, 2);
        assert_eq!(s.trampoline_entries, 2);

        r3.resume();
        assert!(r3.is_done());

        let s = stats::statistics();
        assert_eq!(s.total, 2);
        assert_eq!(s.live, 0);
        assert_eq!(s.cached, 2);
        assert_eq!(s.max_live, 2);
        assert_eq!(s.trampoline_entries, 2);
    }

    #[test]
    #[serial]
    fn test_cache_bound() {
        context::init_with(FiberConfig::default().cache_max(2));
        context::reset();

        let suspender = |h: &mut Handle| {
            h.yield_now();
        };

        let mut pending: Vec<Resumable> = (0..3).map(|_| execute(suspender)).collect();
        assert_eq!(stats::statistics().live, 3);

        for r in &mut pending {
            r.resume();
            assert!(r.is_done());
        }

        let s = stats::statistics();
        assert_eq!(s.total, 3);
        assert_eq!(s.max_live, 3);
        assert_eq!(s.live, 0);
        assert_eq!(s.cached, 2); // the third fiber was actually freed
    }

    #[test]
    #[serial]
    fn test_prime_cache() {
        context::init();
        context::reset();

        let s = stats::statistics();
        assert_eq!(s.live, 0);
        assert_eq!(s.cached, 0);

        prime_cache();

        let expected = FiberConfig::default().cache_max as u64;
        let s = stats::statistics();
        assert_eq!(s.cached, expected);
        assert_eq!(s.total, expected);
        assert_eq!(s.live, 0);
    }

    #[test]
    #[serial]
    fn test_second_payload_sees_clean_reused_fiber() {
        context::init();
        context::reset();

        let r1 = execute(|_: &mut Handle| {
            let scribble = [0xEEu8; 1024];
            std::hint::black_box(&scribble);
            0u8
        });
        assert!(r1.is_done());

        let r2 = execute(|_: &mut Handle| {
            let fresh = [0u8; 1024];
            std::hint::black_box(&fresh);
            fresh.iter().all(|&b| b == 0)
        });
        assert!(*r2.get::<bool>());
        assert_eq!(stats::statistics().total, 1); // same physical fiber
    }

    #[test]
    #[serial]
    fn test_shared_stack_round_trip() {
        context::init();

        let patterned = |pattern: u8| {
            execute(move |h: &mut Handle| {
                let buf = [pattern; 512];
                std::hint::black_box(&buf);
                h.yield_now();
                buf.iter().all(|&b| b == pattern)
            })
        };

        // Both fibers park suspended state on the same physical stack.
        let mut r1 = patterned(0xA5);
        let mut r2 = patterned(0x5A);

        r1.resume();
        r2.resume();
        assert!(*r1.get::<bool>());
        assert!(*r2.get::<bool>());
    }

    #[test]
    #[serial]
    fn test_strict_caller_nesting() {
        context::init();

        let order = Rc::new(RefCell::new(Vec::<&'static str>::new()));
        let outer_order = order.clone();
        let mut outer = execute(move |h: &mut Handle| {
            outer_order.borrow_mut().push("outer-start");

            let inner_order = outer_order.clone();
            let mut inner = execute(move |h2: &mut Handle| {
                inner_order.borrow_mut().push("inner-start");
                h2.yield_now();
                inner_order.borrow_mut().push("inner-end");
                0u8
            });

            // Inner's yield returned control here, not to main.
            outer_order.borrow_mut().push("outer-mid");
            h.yield_now();

            outer_order.borrow_mut().push("outer-resumed");
            inner.resume();
            outer_order.borrow_mut().push("outer-end");
            0u8
        });

        order.borrow_mut().push("main");
        outer.resume();
        assert!(outer.is_done());

        assert_eq!(
            *order.borrow(),
            vec![
                "outer-start",
                "inner-start",
                "outer-mid",
                "main",
                "outer-resumed",
                "inner-end",
                "outer-end",
            ]
        );
    }

    fn recurse_until_checked(n: u64) -> u64 {
        check_stack(); // raises StackSizeExceeded well before the guard page

        let pad = [0u8; 512];
        std::hint::black_box(&pad);

        if n == 0 {
            return 0;
        }
        let result = recurse_until_checked(n - 1) + 1;
        std::hint::black_box(result)
    }

    #[test]
    #[serial]
    fn test_check_stack_raises_before_overflow() {
        context::init();

        let mut r = Resumable::new(|_: &mut Handle| recurse_until_checked(1_000_000_000));
        let cause = catch_unwind(AssertUnwindSafe(|| r.run())).unwrap_err();
        assert!(cause.is::<StackSizeExceeded>());
        assert!(r.is_done());
        assert!(!r.has_result());
    }

    #[test]
    #[serial]
    fn test_run_twice_is_an_error() {
        context::init();

        let mut r = execute(|_: &mut Handle| 0u8);
        assert!(r.is_done());
        assert!(catch_unwind(AssertUnwindSafe(|| r.run())).is_err());
    }

    #[test]
    #[serial]
    fn test_result_type_mismatch_panics() {
        context::init();

        let r = execute(|_: &mut Handle| 42i64);
        assert!(catch_unwind(AssertUnwindSafe(|| *r.get::<String>() == String::new())).is_err());
    }
}

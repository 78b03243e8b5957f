//! AddressSanitizer fiber-switch bookkeeping
//!
//! ASAN tracks one shadow stack per thread and gets confused when execution
//! moves to a different stack region behind its back. Every switch is
//! therefore bracketed with the sanitizer's start/finish hooks, recording
//! the outgoing fiber's fake-stack handle and the incoming fiber's real
//! stack bounds. The very first finish hook on a context back-fills the
//! main fiber's bounds, which are unknown until the first switch away from
//! it.
//!
//! Without the `asan` feature both hooks are empty inline functions.

#[cfg(feature = "asan")]
mod imp {
    use crate::context::FiberContext;
    use crate::fiber::Fiber;
    use std::os::raw::c_void;
    use std::ptr;

    extern "C" {
        fn __sanitizer_start_switch_fiber(
            fake_stack_save: *mut *mut c_void,
            bottom: *const c_void,
            size: usize,
        );
        fn __sanitizer_finish_switch_fiber(
            fake_stack_save: *mut c_void,
            bottom_old: *mut *const c_void,
            size_old: *mut usize,
        );
    }

    /// Sanitizer bookkeeping carried by each fiber
    pub(crate) struct AsanState {
        /// Low bound of the fiber's stack as reported to the sanitizer
        pub(crate) stack: *const c_void,

        /// Size of that stack
        pub(crate) stack_size: usize,

        /// The sanitizer's fake-stack handle for this fiber, updated on
        /// every switch away from it
        pub(crate) fake_stack: *mut c_void,
    }

    impl AsanState {
        pub(crate) fn new(stack_low: *const u8, stack_size: usize) -> AsanState {
            AsanState {
                stack: stack_low as *const c_void,
                stack_size,
                fake_stack: ptr::null_mut(),
            }
        }
    }

    /// Run just before switching away from the current fiber
    pub(crate) unsafe fn start_switch_fiber(ctx: *mut FiberContext, to: *mut Fiber) {
        let current = (*ctx).current;
        __sanitizer_start_switch_fiber(
            &mut (*current).asan.fake_stack,
            (*to).asan.stack,
            (*to).asan.stack_size,
        );
    }

    /// Run just after a switch landed on the current fiber
    pub(crate) unsafe fn finish_switch_fiber(ctx: *mut FiberContext) {
        if ctx.is_null() {
            return;
        }
        let current = (*ctx).current;
        let mut prev_bottom: *const c_void = ptr::null();
        let mut prev_size: usize = 0;
        __sanitizer_finish_switch_fiber(
            (*current).asan.fake_stack,
            &mut prev_bottom,
            &mut prev_size,
        );

        // The first call on a context is by construction the switch away
        // from the main fiber; its bounds become known only now.
        let main: *mut Fiber = &mut *(*ctx).main;
        if (*main).asan.stack.is_null() {
            (*main).asan.stack = prev_bottom;
            (*main).asan.stack_size = prev_size;
        }
    }
}

#[cfg(not(feature = "asan"))]
mod imp {
    use crate::context::FiberContext;
    use crate::fiber::Fiber;

    #[inline(always)]
    pub(crate) unsafe fn start_switch_fiber(_ctx: *mut FiberContext, _to: *mut Fiber) {}

    #[inline(always)]
    pub(crate) unsafe fn finish_switch_fiber(_ctx: *mut FiberContext) {}
}

pub(crate) use imp::*;

//! # weft - Cooperative Stackful Fibers
//!
//! Suspend an in-progress computation at any call depth and resume it
//! later, without OS threads.
//!
//! ## Features
//!
//! - **Resumable computations**: run a closure that can `yield_now()` at
//!   any call depth; drive it with `resume()`, cancel it with `abort()`
//! - **Shared-stack multiplexing**: many logical fibers time-share one
//!   physical stack region, swapping live bytes through a heap buffer
//! - **Fiber reuse**: finished fibers park in a bounded LIFO cache, so one
//!   physical stack serves an unbounded sequence of computations
//! - **Exception-safe cancellation**: aborting a suspended fiber unwinds
//!   its call stack, running destructors, before the fiber is recycled
//! - **Sanitizer-aware**: the `asan` feature brackets every switch with
//!   the sanitizer's fiber hooks
//!
//! ## Quick Start
//!
//! ```ignore
//! use weft::{execute, yield_now, Handle};
//!
//! fn main() {
//!     weft::init();
//!
//!     let mut r = execute(|_: &mut Handle| {
//!         let mut total = 0u64;
//!         for chunk in 0..4 {
//!             total += chunk;
//!             yield_now(); // suspend; caller decides when to continue
//!         }
//!         total
//!     });
//!
//!     while !r.is_done() {
//!         r.resume();
//!     }
//!     assert_eq!(*r.get::<u64>(), 6);
//!
//!     weft::done();
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                     User Code                          │
//! │        Resumable::run/resume/abort, yield_now          │
//! └────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌────────────────────────────────────────────────────────┐
//! │                   Fiber Context                        │
//! │    main fiber · switch trampoline · cache · stats      │
//! └────────────────────────────────────────────────────────┘
//!                            │
//!              ┌─────────────┴─────────────┐
//!              ▼                           ▼
//!      ┌───────────────┐          ┌────────────────┐
//!      │ shared stack  │          │ context switch │
//!      │ + swap buffer │          │   (naked asm)  │
//!      └───────────────┘          └────────────────┘
//! ```
//!
//! A fiber context is strictly single-threaded: fibers of one context
//! never run in parallel and suspension happens only at `yield_now()`.
//! Each thread that runs fibers gets its own context, created lazily or
//! explicitly via [`init_with`].

// Core API
pub use weft_runtime::{
    check_stack, done, execute, init, init_with, prime_cache, reset, statistics, yield_now,
    FiberConfig, Handle, Resumable, StackSizeExceeded, Statistics,
};

// Logging
pub use weft_core::kprint::{set_log_level, LogLevel};
pub use weft_core::{kdebug, kerror, kinfo, ktrace, kwarn};

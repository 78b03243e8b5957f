//! # weft-runtime
//!
//! Platform-specific fiber engine for weft.
//!
//! This crate provides:
//! - Stack allocation (mmap with guard pages)
//! - Context switching (architecture-specific assembly)
//! - The fiber state machine, switch protocol, and shared-stack swapping
//! - The per-thread fiber context with its reuse cache
//! - The `Resumable` handle and the `yield_now` suspension primitive
//!
//! Everything unsafe or platform-specific is confined to `arch` and
//! `memory`; the state machine, cache, and `Resumable` are ordinary code
//! that calls into them.

#![allow(dead_code)]

pub mod arch;
pub mod config;
pub mod context;
pub mod memory;
pub mod resumable;

mod debug;
mod fiber;
mod sanitizer;
mod stack_buffer;

// Re-exports
pub use config::FiberConfig;
pub use context::{done, init, init_with, reset};
pub use fiber::{check_stack, Handle, StackSizeExceeded};
pub use resumable::{execute, prime_cache, yield_now, Resumable};
pub use weft_core::stats::{statistics, Statistics};

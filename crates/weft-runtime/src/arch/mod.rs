//! Architecture-specific context switching
//!
//! The only assembly surface in the engine: saving/restoring callee-saved
//! registers, priming a fresh stack to enter a trampoline, and reading the
//! live stack pointer.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub mod x86_64;
        pub use x86_64::{context_switch, current_stack_pointer, init_context, SwitchRegs};
    } else if #[cfg(target_arch = "aarch64")] {
        pub mod aarch64;
        pub use aarch64::{context_switch, current_stack_pointer, init_context, SwitchRegs};
    } else {
        compile_error!("Unsupported architecture");
    }
}

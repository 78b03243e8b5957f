//! x86_64 context switching implementation
//!
//! Uses inline assembly for the switch. Stable since Rust 1.88.

use std::arch::naked_asm;

/// Callee-saved register file for a voluntary switch (System V AMD64 ABI)
#[repr(C)]
#[derive(Debug, Default)]
pub struct SwitchRegs {
    pub rsp: u64,
    pub rip: u64,
    pub rbx: u64,
    pub rbp: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
}

impl SwitchRegs {
    /// Stack pointer as last saved by a switch away from this context.
    /// Only meaningful while the fiber is suspended.
    #[inline]
    pub fn stack_pointer(&self) -> *mut u8 {
        self.rsp as *mut u8
    }
}

/// Initialize a fiber's register context
///
/// Sets up `regs` so that the next switch into it begins execution at
/// `entry_fn(entry_arg)` via the entry trampoline.
///
/// # Safety
///
/// `regs` must point to valid `SwitchRegs` memory and `stack_top` must be
/// the high end of a mapped stack region.
#[inline]
pub unsafe fn init_context(
    regs: *mut SwitchRegs,
    stack_top: *mut u8,
    entry_fn: usize,
    entry_arg: usize,
) {
    let sp = stack_top as usize;

    // Align to 16 bytes; the entry trampoline is reached by a plain jump,
    // and its `call` then gives the entry function the post-call alignment
    // the System V ABI promises.
    let aligned_sp = sp & !0xF;

    let regs = &mut *regs;
    regs.rsp = aligned_sp as u64;
    regs.rip = fiber_entry_trampoline as usize as u64;
    regs.rbx = 0;
    regs.rbp = 0;
    regs.r12 = entry_fn as u64;
    regs.r13 = entry_arg as u64;
    regs.r14 = 0;
    regs.r15 = 0;
}

/// Trampoline that calls the entry function with its argument
///
/// Entry functions never return; the fall-through lands in `fiber_bottom`,
/// which aborts.
#[unsafe(naked)]
pub unsafe extern "C" fn fiber_entry_trampoline() {
    naked_asm!(
        "mov rdi, r13",
        "call r12",
        "call {bottom}",
        "ud2",
        bottom = sym fiber_bottom,
    );
}

/// Perform a voluntary context switch
///
/// Saves callee-saved registers to `old` and loads from `new`.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(_old: *mut SwitchRegs, _new: *const SwitchRegs) {
    naked_asm!(
        // Save callee-saved registers to old (RDI)
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 1f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        // Load callee-saved registers from new (RSI)
        "mov rsp, [rsi + 0x00]",
        "mov rax, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        // Jump to new RIP
        "jmp rax",
        // Return point for the saved context
        "1:",
        "ret",
    );
}

/// Read the caller's stack pointer
#[unsafe(naked)]
pub unsafe extern "C" fn current_stack_pointer() -> *mut u8 {
    naked_asm!(
        // RSP still includes our return address; report the caller's value
        "lea rax, [rsp + 8]",
        "ret",
    );
}

/// Dropped onto the bottom of every fiber stack; an entry function that
/// returns is an internal error.
extern "C" fn fiber_bottom() {
    weft_core::fatal_error("fiber entry function returned");
}

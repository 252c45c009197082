// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::{
    arch::naked_asm,
    ffi::c_void,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Saved machine context: the callee-saved registers of the AAPCS64 ABI.
///
/// `pc` holds the resume address and is restored into the link register, so restoring a context ends in a plain
/// `ret`. AAPCS64 makes the low halves of v8–v15 callee-saved, hence the `d` block. Field offsets are hard-coded in
/// the assembly below.
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub struct Context {
    sp: u64,
    pc: u64,
    x19: u64,
    x20: u64,
    x21: u64,
    x22: u64,
    x23: u64,
    x24: u64,
    x25: u64,
    x26: u64,
    x27: u64,
    x28: u64,
    fp: u64,
    d: [u64; 8],
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Saves the current context into `save` and resumes the context in `load`.
///
/// Returns when another flow restores `save`.
///
/// # Safety
/// Both pointers must be valid; `load` must hold a context that was previously saved by one of the primitives in this
/// module and has not been resumed since.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(_save: *mut Context, _load: *const Context) {
    naked_asm!(
        // Save callee-saved state into the old context (x0). The link register is the resume address.
        "mov x9, sp",
        "str x9, [x0, #0x00]",
        "str x30, [x0, #0x08]",
        "stp x19, x20, [x0, #0x10]",
        "stp x21, x22, [x0, #0x20]",
        "stp x23, x24, [x0, #0x30]",
        "stp x25, x26, [x0, #0x40]",
        "stp x27, x28, [x0, #0x50]",
        "str x29, [x0, #0x60]",
        "stp d8, d9, [x0, #0x68]",
        "stp d10, d11, [x0, #0x78]",
        "stp d12, d13, [x0, #0x88]",
        "stp d14, d15, [x0, #0x98]",
        // Load the new context (x1) and return into it.
        "ldr x9, [x1, #0x00]",
        "mov sp, x9",
        "ldr x30, [x1, #0x08]",
        "ldp x19, x20, [x1, #0x10]",
        "ldp x21, x22, [x1, #0x20]",
        "ldp x23, x24, [x1, #0x30]",
        "ldp x25, x26, [x1, #0x40]",
        "ldp x27, x28, [x1, #0x50]",
        "ldr x29, [x1, #0x60]",
        "ldp d8, d9, [x1, #0x68]",
        "ldp d10, d11, [x1, #0x78]",
        "ldp d12, d13, [x1, #0x88]",
        "ldp d14, d15, [x1, #0x98]",
        "ret",
    )
}

/// Resumes the context in `load` without saving the current one. Used when the current flow is never coming back.
///
/// # Safety
/// As [context_switch]; additionally, the current stack must no longer be relied upon by anyone.
#[unsafe(naked)]
pub unsafe extern "C" fn context_load(_load: *const Context) -> ! {
    naked_asm!(
        "ldr x9, [x0, #0x00]",
        "mov sp, x9",
        "ldr x30, [x0, #0x08]",
        "ldp x19, x20, [x0, #0x10]",
        "ldp x21, x22, [x0, #0x20]",
        "ldp x23, x24, [x0, #0x30]",
        "ldp x25, x26, [x0, #0x40]",
        "ldp x27, x28, [x0, #0x50]",
        "ldr x29, [x0, #0x60]",
        "ldp d8, d9, [x0, #0x68]",
        "ldp d10, d11, [x0, #0x78]",
        "ldp d12, d13, [x0, #0x88]",
        "ldp d14, d15, [x0, #0x98]",
        "ret",
    )
}

/// Saves the current context into `save`, switches the machine stack pointer to `stack_top` and calls
/// `entry(arg)` on the fresh stack.
///
/// # Safety
/// `save` must be valid, `stack_top` must be the high end of an owned region large enough for `entry`, and `entry`
/// must never return.
#[unsafe(naked)]
pub unsafe extern "C" fn context_call_on_stack(
    _save: *mut Context,
    _stack_top: *mut u8,
    _entry: extern "C" fn(*mut c_void) -> !,
    _arg: *mut c_void,
) {
    naked_asm!(
        // Save the spawning flow exactly as context_switch does.
        "mov x9, sp",
        "str x9, [x0, #0x00]",
        "str x30, [x0, #0x08]",
        "stp x19, x20, [x0, #0x10]",
        "stp x21, x22, [x0, #0x20]",
        "stp x23, x24, [x0, #0x30]",
        "stp x25, x26, [x0, #0x40]",
        "stp x27, x28, [x0, #0x50]",
        "str x29, [x0, #0x60]",
        "stp d8, d9, [x0, #0x68]",
        "stp d10, d11, [x0, #0x78]",
        "stp d12, d13, [x0, #0x88]",
        "stp d14, d15, [x0, #0x98]",
        // Install the private stack. The ABI wants sp 16-aligned at all times.
        "and x1, x1, #0xfffffffffffffff0",
        "mov sp, x1",
        // First argument register carries the coroutine argument.
        "mov x0, x3",
        "br x2",
        // The entry function never returns.
        "brk #0",
    )
}

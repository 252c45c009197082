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

/// Saved machine context: the callee-saved registers of the System V AMD64 ABI.
///
/// The saved stack pointer points at a return address, so restoring a context is a register reload followed by `ret`.
/// Field offsets are hard-coded in the assembly below.
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub struct Context {
    rsp: u64,
    rbp: u64,
    rbx: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
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
        // Save callee-saved registers into the old context (rdi). rsp still points at our return
        // address, which is where this flow resumes when the context is next restored.
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], rbp",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], r13",
        "mov [rdi + 0x28], r14",
        "mov [rdi + 0x30], r15",
        // Load callee-saved registers from the new context (rsi) and return into it.
        "mov rsp, [rsi + 0x00]",
        "mov rbp, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov r12, [rsi + 0x18]",
        "mov r13, [rsi + 0x20]",
        "mov r14, [rsi + 0x28]",
        "mov r15, [rsi + 0x30]",
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
        "mov rsp, [rdi + 0x00]",
        "mov rbp, [rdi + 0x08]",
        "mov rbx, [rdi + 0x10]",
        "mov r12, [rdi + 0x18]",
        "mov r13, [rdi + 0x20]",
        "mov r14, [rdi + 0x28]",
        "mov r15, [rdi + 0x30]",
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
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], rbp",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], r13",
        "mov [rdi + 0x28], r14",
        "mov [rdi + 0x30], r15",
        // Install the private stack. The ABI wants rsp 16-aligned before a call.
        "and rsi, -16",
        "mov rsp, rsi",
        // First argument register carries the coroutine argument.
        "mov rdi, rcx",
        "call rdx",
        // The entry function never returns.
        "ud2",
    )
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Stackful context switching.
//!
//! Three primitives, all necessarily architecture-specific:
//!
//! - [context_switch] saves the callee-saved state of the current flow and resumes another saved context. A flow
//!   resumes exactly at its own save point, so the save side needs no discriminator.
//! - [context_load] is the restore-only half, used by the exit path where the dying context must not be saved.
//! - [context_call_on_stack] is the first-call trampoline: it saves the current context, installs a private stack,
//!   places the argument in the first-argument register and calls the entry function. It is used exactly once per
//!   coroutine; afterwards the coroutine always resumes through [context_switch] or [context_load].
//!
//! Only targets with an implementation here can host the runtime; anything else must fail compilation rather than
//! fall back to primitives without a true independent stack.

#[cfg(any(all(target_arch = "x86_64", not(windows)), target_arch = "aarch64"))]
#[cfg_attr(all(target_arch = "x86_64", not(windows)), path = "x86_64.rs")]
#[cfg_attr(target_arch = "aarch64", path = "aarch64.rs")]
mod arch;

#[cfg(not(any(all(target_arch = "x86_64", not(windows)), target_arch = "aarch64")))]
compile_error!("context switching is not implemented for this target");

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::arch::{
    context_call_on_stack,
    context_load,
    context_switch,
    Context,
};

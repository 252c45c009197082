// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::limits;
use ::std::env;

//======================================================================================================================
// Constants
//======================================================================================================================

/// Environment variable that overrides the coroutine stack size.
const STACK_SIZE_ENV_VAR: &str = "STRAND_STACK_SIZE";

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Resolves the coroutine stack size for a new runtime.
///
/// Reads [STACK_SIZE_ENV_VAR] when set; malformed or degenerate values fall back to the default.
pub fn stack_size() -> usize {
    match env::var(STACK_SIZE_ENV_VAR) {
        Ok(value) => match value.parse::<usize>() {
            Ok(size) if size >= limits::STACK_ALIGN => size,
            _ => {
                warn!(
                    "stack_size(): ignoring malformed {}={:?}, using {}",
                    STACK_SIZE_ENV_VAR,
                    value,
                    limits::DEFAULT_STACK_SIZE
                );
                limits::DEFAULT_STACK_SIZE
            },
        },
        Err(_) => limits::DEFAULT_STACK_SIZE,
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Strand: a single-threaded cooperative multitasking runtime.
//!
//! Concurrency is expressed as a set of independently-stacked coroutines that
//! rendezvous through message queues. There is exactly one OS-level control
//! flow per runtime; coroutines hand execution to each other only at explicit
//! transfer points (yield, join, a blocking queue operation, or returning
//! from the task), so no locking is required or permitted.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

#[macro_use]
extern crate log;

mod collections;

pub mod runtime;

pub use crate::runtime::{
    coroutine::{
        current,
        self_data,
        self_data_set,
        spawn,
        suspend_self,
        CoroutineState,
        SharedCoroutine,
    },
    fail::Fail,
    queue::SharedQueue,
    scheduler::{
        pooled_stack_count,
        yield_now,
    },
};

//======================================================================================================================
// Macros
//======================================================================================================================

/// Ensures that two expressions are equal, bailing out of an [anyhow::Result] test otherwise.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    ::anyhow::bail!(
                        r#"ensure failed: `(left == right)` left: `{:?}`, right: `{:?}`"#,
                        left_val,
                        right_val
                    );
                }
            },
        }
    }};
}

/// Ensures that two expressions are not equal, bailing out of an [anyhow::Result] test otherwise.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if *left_val == *right_val {
                    ::anyhow::bail!(
                        r#"ensure failed: `(left != right)` left: `{:?}`, right: `{:?}`"#,
                        left_val,
                        right_val
                    );
                }
            },
        }
    }};
}

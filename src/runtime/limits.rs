// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

/// Default size for a coroutine stack.
/// A small multiple of the page size; deep call chains across suspension points must fit in this.
pub const DEFAULT_STACK_SIZE: usize = 4096 * 8;

/// Alignment of coroutine stack allocations. Both supported ABIs require 16-byte stack alignment.
pub const STACK_ALIGN: usize = 16;

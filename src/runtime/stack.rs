// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::limits;
use ::std::{
    alloc::{
        alloc,
        dealloc,
        handle_alloc_error,
        Layout,
    },
    cell::UnsafeCell,
    ptr::NonNull,
    rc::Rc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// A single-threaded pool of homogeneously-sized coroutine stacks.
///
/// Stacks are the dominant allocation of the runtime; recycling them through a LIFO free-list amortizes the cost
/// across spawn/destroy churn. Guard pages and growable stacks are non-goals.
pub struct StackPool {
    /// Free-list of recycled stack regions (low addresses).
    stacks: UnsafeCell<Vec<NonNull<u8>>>,
    /// Layout of every stack in this pool.
    layout: Layout,
}

/// A stack region from a [StackPool]. Returns to its pool when dropped.
pub struct PooledStack {
    /// Low address of the owned region.
    base: NonNull<u8>,
    /// The pool this region came from.
    pool: Rc<StackPool>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl StackPool {
    /// Creates a new empty pool of stacks of the specified size.
    pub fn new(stack_size: usize) -> Rc<Self> {
        let layout: Layout =
            Layout::from_size_align(stack_size, limits::STACK_ALIGN).expect("stack size must fit a valid layout");
        Rc::new(Self {
            stacks: UnsafeCell::new(Vec::new()),
            layout,
        })
    }

    /// Gets one stack from the pool, allocating a fresh region when the free-list is empty.
    pub fn get(self: &Rc<Self>) -> PooledStack {
        // Safety: the free-list is only granted a &mut alias during the methods of this type. As long as these methods
        // are neither called reentrantly nor concurrently, aliasing is obeyed.
        let stacks: &mut Vec<NonNull<u8>> = unsafe { &mut *self.stacks.get() };
        let base: NonNull<u8> = match stacks.pop() {
            Some(base) => base,
            None => {
                // Safety: the layout has non-zero size.
                let region: *mut u8 = unsafe { alloc(self.layout) };
                match NonNull::new(region) {
                    Some(base) => base,
                    // Stack exhaustion is unrecoverable.
                    None => handle_alloc_error(self.layout),
                }
            },
        };
        PooledStack {
            base,
            pool: self.clone(),
        }
    }

    /// Returns the number of free stacks on the pool's free-list.
    pub fn len(self: &Rc<Self>) -> usize {
        // Safety: see [StackPool::get].
        let stacks: &Vec<NonNull<u8>> = unsafe { &*self.stacks.get() };
        stacks.len()
    }

    /// Returns a stack region to the pool.
    fn return_stack(self: &Rc<Self>, base: NonNull<u8>) {
        // Safety: see [StackPool::get].
        let stacks: &mut Vec<NonNull<u8>> = unsafe { &mut *self.stacks.get() };
        stacks.push(base);
    }
}

impl PooledStack {
    /// Returns the top of the region. Stacks grow down on both supported ISAs, so this is where execution starts.
    pub fn top(&self) -> *mut u8 {
        // Safety: the offset stays within the owned allocation (one past its end is allowed).
        unsafe { self.base.as_ptr().add(self.pool.layout.size()) }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Drop for PooledStack {
    fn drop(&mut self) {
        StackPool::return_stack(&self.pool, self.base);
    }
}

/// The pool owns every region on its free-list. Regions still held by a [PooledStack] are returned (and freed by a
/// later pool) only through their own drop; in practice the runtime keeps its pool alive for the thread's lifetime.
impl Drop for StackPool {
    fn drop(&mut self) {
        let stacks: &mut Vec<NonNull<u8>> = self.stacks.get_mut();
        for base in stacks.drain(..) {
            // Safety: each region on the free-list was allocated with this pool's layout.
            unsafe { dealloc(base.as_ptr(), self.layout) };
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

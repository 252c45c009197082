// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The per-thread scheduler: ready queue, current coroutine, root context and deferred reclamation.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    collections::intrusive_list::IntrusiveList,
    runtime::{
        config,
        context::{
            context_call_on_stack,
            context_load,
            context_switch,
            Context,
        },
        coroutine::{
            coroutine_main,
            Coroutine,
            CoroutineState,
            SharedCoroutine,
        },
        logging,
        stack::{
            PooledStack,
            StackPool,
        },
        SharedObject,
    },
};
use ::std::{
    ptr::NonNull,
    rc::Rc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Engine state for one thread. All of it is owned by the single scheduler; primitives rely on the atomicity of
/// cooperative non-preemption instead of locks.
pub struct Runtime {
    /// Context of the initial (root) control flow.
    root_context: Context,
    /// Currently running coroutine. None while the root flow executes.
    current: Option<SharedCoroutine>,
    /// The most recently exited coroutine, whose stack must still be reclaimed. A coroutine cannot release its own
    /// stack while still executing on it, so the release is deferred to the next flow that returns from a switch.
    /// Exits are serialized by the single-threaded scheduler, so one slot is enough.
    exited: Option<SharedCoroutine>,
    /// A coroutine parked outside any queue (Suspended or BlockedSend) whose scheduler reference is to be dropped.
    /// Dropping it while still executing on its stack could recycle that stack, so the drop is deferred like `exited`.
    detached: Option<SharedCoroutine>,
    /// FIFO of runnable coroutines.
    ready: IntrusiveList<Coroutine>,
    /// Free-list of recycled coroutine stacks.
    stack_pool: Rc<StackPool>,
}

/// Cloneable handle to this thread's [Runtime].
#[derive(Clone)]
pub(crate) struct SharedRuntime(SharedObject<Runtime>);

thread_local! {
    /// Each thread hosts an independent runtime, created lazily on first use.
    static RUNTIME: SharedRuntime = SharedRuntime::new();
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Yields time to another coroutine: round-robin handoff through the tail of the ready queue.
///
/// From the root flow this runs ready coroutines until control drains back to root.
pub fn yield_now() {
    let mut runtime: SharedRuntime = SharedRuntime::get();
    runtime.yield_current();
}

/// Returns the number of stacks currently on the runtime's free-list.
///
/// After every coroutine has been destroyed this equals the high-water mark of concurrently-live coroutines.
pub fn pooled_stack_count() -> usize {
    let runtime: SharedRuntime = SharedRuntime::get();
    runtime.0.stack_pool.len()
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SharedRuntime {
    fn new() -> Self {
        logging::initialize();
        Self(SharedObject::new(Runtime {
            root_context: Context::default(),
            current: None,
            exited: None,
            detached: None,
            ready: IntrusiveList::new(),
            stack_pool: StackPool::new(config::stack_size()),
        }))
    }

    /// Returns this thread's runtime.
    pub(crate) fn get() -> Self {
        RUNTIME.with(Self::clone)
    }

    /// Returns the currently running coroutine, or None from the root flow.
    pub(crate) fn current(&self) -> Option<SharedCoroutine> {
        self.0.current.clone()
    }

    /// Checks whether `coroutine` is the currently running one.
    pub(crate) fn is_current(&self, coroutine: &SharedCoroutine) -> bool {
        match &self.0.current {
            Some(current) => SharedCoroutine::ptr_eq(current, coroutine),
            None => false,
        }
    }

    pub(crate) fn take_current(&mut self) -> Option<SharedCoroutine> {
        self.0.as_mut().current.take()
    }

    pub(crate) fn set_current(&mut self, coroutine: SharedCoroutine) {
        self.0.as_mut().current = Some(coroutine);
    }

    /// Gets a stack for a new coroutine.
    pub(crate) fn get_stack(&mut self) -> PooledStack {
        self.0.stack_pool.get()
    }

    /// Returns the address of the ready queue, for parking through [SharedRuntime::transfer].
    pub(crate) fn ready_list(&mut self) -> NonNull<IntrusiveList<Coroutine>> {
        NonNull::from(&mut self.0.as_mut().ready)
    }

    /// Marks `coroutine` runnable and pushes it onto the tail of the ready queue.
    pub(crate) fn make_ready(&mut self, mut coroutine: SharedCoroutine) {
        coroutine.set_state(CoroutineState::Running);
        let mut ready: NonNull<IntrusiveList<Coroutine>> = self.ready_list();
        unsafe { ready.as_mut() }.push_back(SharedCoroutine::into_inner(coroutine));
    }

    /// Transfers execution to another flow.
    ///
    /// The current coroutine, if any, is recorded in `state` and parked on `park` when one is given; with no park
    /// queue (Suspended, BlockedSend) the scheduler gives up its reference, so the coroutine is afterwards held only
    /// by outstanding handles, a join queue, or a pending message entry. Execution then resumes `next` if given, else
    /// the head of the ready queue, else the root flow. Returns when this flow is scheduled again.
    pub(crate) fn transfer(
        &mut self,
        park: Option<NonNull<IntrusiveList<Coroutine>>>,
        state: CoroutineState,
        next: Option<SharedCoroutine>,
    ) {
        let previous: Option<SharedCoroutine> = self.take_current();
        let save: *mut Context = match &previous {
            Some(coroutine) => coroutine.context_ptr(),
            None => self.root_context_ptr(),
        };
        if let Some(mut coroutine) = previous {
            coroutine.set_state(state);
            match park {
                Some(mut list) => unsafe { list.as_mut() }.push_back(SharedCoroutine::into_inner(coroutine)),
                // The reference may be the last one; dropping it here could recycle the very stack
                // this flow still runs on, so park it in the deferred slot instead.
                None => self.set_detached(coroutine),
            }
        }

        let next: Option<SharedCoroutine> = next.or_else(|| self.pop_ready());
        let load: *const Context = match &next {
            Some(coroutine) => {
                let mut coroutine: SharedCoroutine = coroutine.clone();
                coroutine.set_state(CoroutineState::Running);
                coroutine.context_ptr()
            },
            None => self.root_context_ptr(),
        };
        if let Some(coroutine) = next {
            self.set_current(coroutine);
        }

        // Safety: both contexts live inside reference-counted records that are kept alive across the
        // switch (by the park queue, the deferred slot, outstanding handles, or the runtime itself).
        unsafe { context_switch(save, load) };

        // This flow is running again; release whatever the previous flow left behind.
        self.reclaim();
    }

    /// Round-robin handoff: park the running coroutine on the ready tail and run the next one.
    pub(crate) fn yield_current(&mut self) {
        let ready: NonNull<IntrusiveList<Coroutine>> = self.ready_list();
        self.transfer(Some(ready), CoroutineState::Running, None);
    }

    /// First activation of `coroutine`: saves the spawning flow and enters the coroutine on its private stack.
    /// Returns when the spawning flow is scheduled again.
    pub(crate) fn activate(&mut self, coroutine: SharedCoroutine) {
        let save: *mut Context = match self.current() {
            Some(spawner) => spawner.context_ptr(),
            None => self.root_context_ptr(),
        };
        let stack_top: *mut u8 = coroutine.stack_top();
        // Transfer one reference to the new flow; coroutine_main reconstitutes it.
        let arg: NonNull<Coroutine> = SharedCoroutine::into_raw(coroutine);

        // Safety: the stack is owned by the coroutine and freshly sized; coroutine_main never returns.
        unsafe { context_call_on_stack(save, stack_top, coroutine_main, arg.as_ptr().cast()) };

        self.reclaim();
    }

    /// Final transfer of a coroutine that ran to completion. Publishes the record through the exited slot (its stack
    /// is released by the next flow) and resumes the head of the ready queue or the root flow.
    ///
    /// The caller must be running on `coroutine`'s stack and must not touch it after this call.
    pub(crate) fn exit(mut self, coroutine: SharedCoroutine) -> ! {
        debug_assert!(self.is_current(&coroutine));
        debug_assert!(self.0.exited.is_none());
        self.0.as_mut().exited = Some(coroutine);

        // Drop the scheduler's reference to the dying coroutine; the exited slot keeps the record alive.
        let dying: Option<SharedCoroutine> = self.take_current();
        drop(dying);

        let next: Option<SharedCoroutine> = self.pop_ready();
        let load: *const Context = match &next {
            Some(coroutine) => {
                let mut coroutine: SharedCoroutine = coroutine.clone();
                coroutine.set_state(CoroutineState::Running);
                coroutine.context_ptr()
            },
            None => self.root_context_ptr(),
        };
        if let Some(coroutine) = next {
            self.set_current(coroutine);
        }

        // Nothing on this stack may run a destructor after the jump.
        drop(self);

        // Safety: the target context is kept alive by the runtime (root) or the current slot.
        unsafe { context_load(load) }
    }

    /// Detaches `coroutine` from whatever is holding it: a pending blocking send is surgically cancelled (the payload
    /// stays queued), any queue membership is unlinked. The state becomes Suspended; suspending the running coroutine
    /// transfers away immediately. Idempotent.
    pub(crate) fn suspend(&mut self, coroutine: &SharedCoroutine) {
        // A completed coroutine has no memberships left and must never become resumable again.
        if coroutine.state() == CoroutineState::Completed {
            return;
        }
        trace!("suspend(): state={:?}", coroutine.state());
        coroutine.clone().cancel_pending_send();
        // Unlink from the ready queue, a receiver wait queue, or a join queue; the returned
        // reference (the queue's) drops here.
        IntrusiveList::unlink(SharedCoroutine::inner(coroutine));
        coroutine.clone().set_state(CoroutineState::Suspended);

        if self.is_current(coroutine) {
            self.transfer(None, CoroutineState::Suspended, None);
        }
    }

    /// Detaches `coroutine` and pushes it onto the ready tail.
    pub(crate) fn resume(&mut self, coroutine: &SharedCoroutine) {
        assert!(!self.is_current(coroutine), "cannot resume the running coroutine");
        assert!(
            coroutine.state() != CoroutineState::Completed,
            "cannot resume a completed coroutine"
        );
        trace!("resume(): state={:?}", coroutine.state());

        // Suspend first to cleanly remove the coroutine from any queue.
        self.suspend(coroutine);
        self.make_ready(coroutine.clone());
    }

    fn pop_ready(&mut self) -> Option<SharedCoroutine> {
        self.0.as_mut().ready.pop_front().map(SharedCoroutine::from_inner)
    }

    fn root_context_ptr(&mut self) -> *mut Context {
        &mut self.0.as_mut().root_context
    }

    fn set_detached(&mut self, coroutine: SharedCoroutine) {
        debug_assert!(self.0.detached.is_none());
        self.0.as_mut().detached = Some(coroutine);
    }

    /// Drains the deferred slots left behind by the previous flow: the exited coroutine's stack goes back to the
    /// free-list and the detached reference is dropped. Called after every return from a context switch, which bounds
    /// each slot to at most one occupant.
    fn reclaim(&mut self) {
        if let Some(mut exited) = self.0.as_mut().exited.take() {
            trace!("reclaim(): releasing exited coroutine stack");
            exited.release_stack();
        }
        if let Some(detached) = self.0.as_mut().detached.take() {
            drop(detached);
        }
    }
}

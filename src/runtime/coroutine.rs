// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Coroutine records and the lifecycle operations: spawn, join, suspend, resume, destroy.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    collections::intrusive_list::{
        IntrusiveList,
        IntrusivelyLinked,
        LinkState,
    },
    runtime::{
        context::Context,
        scheduler::SharedRuntime,
        stack::PooledStack,
        SharedObject,
    },
};
use ::std::{
    any::Any,
    ffi::c_void,
    ptr::NonNull,
    rc::Rc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// State of a coroutine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CoroutineState {
    /// The task returned, or the coroutine was destroyed.
    Completed,
    /// Detached from every queue; runs again only after an explicit resume.
    Suspended,
    /// Running, or runnable on the ready queue.
    Running,
    /// Parked in a blocking send, held through the pending message entry.
    BlockedSend,
    /// Parked on a message queue's receiver wait queue.
    BlockedRecv,
    /// Parked on another coroutine's join queue.
    BlockedJoin,
}

/// A coroutine: one independently-stacked, cooperatively-scheduled task.
pub struct Coroutine {
    /// The task to run. Taken exactly once, at first activation.
    task: Option<Box<dyn FnOnce()>>,
    /// Owned stack region. None once reclaimed.
    stack: Option<PooledStack>,
    /// Machine context sufficient to resume at the last suspension point.
    context: Context,
    /// Current state tag.
    state: CoroutineState,
    /// Coroutines waiting for this one to complete.
    join_waiters: IntrusiveList<Coroutine>,
    /// Intrusive membership in at most one coroutine queue (ready, receiver wait, or join).
    link: LinkState<Coroutine>,
    /// When parked in a blocking send, the location of the pending entry's sender field. Lets a suspend surgically
    /// cancel the parked send while leaving the payload in the queue.
    pending_send: Option<NonNull<Option<SharedCoroutine>>>,
    /// Whether the pending blocking send was consumed by a receiver.
    send_delivered: bool,
    /// Opaque client bookkeeping.
    data: Option<Rc<dyn Any>>,
}

/// Handle to a [Coroutine]. Clones refer to the same coroutine; the record is freed when the last clone (and the last
/// queue membership) drops.
#[derive(Clone)]
pub struct SharedCoroutine(SharedObject<Coroutine>);

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Spawns a new coroutine as a separate task.
///
/// The coroutine is created in state Running and runs immediately; control returns to the caller when the new
/// coroutine first yields, blocks, suspends, or completes. A task that panics aborts the process.
pub fn spawn<F: FnOnce() + 'static>(task: F) -> SharedCoroutine {
    let mut runtime: SharedRuntime = SharedRuntime::get();
    let stack: PooledStack = runtime.get_stack();
    let coroutine: SharedCoroutine = SharedCoroutine(SharedObject::new(Coroutine {
        task: Some(Box::new(task)),
        stack: Some(stack),
        context: Context::default(),
        state: CoroutineState::Running,
        join_waiters: IntrusiveList::new(),
        link: LinkState::new(),
        pending_send: None,
        send_delivered: false,
        data: None,
    }));
    trace!("spawn(): entering new coroutine");
    runtime.activate(coroutine.clone());
    coroutine
}

/// Returns the currently running coroutine, or None from the root flow.
pub fn current() -> Option<SharedCoroutine> {
    SharedRuntime::get().current()
}

/// Suspends the currently executing coroutine.
pub fn suspend_self() {
    let coroutine: SharedCoroutine = current().expect("suspend_self() must be called from within a coroutine");
    coroutine.suspend();
}

/// Associates opaque data with the running coroutine.
pub fn self_data_set(data: Rc<dyn Any>) {
    let mut coroutine: SharedCoroutine = current().expect("self_data_set() must be called from within a coroutine");
    coroutine.set_data(data);
}

/// Retrieves the opaque data associated with the running coroutine.
pub fn self_data() -> Option<Rc<dyn Any>> {
    let coroutine: SharedCoroutine = current().expect("self_data() must be called from within a coroutine");
    coroutine.data()
}

/// Entrypoint shim for every coroutine. Runs on the coroutine's private stack; entered exactly once, through the
/// first-call trampoline. A panic cannot unwind past this frame and aborts the process.
pub(crate) extern "C" fn coroutine_main(arg: *mut c_void) -> ! {
    // Reconstitute the reference transferred by the spawner.
    let ptr: NonNull<Coroutine> = NonNull::new(arg.cast::<Coroutine>()).expect("coroutine argument must not be null");
    let mut coroutine: SharedCoroutine = SharedCoroutine(unsafe { SharedObject::from_raw(ptr) });

    {
        let mut runtime: SharedRuntime = SharedRuntime::get();
        // The spawning coroutine becomes runnable again behind us. The root flow instead left its
        // context in the trampoline's save area and is resumed once the ready queue drains.
        if let Some(spawner) = runtime.take_current() {
            runtime.make_ready(spawner);
        }
        runtime.set_current(coroutine.clone());
        let task: Box<dyn FnOnce()> = coroutine.take_task();
        drop(runtime);
        task();
    }

    // Run to completion: joiners become runnable, the record is published for deferred stack
    // reclamation, and control leaves this stack for good.
    let mut runtime: SharedRuntime = SharedRuntime::get();
    while let Some(joined) = coroutine.pop_join_waiter() {
        runtime.resume(&joined);
    }
    coroutine.set_state(CoroutineState::Completed);
    trace!("coroutine_main(): task completed");
    runtime.exit(coroutine)
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SharedCoroutine {
    /// Returns the current state tag. No side effects.
    pub fn state(&self) -> CoroutineState {
        self.0.state
    }

    /// Waits for this coroutine to complete or be destroyed. Only callable from within a coroutine.
    ///
    /// Returns immediately if the target has already completed. A joiner that is suspended and resumed from outside
    /// returns early, before the target completes.
    pub fn join(&self) {
        let mut runtime: SharedRuntime = SharedRuntime::get();
        let caller: SharedCoroutine = runtime.current().expect("join() must be called from within a coroutine");
        assert!(
            !SharedCoroutine::ptr_eq(&caller, self),
            "a coroutine cannot join itself"
        );
        if self.state() == CoroutineState::Completed {
            return;
        }
        let mut target: SharedCoroutine = self.clone();
        let join_list: NonNull<IntrusiveList<Coroutine>> = target.join_list();
        runtime.transfer(Some(join_list), CoroutineState::BlockedJoin, None);
    }

    /// Suspends this coroutine.
    ///
    /// If the coroutine is blocked on a message queue it is removed from the queue; a parked blocking send leaves its
    /// payload behind. A receiver resumed later observes a wake without a message. Idempotent; suspending a completed
    /// coroutine has no effect.
    pub fn suspend(&self) {
        let mut runtime: SharedRuntime = SharedRuntime::get();
        runtime.suspend(self);
    }

    /// Resumes a suspended or blocked coroutine, detaching it from any queue and pushing it onto the ready tail.
    ///
    /// Must not be called on the running coroutine or on a completed one.
    pub fn resume(&self) {
        let mut runtime: SharedRuntime = SharedRuntime::get();
        runtime.resume(self);
    }

    /// Destroys this coroutine.
    ///
    /// The coroutine is suspended as though [SharedCoroutine::suspend] was called, marked Completed, its joiners are
    /// resumed, and its stack is released for reuse. Remaining handle clones stay valid and observe state Completed;
    /// the record itself is freed when the last one drops.
    pub fn destroy(mut self) {
        let mut runtime: SharedRuntime = SharedRuntime::get();
        assert!(!runtime.is_current(&self), "a coroutine cannot destroy itself");
        trace!("destroy(): state={:?}", self.state());

        runtime.suspend(&self);
        // Joiners and remaining handle holders observe completion.
        self.set_state(CoroutineState::Completed);
        while let Some(joined) = self.pop_join_waiter() {
            runtime.resume(&joined);
        }
        self.release_stack();
    }

    /// Associates opaque data with this coroutine.
    pub fn set_data(&mut self, data: Rc<dyn Any>) {
        self.0.as_mut().data = Some(data);
    }

    /// Retrieves the opaque data associated with this coroutine.
    pub fn data(&self) -> Option<Rc<dyn Any>> {
        self.0.data.clone()
    }

    /// Checks whether two handles refer to the same coroutine.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        SharedObject::ptr_eq(&this.0, &other.0)
    }

    pub(crate) fn set_state(&mut self, state: CoroutineState) {
        self.0.as_mut().state = state;
    }

    pub(crate) fn take_task(&mut self) -> Box<dyn FnOnce()> {
        self.0.as_mut().task.take().expect("coroutine task already taken")
    }

    /// Returns the address of this coroutine's saved context. Stable for the record's lifetime.
    pub(crate) fn context_ptr(&self) -> *mut Context {
        let ptr: NonNull<Coroutine> = SharedObject::as_nonnull(&self.0);
        unsafe { &mut (*ptr.as_ptr()).context }
    }

    pub(crate) fn stack_top(&self) -> *mut u8 {
        self.0.stack.as_ref().expect("coroutine has no stack").top()
    }

    /// Returns this coroutine's stack to the free-list. No effect if already released.
    pub(crate) fn release_stack(&mut self) {
        self.0.as_mut().stack = None;
    }

    /// Returns the address of this coroutine's join queue, for parking through the scheduler.
    pub(crate) fn join_list(&mut self) -> NonNull<IntrusiveList<Coroutine>> {
        NonNull::from(&mut self.0.as_mut().join_waiters)
    }

    pub(crate) fn pop_join_waiter(&mut self) -> Option<SharedCoroutine> {
        self.0.as_mut().join_waiters.pop_front().map(SharedCoroutine)
    }

    /// Cancels a parked blocking send: the pending entry keeps its payload but forgets the sender, so a future
    /// receive still delivers the message without resuming anyone on the sender's behalf.
    pub(crate) fn cancel_pending_send(&mut self) {
        if let Some(slot) = self.0.as_mut().pending_send.take() {
            // Safety: the slot points into a boxed entry that outlives the sender's parking.
            unsafe { *slot.as_ptr() = None };
        }
    }

    /// Records where this coroutine is parked as a blocking sender.
    pub(crate) fn set_pending_send(&mut self, slot: NonNull<Option<SharedCoroutine>>) {
        let inner: &mut Coroutine = self.0.as_mut();
        inner.pending_send = Some(slot);
        inner.send_delivered = false;
    }

    /// Marks this coroutine's parked blocking send as consumed, then forgets the parking slot.
    pub(crate) fn complete_pending_send(&mut self) {
        let inner: &mut Coroutine = self.0.as_mut();
        inner.pending_send = None;
        inner.send_delivered = true;
    }

    pub(crate) fn send_was_delivered(&self) -> bool {
        self.0.send_delivered
    }

    pub(crate) fn inner(this: &Self) -> &SharedObject<Coroutine> {
        &this.0
    }

    pub(crate) fn into_inner(this: Self) -> SharedObject<Coroutine> {
        this.0
    }

    pub(crate) fn from_inner(inner: SharedObject<Coroutine>) -> Self {
        Self(inner)
    }

    pub(crate) fn into_raw(this: Self) -> NonNull<Coroutine> {
        SharedObject::into_raw(this.0)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl IntrusivelyLinked for Coroutine {
    fn link(&self) -> &LinkState<Self> {
        &self.link
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

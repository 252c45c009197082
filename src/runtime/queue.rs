// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Synchronous message-passing queues and the send/receive primitives.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    collections::intrusive_list::IntrusiveList,
    runtime::{
        coroutine::{
            current,
            Coroutine,
            CoroutineState,
            SharedCoroutine,
        },
        fail::Fail,
        scheduler::SharedRuntime,
        SharedObject,
    },
};
use ::std::{
    collections::VecDeque,
    ptr::NonNull,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// A message pending on a queue, waiting to be received.
struct MessageEntry<T: 'static> {
    /// The message payload.
    payload: T,
    /// Sender parked until the payload is consumed, when the send was blocking.
    sender: Option<SharedCoroutine>,
    /// Queue on which the sender awaits a reply.
    reply_queue: Option<SharedQueue<T>>,
}

/// A message-passing queue.
///
/// The queue is symmetric: it holds either unreceived messages or unsatisfied receivers, never both once a rendezvous
/// is possible. Both sides are strict FIFO.
pub struct MessageQueue<T: 'static> {
    /// Messages waiting to be received. Entries are boxed so that their addresses are stable while queued; a parked
    /// blocking sender is cancelled in place through a pointer into its entry.
    pending: VecDeque<Box<MessageEntry<T>>>,
    /// Coroutines waiting to receive on the queue.
    receivers: IntrusiveList<Coroutine>,
}

/// Handle to a [MessageQueue]. Clones refer to the same queue; the record is freed when the last clone drops.
pub struct SharedQueue<T: 'static>(SharedObject<MessageQueue<T>>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<T: 'static> SharedQueue<T> {
    /// Creates a new messaging queue.
    pub fn new() -> Self {
        trace!("queue_create()");
        Self(SharedObject::new(MessageQueue {
            pending: VecDeque::new(),
            receivers: IntrusiveList::new(),
        }))
    }

    /// Returns the number of pending messages.
    pub fn len(&self) -> usize {
        self.0.pending.len()
    }

    /// Checks whether any messages are pending.
    pub fn is_empty(&self) -> bool {
        self.0.pending.is_empty()
    }

    /// Sends a message to the queue, blocking until the message is received.
    ///
    /// Returns Ok once a receiver has consumed the message. If the sender is woken by suspend/resume or by the queue
    /// being destroyed before that happens, the send reports a cancellation; a suspended sender's payload stays in
    /// the queue and may still be delivered later.
    pub fn send(&mut self, payload: T) -> Result<(), Fail> {
        assert_within_coroutine("send");
        self.send_impl(payload, true, None)
    }

    /// Sends a message to the queue without blocking.
    pub fn signal(&mut self, payload: T) {
        assert_within_coroutine("signal");
        // A non-blocking send cannot fail.
        let _ = self.send_impl(payload, false, None);
    }

    /// Receives a message from the queue, blocking until a message is available.
    ///
    /// A receiver woken by suspend/resume or by queue destruction instead of by a real send reports a cancellation.
    pub fn wait(&mut self) -> Result<T, Fail> {
        assert_within_coroutine("wait");
        self.recv_impl().map(|(payload, _)| payload)
    }

    /// Receives a message from the queue without blocking. Returns None if no message is available; this is the only
    /// expected empty signal.
    pub fn read(&mut self) -> Option<T> {
        assert_within_coroutine("read");
        if self.0.pending.is_empty() {
            return None;
        }
        // With a message pending the receive can neither block nor wake spuriously.
        self.recv_impl().ok().map(|(payload, _)| payload)
    }

    /// Sends a message to the queue and waits for a reply on `reply_queue`.
    pub fn call(&mut self, payload: T, reply_queue: &SharedQueue<T>) -> Result<T, Fail> {
        assert_within_coroutine("call");
        self.send_impl(payload, false, Some(reply_queue.clone()))?;
        let mut reply_queue: SharedQueue<T> = reply_queue.clone();
        reply_queue.recv_impl().map(|(payload, _)| payload)
    }

    /// Receives a message from the queue along with the queue on which the sender awaits a reply, if any.
    pub fn recv(&mut self) -> Result<(T, Option<SharedQueue<T>>), Fail> {
        assert_within_coroutine("recv");
        self.recv_impl()
    }

    /// Sends a message to the queue without blocking, providing a queue for a later reply.
    pub fn post(&mut self, payload: T, reply_queue: &SharedQueue<T>) {
        assert_within_coroutine("post");
        let _ = self.send_impl(payload, false, Some(reply_queue.clone()));
    }

    /// Destroys the queue.
    ///
    /// All pending messages are discarded; a blocking sender parked in a discarded entry is resumed and its send
    /// reports a cancellation. Every coroutine parked to receive is resumed, in FIFO order, and observes a wake
    /// without a message. Remaining handle clones stay valid but see an empty queue.
    pub fn destroy(mut self) {
        let mut runtime: SharedRuntime = SharedRuntime::get();
        trace!("queue_destroy(): pending={:?}", self.0.pending.len());

        while let Some(mut entry) = self.0.as_mut().pending.pop_front() {
            if let Some(sender) = entry.sender.take() {
                // The sender's send() reports that the payload was not delivered.
                runtime.resume(&sender);
            }
            // The payload is dropped with the entry.
        }

        while let Some(receiver) = self.0.as_mut().receivers.pop_front() {
            let receiver: SharedCoroutine = SharedCoroutine::from_inner(receiver);
            runtime.resume(&receiver);
        }
    }

    /// Primitive send operation.
    ///
    /// With a receiver parked on the queue, the rendezvous is immediate: the head receiver is transferred to with the
    /// entry already pending and the current coroutine parked on the ready tail; no one blocks. Otherwise the entry
    /// is queued, and a blocking sender parks inside it until a receiver consumes the payload.
    fn send_impl(&mut self, payload: T, block: bool, reply_queue: Option<SharedQueue<T>>) -> Result<(), Fail> {
        let mut runtime: SharedRuntime = SharedRuntime::get();

        if let Some(receiver) = self.0.as_mut().receivers.pop_front() {
            self.0.as_mut().pending.push_back(Box::new(MessageEntry {
                payload,
                sender: None,
                reply_queue,
            }));
            let ready: NonNull<IntrusiveList<Coroutine>> = runtime.ready_list();
            runtime.transfer(
                Some(ready),
                CoroutineState::Running,
                Some(SharedCoroutine::from_inner(receiver)),
            );
            return Ok(());
        }

        let mut entry: Box<MessageEntry<T>> = Box::new(MessageEntry {
            payload,
            sender: None,
            reply_queue,
        });
        if block {
            let mut sender: SharedCoroutine =
                runtime.current().expect("a blocking send requires a running coroutine");
            entry.sender = Some(sender.clone());
            // The boxed entry's address is stable while queued, so a suspend can cancel the parked
            // sender in place.
            sender.set_pending_send(NonNull::from(&mut entry.sender));
            self.0.as_mut().pending.push_back(entry);

            // The sender is held only through the message entry, not through any queue.
            runtime.transfer(None, CoroutineState::BlockedSend, None);

            if sender.send_was_delivered() {
                Ok(())
            } else {
                warn!("send(): woken without delivery");
                Err(Fail::cancelled("sender woken without delivery"))
            }
        } else {
            self.0.as_mut().pending.push_back(entry);
            Ok(())
        }
    }

    /// Primitive receive operation. Resumes a parked sender when its payload is consumed.
    fn recv_impl(&mut self) -> Result<(T, Option<SharedQueue<T>>), Fail> {
        let mut runtime: SharedRuntime = SharedRuntime::get();

        if self.0.pending.is_empty() {
            let receivers: NonNull<IntrusiveList<Coroutine>> = NonNull::from(&mut self.0.as_mut().receivers);
            runtime.transfer(Some(receivers), CoroutineState::BlockedRecv, None);
        }

        // Either a sender placed an entry before waking us, or the wake was spurious (suspend,
        // resume, queue destroy). A message that arrived between the wake and this scheduling is
        // still delivered.
        match self.0.as_mut().pending.pop_front() {
            Some(entry) => {
                let MessageEntry {
                    payload,
                    sender,
                    reply_queue,
                } = *entry;
                if let Some(mut sender) = sender {
                    sender.complete_pending_send();
                    runtime.resume(&sender);
                }
                Ok((payload, reply_queue))
            },
            None => {
                warn!("recv(): woken without a message");
                Err(Fail::cancelled("receiver woken without a message"))
            },
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// The send/receive primitives are callable only from within a coroutine.
fn assert_within_coroutine(operation: &str) {
    assert!(
        current().is_some(),
        "{}() must be called from within a coroutine",
        operation
    );
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl<T: 'static> Clone for SharedQueue<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: 'static> Default for SharedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

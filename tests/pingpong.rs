// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::anyhow::Result;
use ::std::{
    cell::RefCell,
    rc::Rc,
};
use ::strand::{
    spawn,
    yield_now,
    CoroutineState,
    SharedCoroutine,
    SharedQueue,
};

/// A ping: client identifier and ping number. The server echoes it back on the reply queue.
type Request = (u32, u32);

//======================================================================================================================
// Ping Pong
//======================================================================================================================

/// One client, two pings: the client and the server alternate strictly.
#[test]
fn ping_pong_single_client() -> Result<()> {
    let server_queue: SharedQueue<Request> = SharedQueue::new();
    let trace: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));

    // The server loops: receive a ping along with its reply queue, send the pong back.
    let mut serve_queue: SharedQueue<Request> = server_queue.clone();
    let server_trace: Rc<RefCell<Vec<String>>> = trace.clone();
    let server: SharedCoroutine = spawn(move || loop {
        match serve_queue.recv() {
            Ok(((client, ping), Some(mut reply_queue))) => {
                server_trace.borrow_mut().push(format!("pong {} for client {}", ping, client));
                reply_queue.signal((client, ping));
            },
            _ => break,
        }
    });
    strand::ensure_eq!(server.state(), CoroutineState::BlockedRecv);

    let mut call_queue: SharedQueue<Request> = server_queue.clone();
    let client_trace: Rc<RefCell<Vec<String>>> = trace.clone();
    let pongs: Rc<RefCell<u32>> = Rc::new(RefCell::new(0));
    let pong_count: Rc<RefCell<u32>> = pongs.clone();
    let client: SharedCoroutine = spawn(move || {
        let reply_queue: SharedQueue<Request> = SharedQueue::new();
        for ping in 1..=2 {
            client_trace.borrow_mut().push(format!("ping {}", ping));
            let (client_id, ponged): Request = call_queue
                .call((1, ping), &reply_queue)
                .expect("a reply should arrive");
            assert!(client_id == 1 && ponged == ping);
            *pong_count.borrow_mut() += 1;
        }
        reply_queue.destroy();
    });

    strand::ensure_eq!(*pongs.borrow(), 2);
    strand::ensure_eq!(
        *trace.borrow(),
        vec!["ping 1", "pong 1 for client 1", "ping 2", "pong 2 for client 1"]
    );
    strand::ensure_eq!(client.state(), CoroutineState::Completed);

    server.destroy();
    client.destroy();
    server_queue.destroy();
    Ok(())
}

/// Two clients contend on one server queue, three calls each: the server handles the six requests in strict arrival
/// order and every client gets its own replies back.
#[test]
fn ping_pong_two_clients_contend() -> Result<()> {
    let server_queue: SharedQueue<Request> = SharedQueue::new();
    let handled: Rc<RefCell<Vec<Request>>> = Rc::new(RefCell::new(Vec::new()));
    let replies: Rc<RefCell<Vec<(u32, Request)>>> = Rc::new(RefCell::new(Vec::new()));

    // Start each client. Their first pings land on the queue before the server starts listening.
    let mut clients: Vec<SharedCoroutine> = Vec::new();
    for id in 1..=2u32 {
        let mut call_queue: SharedQueue<Request> = server_queue.clone();
        let reply_log: Rc<RefCell<Vec<(u32, Request)>>> = replies.clone();
        clients.push(spawn(move || {
            let reply_queue: SharedQueue<Request> = SharedQueue::new();
            for ping in 1..=3 {
                let reply: Request = call_queue
                    .call((id, ping), &reply_queue)
                    .expect("a reply should arrive");
                reply_log.borrow_mut().push((id, reply));
            }
            reply_queue.destroy();
        }));
    }

    // Start the server listening on the message queue.
    let mut serve_queue: SharedQueue<Request> = server_queue.clone();
    let handled_log: Rc<RefCell<Vec<Request>>> = handled.clone();
    let server: SharedCoroutine = spawn(move || loop {
        match serve_queue.recv() {
            Ok((request, Some(mut reply_queue))) => {
                handled_log.borrow_mut().push(request);
                reply_queue.signal(request);
            },
            _ => break,
        }
    });
    yield_now();

    // Strict arrival FIFO across both clients.
    strand::ensure_eq!(
        *handled.borrow(),
        vec![(1, 1), (2, 1), (1, 2), (2, 2), (1, 3), (2, 3)]
    );

    // Every client saw exactly its own three replies, in ping order.
    for id in 1..=2u32 {
        let own: Vec<Request> = replies
            .borrow()
            .iter()
            .filter(|(client, _)| *client == id)
            .map(|(_, reply)| *reply)
            .collect();
        strand::ensure_eq!(own, vec![(id, 1), (id, 2), (id, 3)]);
    }

    for client in clients {
        strand::ensure_eq!(client.state(), CoroutineState::Completed);
        client.destroy();
    }
    server.destroy();
    server_queue.destroy();
    Ok(())
}

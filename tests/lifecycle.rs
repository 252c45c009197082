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
    current,
    pooled_stack_count,
    spawn,
    suspend_self,
    yield_now,
    CoroutineState,
    SharedCoroutine,
};

//======================================================================================================================
// Unit Tests
//======================================================================================================================

/// Runs a task once, destroys the coroutine, and checks that its stack went back to the free-list.
#[test]
fn hello_runs_once_and_releases_stack() -> Result<()> {
    let baseline: usize = pooled_stack_count();
    let output: Rc<RefCell<Vec<&str>>> = Rc::new(RefCell::new(Vec::new()));

    let observer: Rc<RefCell<Vec<&str>>> = output.clone();
    let coroutine: SharedCoroutine = spawn(move || observer.borrow_mut().push("A"));

    strand::ensure_eq!(*output.borrow(), vec!["A"]);
    strand::ensure_eq!(coroutine.state(), CoroutineState::Completed);

    coroutine.destroy();
    strand::ensure_eq!(pooled_stack_count(), baseline + 1);
    Ok(())
}

/// Destroying every coroutine returns the free-list to the high-water mark of concurrently-live stacks.
#[test]
fn no_stack_leak_across_destroy() -> Result<()> {
    let baseline: usize = pooled_stack_count();

    let coroutines: Vec<SharedCoroutine> = (0..3).map(|_| spawn(suspend_self)).collect();
    for coroutine in &coroutines {
        strand::ensure_eq!(coroutine.state(), CoroutineState::Suspended);
    }
    // All three stacks are in use.
    strand::ensure_eq!(pooled_stack_count(), baseline);

    for coroutine in coroutines {
        coroutine.destroy();
    }
    strand::ensure_eq!(pooled_stack_count(), baseline + 3);
    Ok(())
}

/// Three coroutines print their id four times between yields: round-robin after the setup quantum.
#[test]
fn yield_fairness_is_round_robin() -> Result<()> {
    let order: Rc<RefCell<String>> = Rc::new(RefCell::new(String::new()));

    let coroutines: Vec<SharedCoroutine> = ['A', 'B', 'C']
        .into_iter()
        .map(|id| {
            let order: Rc<RefCell<String>> = order.clone();
            spawn(move || {
                // Park until every sibling has been spawned.
                suspend_self();
                for _ in 0..4 {
                    order.borrow_mut().push(id);
                    yield_now();
                }
            })
        })
        .collect();

    // Line all three up on the ready queue, then run them to completion.
    for coroutine in &coroutines {
        coroutine.resume();
    }
    yield_now();

    strand::ensure_eq!(*order.borrow(), "ABCABCABCABC");
    for coroutine in &coroutines {
        strand::ensure_eq!(coroutine.state(), CoroutineState::Completed);
    }
    Ok(())
}

/// Joining a running coroutine parks the joiner until the target completes.
#[test]
fn join_parks_until_completion() -> Result<()> {
    let events: Rc<RefCell<Vec<&str>>> = Rc::new(RefCell::new(Vec::new()));

    let target_events: Rc<RefCell<Vec<&str>>> = events.clone();
    let target: SharedCoroutine = spawn(move || {
        target_events.borrow_mut().push("target:start");
        suspend_self();
        target_events.borrow_mut().push("target:end");
    });
    strand::ensure_eq!(target.state(), CoroutineState::Suspended);

    let joiner_events: Rc<RefCell<Vec<&str>>> = events.clone();
    let joined: SharedCoroutine = target.clone();
    let joiner: SharedCoroutine = spawn(move || {
        joiner_events.borrow_mut().push("joiner:wait");
        joined.join();
        joiner_events.borrow_mut().push("joiner:resumed");
    });
    strand::ensure_eq!(joiner.state(), CoroutineState::BlockedJoin);

    // Let the target finish; it must wake the joiner on its way out.
    target.resume();
    yield_now();

    strand::ensure_eq!(
        *events.borrow(),
        vec!["target:start", "joiner:wait", "target:end", "joiner:resumed"]
    );
    strand::ensure_eq!(target.state(), CoroutineState::Completed);
    strand::ensure_eq!(joiner.state(), CoroutineState::Completed);
    Ok(())
}

/// Joining an already-completed coroutine returns immediately.
#[test]
fn join_on_completed_returns_immediately() -> Result<()> {
    let target: SharedCoroutine = spawn(|| ());
    strand::ensure_eq!(target.state(), CoroutineState::Completed);

    let joined: SharedCoroutine = target.clone();
    let joiner: SharedCoroutine = spawn(move || joined.join());

    strand::ensure_eq!(joiner.state(), CoroutineState::Completed);
    target.destroy();
    joiner.destroy();
    Ok(())
}

/// Destroying a coroutine wakes its joiners, and they observe it as completed.
#[test]
fn destroy_wakes_joiners() -> Result<()> {
    let target: SharedCoroutine = spawn(suspend_self);

    let observed: Rc<RefCell<Option<CoroutineState>>> = Rc::new(RefCell::new(None));
    let state_slot: Rc<RefCell<Option<CoroutineState>>> = observed.clone();
    let joined: SharedCoroutine = target.clone();
    let joiner: SharedCoroutine = spawn(move || {
        joined.join();
        *state_slot.borrow_mut() = Some(joined.state());
    });
    strand::ensure_eq!(joiner.state(), CoroutineState::BlockedJoin);

    target.destroy();
    strand::ensure_eq!(joiner.state(), CoroutineState::Running);
    yield_now();

    strand::ensure_eq!(*observed.borrow(), Some(CoroutineState::Completed));
    strand::ensure_eq!(joiner.state(), CoroutineState::Completed);
    Ok(())
}

/// Suspend is idempotent: a second suspend leaves the state and memberships unchanged.
#[test]
fn suspend_is_idempotent() -> Result<()> {
    let coroutine: SharedCoroutine = spawn(suspend_self);
    strand::ensure_eq!(coroutine.state(), CoroutineState::Suspended);

    coroutine.suspend();
    coroutine.suspend();
    strand::ensure_eq!(coroutine.state(), CoroutineState::Suspended);

    // The coroutine is still resumable afterwards.
    coroutine.resume();
    yield_now();
    strand::ensure_eq!(coroutine.state(), CoroutineState::Completed);
    Ok(())
}

/// A coroutine may spawn another; the spawner becomes runnable behind the child.
#[test]
fn spawn_from_coroutine_interleaves() -> Result<()> {
    let events: Rc<RefCell<Vec<&str>>> = Rc::new(RefCell::new(Vec::new()));

    let parent_events: Rc<RefCell<Vec<&str>>> = events.clone();
    let parent: SharedCoroutine = spawn(move || {
        parent_events.borrow_mut().push("parent:spawn");
        let child_events: Rc<RefCell<Vec<&str>>> = parent_events.clone();
        let child: SharedCoroutine = spawn(move || {
            child_events.borrow_mut().push("child:run");
            yield_now();
            child_events.borrow_mut().push("child:end");
        });
        parent_events.borrow_mut().push("parent:resumed");
        child.join();
        parent_events.borrow_mut().push("parent:joined");
    });

    strand::ensure_eq!(
        *events.borrow(),
        vec![
            "parent:spawn",
            "child:run",
            "parent:resumed",
            "child:end",
            "parent:joined"
        ]
    );
    strand::ensure_eq!(parent.state(), CoroutineState::Completed);
    Ok(())
}

/// Opaque per-coroutine data round-trips through both the handle and the self accessors.
#[test]
fn user_data_round_trips() -> Result<()> {
    let seen: Rc<RefCell<Option<u32>>> = Rc::new(RefCell::new(None));

    let seen_slot: Rc<RefCell<Option<u32>>> = seen.clone();
    let mut coroutine: SharedCoroutine = spawn(move || {
        strand::self_data_set(Rc::new(17u32));
        suspend_self();
        let data = strand::self_data().expect("data should be set");
        *seen_slot.borrow_mut() = data.downcast_ref::<u32>().copied();
    });

    // The handle observes the data set from inside the coroutine.
    let data = coroutine.data().expect("data should be set");
    strand::ensure_eq!(data.downcast_ref::<u32>().copied(), Some(17));

    // And the coroutine observes data replaced through the handle.
    coroutine.set_data(Rc::new(23u32));
    coroutine.resume();
    yield_now();
    strand::ensure_eq!(*seen.borrow(), Some(23));
    Ok(())
}

#[test]
fn current_is_none_at_root() -> Result<()> {
    strand::ensure_eq!(current().is_none(), true);
    Ok(())
}

#[test]
#[should_panic(expected = "must be called from within a coroutine")]
fn join_from_root_panics() {
    let coroutine: SharedCoroutine = spawn(suspend_self);
    coroutine.join();
}

#[test]
#[should_panic(expected = "cannot resume a completed coroutine")]
fn resume_completed_panics() {
    let coroutine: SharedCoroutine = spawn(|| ());
    coroutine.resume();
}

//! Behavior of the individual combinators.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use common::{ms, run, sim};
use lazytask::{Callback, SchedulerRef, Task, TaskError};

#[test]
fn eval_re_executes_on_every_run() {
    let (_sim, scheduler) = sim();
    let calls = Arc::new(AtomicU64::new(0));
    let counter = calls.clone();
    let task = Task::eval(move || counter.fetch_add(1, Ordering::SeqCst));

    run(&task, &scheduler);
    run(&task, &scheduler);

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn defer_produces_a_fresh_task_each_run() {
    let (_sim, scheduler) = sim();
    let produced = Arc::new(AtomicU64::new(0));
    let counter = produced.clone();
    let task = Task::defer(move || {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        Task::now(n)
    });

    let (first, _h1) = run(&task, &scheduler);
    let (second, _h2) = run(&task, &scheduler);

    assert!(matches!(first.lock().unwrap().as_slice(), [Ok(0)]));
    assert!(matches!(second.lock().unwrap().as_slice(), [Ok(1)]));
}

#[test]
fn failed_transposes_both_outcomes() {
    let (_sim, scheduler) = sim();

    let failure = Task::<i32>::raise_error(TaskError::fail("boom")).failed();
    let (out, _handle) = run(&failure, &scheduler);
    assert!(matches!(
        out.lock().unwrap().as_slice(),
        [Ok(TaskError::Fail { .. })]
    ));

    let success = Task::now(1).failed();
    let (out, _handle) = run(&success, &scheduler);
    assert!(matches!(
        out.lock().unwrap().as_slice(),
        [Err(TaskError::NoSuchElement)]
    ));
}

#[test]
fn recover_with_switches_to_the_produced_task() {
    let (_sim, scheduler) = sim();
    let task = Task::<i32>::raise_error(TaskError::fail("boom"))
        .on_error_recover_with(|_| Some(Task::now(7)));

    let (out, _handle) = run(&task, &scheduler);
    assert!(matches!(out.lock().unwrap().as_slice(), [Ok(7)]));
}

#[test]
fn recover_leaves_unmatched_errors_alone() {
    let (_sim, scheduler) = sim();
    let task = Task::<i32>::raise_error(TaskError::Canceled).on_error_recover(|error| {
        match error {
            TaskError::Panicked { .. } => Some(0),
            _ => None,
        }
    });

    let (out, _handle) = run(&task, &scheduler);
    assert!(matches!(
        out.lock().unwrap().as_slice(),
        [Err(TaskError::Canceled)]
    ));
}

#[test]
fn panicking_decider_supersedes_and_reports_the_original() {
    let (sim, scheduler) = sim();
    let task = Task::<i32>::raise_error(TaskError::fail("original"))
        .on_error_recover(|_| -> Option<i32> { panic!("decider blew up") });

    let (out, _handle) = run(&task, &scheduler);

    assert!(matches!(
        out.lock().unwrap().as_slice(),
        [Err(TaskError::Panicked { .. })]
    ));
    let reported = sim.reported();
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].as_label(), "task_failed");
}

#[test]
fn fallback_runs_the_alternative_and_drops_the_error() {
    let (sim, scheduler) = sim();
    let task =
        Task::<i32>::raise_error(TaskError::fail("boom")).on_error_fallback_to(|| Task::now(3));

    let (out, _handle) = run(&task, &scheduler);
    assert!(matches!(out.lock().unwrap().as_slice(), [Ok(3)]));
    assert!(sim.reported().is_empty());
}

#[test]
fn retry_if_stops_when_the_predicate_rejects() {
    let (_sim, scheduler) = sim();
    let attempts = Arc::new(AtomicU64::new(0));
    let counter = attempts.clone();
    let task: Task<i32> = Task::eval(move || -> i32 {
        counter.fetch_add(1, Ordering::SeqCst);
        panic!("always")
    })
    .on_error_retry_if(|_| false);

    let (out, _handle) = run(&task, &scheduler);

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(matches!(
        out.lock().unwrap().as_slice(),
        [Err(TaskError::Panicked { .. })]
    ));
}

#[test]
fn retry_if_keeps_going_while_the_predicate_holds() {
    let (_sim, scheduler) = sim();
    let attempts = Arc::new(AtomicU64::new(0));
    let counter = attempts.clone();
    let task = Task::eval(move || {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if n < 4 {
            panic!("flaky")
        }
        n
    })
    .on_error_retry_if(TaskError::is_retryable);

    let (out, _handle) = run(&task, &scheduler);

    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert!(matches!(out.lock().unwrap().as_slice(), [Ok(4)]));
}

#[test]
fn zip_pairs_parallel_results() {
    let (sim, scheduler) = sim();
    let task = Task::now(1)
        .delay_execution(ms(10))
        .zip(&Task::now("two").delay_execution(ms(5)));

    let (out, _handle) = run(&task, &scheduler);
    sim.tick(ms(10));

    assert!(matches!(out.lock().unwrap().as_slice(), [Ok((1, "two"))]));
}

#[test]
fn join_failure_cancels_the_sibling_branch() {
    let (sim, scheduler) = sim();
    let failing = Task::<i32>::raise_error(TaskError::fail("boom")).delay_execution(ms(5));
    let slow = Task::now(2).delay_execution(ms(50));
    let task = failing.map2(&slow, |a, b| a + b);

    let (out, _handle) = run(&task, &scheduler);
    sim.tick(ms(5));

    assert!(matches!(
        out.lock().unwrap().as_slice(),
        [Err(TaskError::Fail { .. })]
    ));
    // The sibling's delay was unarmed when the composite got canceled.
    assert_eq!(sim.outstanding_timers(), 0);

    sim.tick(ms(100));
    assert_eq!(out.lock().unwrap().len(), 1);
}

#[test]
fn create_delivers_a_panicking_registration_as_an_error() {
    let (_sim, scheduler) = sim();
    let task: Task<i32> = Task::create(|_scheduler: &SchedulerRef, _cb: Arc<dyn Callback<i32>>| {
        panic!("registration failed")
    });

    let (out, _handle) = run(&task, &scheduler);
    assert!(matches!(
        out.lock().unwrap().as_slice(),
        [Err(TaskError::Panicked { .. })]
    ));
}

#[test]
fn delayed_retries_wait_out_the_backoff() {
    let (sim, scheduler) = sim();
    let attempts = Arc::new(AtomicU64::new(0));
    let counter = attempts.clone();
    let task = Task::eval(move || {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if n < 3 {
            panic!("flaky")
        }
        n
    })
    .on_error_retry_backoff(5, lazytask::BackoffStrategy {
        first: ms(10),
        ..Default::default()
    });

    let (out, _handle) = run(&task, &scheduler);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(out.lock().unwrap().is_empty());

    sim.tick(ms(10));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert!(out.lock().unwrap().is_empty());

    sim.tick(ms(10));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(matches!(out.lock().unwrap().as_slice(), [Ok(3)]));
}

#[test]
fn canceling_during_backoff_stops_the_retry_loop() {
    let (sim, scheduler) = sim();
    let attempts = Arc::new(AtomicU64::new(0));
    let counter = attempts.clone();
    let task: Task<i32> = Task::eval(move || -> i32 {
        counter.fetch_add(1, Ordering::SeqCst);
        panic!("always")
    })
    .on_error_retry_backoff(10, lazytask::BackoffStrategy {
        first: ms(10),
        ..Default::default()
    });

    let (out, handle) = run(&task, &scheduler);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    handle.cancel();
    sim.tick(ms(500));

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(out.lock().unwrap().is_empty());
}

#[test]
fn flatten_collapses_a_nested_task() {
    let (_sim, scheduler) = sim();
    let nested: Task<Task<i32>> = Task::now(Task::now(8));
    let (out, _handle) = run(&nested.flatten(), &scheduler);
    assert!(matches!(out.lock().unwrap().as_slice(), [Ok(8)]));
}

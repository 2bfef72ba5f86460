//! End-to-end behavior under the virtual clock.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use common::{ms, run, sim};
use lazytask::{Task, TaskError};

#[test]
fn synchronous_chain_completes_without_ticks() {
    let (sim, scheduler) = sim();
    let task = Task::now(1).map(|x| x + 1).flat_map(|x| Task::now(x * 10));

    let (out, _handle) = run(&task, &scheduler);

    assert!(matches!(out.lock().unwrap().as_slice(), [Ok(20)]));
    assert_eq!(sim.now(), Duration::ZERO);
    assert_eq!(sim.outstanding_timers(), 0);
}

#[test]
fn recover_replaces_a_panicked_evaluation() {
    let (_sim, scheduler) = sim();
    let task = Task::eval(|| -> i32 { panic!("dummy") }).on_error_recover(|error| match error {
        TaskError::Panicked { .. } => Some(42),
        _ => None,
    });

    let (out, _handle) = run(&task, &scheduler);

    assert!(matches!(out.lock().unwrap().as_slice(), [Ok(42)]));
}

#[test]
fn retry_exhausts_attempts_then_delivers_the_last_error() {
    let (_sim, scheduler) = sim();
    let attempts = Arc::new(AtomicU64::new(0));
    let counter = attempts.clone();
    let task: Task<i32> = Task::eval(move || -> i32 {
        counter.fetch_add(1, Ordering::SeqCst);
        panic!("dummy")
    })
    .on_error_retry(2);

    let (out, _handle) = run(&task, &scheduler);

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(matches!(
        out.lock().unwrap().as_slice(),
        [Err(TaskError::Panicked { .. })]
    ));
}

#[test]
fn timeout_fires_and_cancels_the_slow_source() {
    let (sim, scheduler) = sim();
    let task = Task::now(1).delay_execution(ms(100)).timeout(ms(50));

    let (out, _handle) = run(&task, &scheduler);
    assert!(out.lock().unwrap().is_empty());

    sim.tick(ms(50));
    {
        let got = out.lock().unwrap();
        match got.as_slice() {
            [Err(error @ TaskError::Timeout { .. })] => {
                assert!(error.to_string().contains("timed-out after 50ms"));
            }
            other => panic!("unexpected outcomes: {other:?}"),
        }
    }
    // The source's delay timer was unarmed by the cancelation.
    assert_eq!(sim.outstanding_timers(), 0);

    sim.tick(ms(100));
    assert_eq!(out.lock().unwrap().len(), 1);
}

#[test]
fn race_is_won_by_the_faster_branch() {
    let (sim, scheduler) = sim();
    let slow = Task::now("A").delay_execution(ms(30));
    let fast = Task::now("B").delay_execution(ms(10));
    let task = Task::amb(vec![slow, fast]);

    let (out, _handle) = run(&task, &scheduler);

    sim.tick(ms(10));
    assert!(matches!(out.lock().unwrap().as_slice(), [Ok("B")]));
    // The loser's delay timer is gone.
    assert_eq!(sim.outstanding_timers(), 0);

    sim.tick(ms(30));
    assert_eq!(out.lock().unwrap().len(), 1);
}

#[test]
fn parallel_join_combines_both_values() {
    let (sim, scheduler) = sim();
    let left = Task::now(3).delay_execution(ms(20));
    let right = Task::now(4).delay_execution(ms(10));
    let task = left.map2(&right, |a, b| a + b);

    let (out, _handle) = run(&task, &scheduler);

    sim.tick(ms(10));
    assert!(out.lock().unwrap().is_empty());

    sim.tick(ms(10));
    assert!(matches!(out.lock().unwrap().as_slice(), [Ok(7)]));
}

#[test]
fn timeout_switches_to_the_backup_task() {
    let (sim, scheduler) = sim();
    let backup = Task::now(99);
    let task = Task::now(1).delay_execution(ms(100)).timeout_to(ms(50), &backup);

    let (out, _handle) = run(&task, &scheduler);

    sim.tick(ms(50));
    assert!(matches!(out.lock().unwrap().as_slice(), [Ok(99)]));

    sim.tick(ms(100));
    assert_eq!(out.lock().unwrap().len(), 1);
}

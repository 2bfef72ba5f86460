//! # Completion callbacks.
//!
//! A [`Callback`] is a two-arm sink: exactly one of `on_success` or
//! `on_error` is meant to fire, at most once per run. The runtime enforces
//! that discipline at the `run_async` boundary with [`SafeCallback`], a
//! single-shot gate that also quarantines panics thrown by the listener
//! itself: a completed run has no surviving listener, so those panics go to
//! the scheduler's failure reporter instead of unwinding through the run
//! loop.
//!
//! Internal combinators install [`Listener`]s, the frame-aware variant used
//! between combinators. Listeners trust their callers to signal correctly and
//! are not double-wrapped.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{TaskError, catch_user};
use crate::run_loop::FrameId;
use crate::scheduler::SchedulerRef;

/// # Two-arm completion sink.
///
/// At most one arm is invoked, at most once per `run_async`. Implementations
/// may panic; the runtime routes such panics to the failure reporter.
pub trait Callback<T>: Send + Sync {
    /// The task produced a value.
    fn on_success(&self, value: T);

    /// The task failed.
    fn on_error(&self, error: TaskError);
}

/// Frame-aware completion sink used between combinators.
///
/// Carrying the [`FrameId`] through delivery lets the trampoline batch the
/// upward (completion) path exactly like the downward (execution) path.
pub(crate) trait Listener<T>: Send + Sync {
    fn on_success(&self, frame: FrameId, value: T);
    fn on_error(&self, frame: FrameId, error: TaskError);
}

/// Shared handle to a listener.
pub(crate) type ListenerRef<T> = Arc<dyn Listener<T>>;

/// Adapts a closure over `Result` into a [`Callback`].
pub(crate) struct FnCallback<T, F> {
    f: F,
    _value: PhantomData<fn(T)>,
}

impl<T, F> FnCallback<T, F>
where
    F: Fn(Result<T, TaskError>) + Send + Sync,
{
    pub(crate) fn new(f: F) -> Self {
        Self {
            f,
            _value: PhantomData,
        }
    }
}

impl<T, F> Callback<T> for FnCallback<T, F>
where
    F: Fn(Result<T, TaskError>) + Send + Sync,
{
    fn on_success(&self, value: T) {
        (self.f)(Ok(value));
    }

    fn on_error(&self, error: TaskError) {
        (self.f)(Err(error));
    }
}

/// Single-shot wrapper enforcing at-most-once delivery.
///
/// - the first arm to fire flips the gate and forwards;
/// - a late `on_success` is dropped;
/// - a late `on_error` is handed to the failure reporter;
/// - a panic in the wrapped arm is handed to the failure reporter, and when
///   the original signal was itself an error, both are reported.
pub(crate) struct SafeCallback<T> {
    underlying: Box<dyn Callback<T>>,
    done: AtomicBool,
    scheduler: SchedulerRef,
}

impl<T> SafeCallback<T> {
    pub(crate) fn new(underlying: Box<dyn Callback<T>>, scheduler: SchedulerRef) -> Self {
        Self {
            underlying,
            done: AtomicBool::new(false),
            scheduler,
        }
    }
}

impl<T: Send + 'static> Listener<T> for SafeCallback<T> {
    fn on_success(&self, _frame: FrameId, value: T) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(listener_panic) = catch_user(|| self.underlying.on_success(value)) {
            self.scheduler.report_failure(&listener_panic);
        }
    }

    fn on_error(&self, _frame: FrameId, error: TaskError) {
        if self.done.swap(true, Ordering::AcqRel) {
            self.scheduler.report_failure(&error);
            return;
        }
        let original = error.clone();
        if let Err(listener_panic) = catch_user(|| self.underlying.on_error(error)) {
            self.scheduler.report_failure(&original);
            self.scheduler.report_failure(&listener_panic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimScheduler;
    use std::sync::Mutex;

    struct Recording {
        seen: Arc<Mutex<Vec<Result<i32, TaskError>>>>,
    }

    impl Callback<i32> for Recording {
        fn on_success(&self, value: i32) {
            self.seen.lock().unwrap().push(Ok(value));
        }

        fn on_error(&self, error: TaskError) {
            self.seen.lock().unwrap().push(Err(error));
        }
    }

    fn harness() -> (SimScheduler, SafeCallback<i32>, Arc<Mutex<Vec<Result<i32, TaskError>>>>) {
        let sim = SimScheduler::new();
        let scheduler: SchedulerRef = Arc::new(sim.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let safe = SafeCallback::new(Box::new(Recording { seen: seen.clone() }), scheduler);
        (sim, safe, seen)
    }

    #[test]
    fn second_signal_is_suppressed() {
        let (sim, safe, seen) = harness();
        safe.on_success(FrameId::FIRST, 1);
        safe.on_success(FrameId::FIRST, 2);
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(sim.reported().is_empty());
    }

    #[test]
    fn late_error_goes_to_the_reporter() {
        let (sim, safe, seen) = harness();
        safe.on_success(FrameId::FIRST, 1);
        safe.on_error(FrameId::FIRST, TaskError::fail("late"));
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(sim.reported().len(), 1);
    }

    struct Exploding;

    impl Callback<i32> for Exploding {
        fn on_success(&self, _value: i32) {
            panic!("listener blew up");
        }

        fn on_error(&self, _error: TaskError) {
            panic!("listener blew up");
        }
    }

    #[test]
    fn panicking_listener_is_reported_not_raised() {
        let sim = SimScheduler::new();
        let scheduler: SchedulerRef = Arc::new(sim.clone());
        let safe = SafeCallback::new(Box::new(Exploding), scheduler);
        safe.on_success(FrameId::FIRST, 1);
        assert_eq!(sim.reported().len(), 1);
    }

    #[test]
    fn error_plus_panicking_listener_reports_both() {
        let sim = SimScheduler::new();
        let scheduler: SchedulerRef = Arc::new(sim.clone());
        let safe = SafeCallback::new(Box::new(Exploding), scheduler);
        safe.on_error(FrameId::FIRST, TaskError::fail("original"));
        let reported = sim.reported();
        assert_eq!(reported.len(), 2);
        assert_eq!(reported[0].as_label(), "task_failed");
        assert_eq!(reported[1].as_label(), "task_panicked");
    }
}

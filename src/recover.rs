//! # Error-handling combinators.
//!
//! Everything here follows one report-vs-propagate rule: when a recovery
//! decider itself blows up, the *original* error goes to the scheduler's
//! failure reporter and the *new* error is delivered downstream. The new
//! failure supersedes the old one, but the old one must not vanish silently.
//!
//! Retries are expressed as listeners that re-enter the source through
//! [`step`], so arbitrarily long retry chains stay within the trampoline's
//! stack bound and observe cancelation between attempts.

use std::sync::Arc;
use std::time::Duration;

use crate::backoff::BackoffStrategy;
use crate::callback::{Listener, ListenerRef};
use crate::cancelable::CancelToken;
use crate::error::{TaskError, catch_user};
use crate::run_loop::{Context, FrameId, deliver_error, deliver_success, start_now, step};
use crate::task::{RunTask, Task};

impl<T: Send + 'static> Task<T> {
    /// Transposes outcomes: a failure becomes the produced value, a success
    /// becomes [`TaskError::NoSuchElement`].
    pub fn failed(&self) -> Task<TaskError> {
        Task::from_run(Failed {
            source: self.clone(),
        })
    }

    /// On failure, asks `f` for a replacement value. `None` forwards the
    /// original error.
    pub fn on_error_recover<F>(&self, f: F) -> Self
    where
        F: Fn(&TaskError) -> Option<T> + Send + Sync + 'static,
    {
        Self::from_run(Recover {
            source: self.clone(),
            f: Arc::new(f),
        })
    }

    /// On failure, asks `f` for a replacement task. `None` forwards the
    /// original error.
    pub fn on_error_recover_with<F>(&self, f: F) -> Self
    where
        F: Fn(&TaskError) -> Option<Task<T>> + Send + Sync + 'static,
    {
        Self::from_run(RecoverWith {
            source: self.clone(),
            f: Arc::new(f),
        })
    }

    /// On failure, runs the task produced by `other` instead, dropping the
    /// original error.
    pub fn on_error_fallback_to<F>(&self, other: F) -> Self
    where
        F: Fn() -> Task<T> + Send + Sync + 'static,
    {
        Self::from_run(Fallback {
            source: self.clone(),
            other: Arc::new(other),
        })
    }

    /// Re-runs the source on failure, up to `retries` times (`retries + 1`
    /// executions in total). The last error is delivered if every attempt
    /// fails.
    pub fn on_error_retry(&self, retries: u64) -> Self {
        Self::from_run(Retry {
            source: self.clone(),
            retries,
        })
    }

    /// Re-runs the source while `predicate` holds for the failure.
    pub fn on_error_retry_if<F>(&self, predicate: F) -> Self
    where
        F: Fn(&TaskError) -> bool + Send + Sync + 'static,
    {
        Self::from_run(RetryIf {
            source: self.clone(),
            predicate: Arc::new(predicate),
        })
    }

    /// Re-runs the source on failure, up to `retries` times, waiting between
    /// attempts according to `backoff`.
    ///
    /// The wait is armed through the scheduler, and the timer handle is bound
    /// to the activation: canceling during the wait stops the retry loop.
    pub fn on_error_retry_backoff(&self, retries: u64, backoff: BackoffStrategy) -> Self {
        Self::from_run(RetryBackoff {
            source: self.clone(),
            retries,
            backoff,
        })
    }
}

// ---- failed ----

struct Failed<T> {
    source: Task<T>,
}

impl<T: Send + 'static> RunTask<TaskError> for Failed<T> {
    fn exec(&self, ctx: &Context, frame: FrameId, cb: ListenerRef<TaskError>) {
        let listener = Arc::new(FailedListener {
            ctx: ctx.clone(),
            downstream: cb,
        });
        let source = self.source.clone();
        let entry = ctx.clone();
        step(ctx, frame, move |fid| source.exec(&entry, fid, listener));
    }
}

struct FailedListener {
    ctx: Context,
    downstream: ListenerRef<TaskError>,
}

impl<T: Send + 'static> Listener<T> for FailedListener {
    fn on_success(&self, frame: FrameId, _value: T) {
        deliver_error(
            &self.ctx,
            frame,
            self.downstream.clone(),
            TaskError::NoSuchElement,
        );
    }

    fn on_error(&self, frame: FrameId, error: TaskError) {
        deliver_success(&self.ctx, frame, self.downstream.clone(), error);
    }
}

// ---- recovery ----

struct Recover<T> {
    source: Task<T>,
    f: Arc<dyn Fn(&TaskError) -> Option<T> + Send + Sync>,
}

impl<T: Send + 'static> RunTask<T> for Recover<T> {
    fn exec(&self, ctx: &Context, frame: FrameId, cb: ListenerRef<T>) {
        let listener = Arc::new(RecoverListener {
            ctx: ctx.clone(),
            f: self.f.clone(),
            downstream: cb,
        });
        let source = self.source.clone();
        let entry = ctx.clone();
        step(ctx, frame, move |fid| source.exec(&entry, fid, listener));
    }
}

struct RecoverListener<T> {
    ctx: Context,
    f: Arc<dyn Fn(&TaskError) -> Option<T> + Send + Sync>,
    downstream: ListenerRef<T>,
}

impl<T: Send + 'static> Listener<T> for RecoverListener<T> {
    fn on_success(&self, frame: FrameId, value: T) {
        deliver_success(&self.ctx, frame, self.downstream.clone(), value);
    }

    fn on_error(&self, frame: FrameId, error: TaskError) {
        match catch_user(|| (self.f)(&error)) {
            Ok(Some(value)) => deliver_success(&self.ctx, frame, self.downstream.clone(), value),
            Ok(None) => deliver_error(&self.ctx, frame, self.downstream.clone(), error),
            Err(decider_error) => {
                self.ctx.scheduler.report_failure(&error);
                deliver_error(&self.ctx, frame, self.downstream.clone(), decider_error);
            }
        }
    }
}

struct RecoverWith<T> {
    source: Task<T>,
    f: Arc<dyn Fn(&TaskError) -> Option<Task<T>> + Send + Sync>,
}

impl<T: Send + 'static> RunTask<T> for RecoverWith<T> {
    fn exec(&self, ctx: &Context, frame: FrameId, cb: ListenerRef<T>) {
        let listener = Arc::new(RecoverWithListener {
            ctx: ctx.clone(),
            f: self.f.clone(),
            downstream: cb,
        });
        let source = self.source.clone();
        let entry = ctx.clone();
        step(ctx, frame, move |fid| source.exec(&entry, fid, listener));
    }
}

struct RecoverWithListener<T> {
    ctx: Context,
    f: Arc<dyn Fn(&TaskError) -> Option<Task<T>> + Send + Sync>,
    downstream: ListenerRef<T>,
}

impl<T: Send + 'static> Listener<T> for RecoverWithListener<T> {
    fn on_success(&self, frame: FrameId, value: T) {
        deliver_success(&self.ctx, frame, self.downstream.clone(), value);
    }

    fn on_error(&self, frame: FrameId, error: TaskError) {
        match catch_user(|| (self.f)(&error)) {
            Ok(Some(next)) => {
                let entry = self.ctx.clone();
                let downstream = self.downstream.clone();
                step(&self.ctx, frame, move |fid| {
                    next.exec(&entry, fid, downstream)
                });
            }
            Ok(None) => deliver_error(&self.ctx, frame, self.downstream.clone(), error),
            Err(decider_error) => {
                self.ctx.scheduler.report_failure(&error);
                deliver_error(&self.ctx, frame, self.downstream.clone(), decider_error);
            }
        }
    }
}

struct Fallback<T> {
    source: Task<T>,
    other: Arc<dyn Fn() -> Task<T> + Send + Sync>,
}

impl<T: Send + 'static> RunTask<T> for Fallback<T> {
    fn exec(&self, ctx: &Context, frame: FrameId, cb: ListenerRef<T>) {
        let listener = Arc::new(FallbackListener {
            ctx: ctx.clone(),
            other: self.other.clone(),
            downstream: cb,
        });
        let source = self.source.clone();
        let entry = ctx.clone();
        step(ctx, frame, move |fid| source.exec(&entry, fid, listener));
    }
}

struct FallbackListener<T> {
    ctx: Context,
    other: Arc<dyn Fn() -> Task<T> + Send + Sync>,
    downstream: ListenerRef<T>,
}

impl<T: Send + 'static> Listener<T> for FallbackListener<T> {
    fn on_success(&self, frame: FrameId, value: T) {
        deliver_success(&self.ctx, frame, self.downstream.clone(), value);
    }

    fn on_error(&self, frame: FrameId, error: TaskError) {
        match catch_user(|| (self.other)()) {
            Ok(next) => {
                let entry = self.ctx.clone();
                let downstream = self.downstream.clone();
                step(&self.ctx, frame, move |fid| {
                    next.exec(&entry, fid, downstream)
                });
            }
            Err(producer_error) => {
                self.ctx.scheduler.report_failure(&error);
                deliver_error(&self.ctx, frame, self.downstream.clone(), producer_error);
            }
        }
    }
}

// ---- retry ----

struct Retry<T> {
    source: Task<T>,
    retries: u64,
}

impl<T: Send + 'static> RunTask<T> for Retry<T> {
    fn exec(&self, ctx: &Context, frame: FrameId, cb: ListenerRef<T>) {
        let listener = Arc::new(RetryListener {
            ctx: ctx.clone(),
            source: self.source.clone(),
            left: self.retries,
            downstream: cb,
        });
        let source = self.source.clone();
        let entry = ctx.clone();
        step(ctx, frame, move |fid| source.exec(&entry, fid, listener));
    }
}

struct RetryListener<T> {
    ctx: Context,
    source: Task<T>,
    left: u64,
    downstream: ListenerRef<T>,
}

impl<T: Send + 'static> Listener<T> for RetryListener<T> {
    fn on_success(&self, frame: FrameId, value: T) {
        deliver_success(&self.ctx, frame, self.downstream.clone(), value);
    }

    fn on_error(&self, frame: FrameId, error: TaskError) {
        if self.left == 0 {
            deliver_error(&self.ctx, frame, self.downstream.clone(), error);
            return;
        }
        let next = Arc::new(RetryListener {
            ctx: self.ctx.clone(),
            source: self.source.clone(),
            left: self.left - 1,
            downstream: self.downstream.clone(),
        });
        let source = self.source.clone();
        let entry = self.ctx.clone();
        step(&self.ctx, frame, move |fid| source.exec(&entry, fid, next));
    }
}

struct RetryIf<T> {
    source: Task<T>,
    predicate: Arc<dyn Fn(&TaskError) -> bool + Send + Sync>,
}

impl<T: Send + 'static> RunTask<T> for RetryIf<T> {
    fn exec(&self, ctx: &Context, frame: FrameId, cb: ListenerRef<T>) {
        let listener = Arc::new(RetryIfListener {
            ctx: ctx.clone(),
            source: self.source.clone(),
            predicate: self.predicate.clone(),
            downstream: cb,
        });
        let source = self.source.clone();
        let entry = ctx.clone();
        step(ctx, frame, move |fid| source.exec(&entry, fid, listener));
    }
}

struct RetryIfListener<T> {
    ctx: Context,
    source: Task<T>,
    predicate: Arc<dyn Fn(&TaskError) -> bool + Send + Sync>,
    downstream: ListenerRef<T>,
}

impl<T: Send + 'static> Listener<T> for RetryIfListener<T> {
    fn on_success(&self, frame: FrameId, value: T) {
        deliver_success(&self.ctx, frame, self.downstream.clone(), value);
    }

    fn on_error(&self, frame: FrameId, error: TaskError) {
        match catch_user(|| (self.predicate)(&error)) {
            Ok(true) => {
                let next = Arc::new(RetryIfListener {
                    ctx: self.ctx.clone(),
                    source: self.source.clone(),
                    predicate: self.predicate.clone(),
                    downstream: self.downstream.clone(),
                });
                let source = self.source.clone();
                let entry = self.ctx.clone();
                step(&self.ctx, frame, move |fid| source.exec(&entry, fid, next));
            }
            Ok(false) => deliver_error(&self.ctx, frame, self.downstream.clone(), error),
            Err(predicate_error) => {
                self.ctx.scheduler.report_failure(&error);
                deliver_error(&self.ctx, frame, self.downstream.clone(), predicate_error);
            }
        }
    }
}

struct RetryBackoff<T> {
    source: Task<T>,
    retries: u64,
    backoff: BackoffStrategy,
}

impl<T: Send + 'static> RunTask<T> for RetryBackoff<T> {
    fn exec(&self, ctx: &Context, frame: FrameId, cb: ListenerRef<T>) {
        let listener = Arc::new(RetryBackoffListener {
            ctx: ctx.clone(),
            source: self.source.clone(),
            left: self.retries,
            backoff: self.backoff,
            prev_delay: None,
            downstream: cb,
        });
        let source = self.source.clone();
        let entry = ctx.clone();
        step(ctx, frame, move |fid| source.exec(&entry, fid, listener));
    }
}

struct RetryBackoffListener<T> {
    ctx: Context,
    source: Task<T>,
    left: u64,
    backoff: BackoffStrategy,
    prev_delay: Option<Duration>,
    downstream: ListenerRef<T>,
}

impl<T: Send + 'static> Listener<T> for RetryBackoffListener<T> {
    fn on_success(&self, frame: FrameId, value: T) {
        deliver_success(&self.ctx, frame, self.downstream.clone(), value);
    }

    fn on_error(&self, frame: FrameId, error: TaskError) {
        if self.left == 0 {
            deliver_error(&self.ctx, frame, self.downstream.clone(), error);
            return;
        }
        let delay = self.backoff.next(self.prev_delay);
        let next = Arc::new(RetryBackoffListener {
            ctx: self.ctx.clone(),
            source: self.source.clone(),
            left: self.left - 1,
            backoff: self.backoff,
            prev_delay: Some(delay),
            downstream: self.downstream.clone(),
        });
        let source = self.source.clone();
        let entry = self.ctx.clone();
        let handle = self.ctx.scheduler.schedule_once(
            delay,
            Box::new(move || {
                if entry.active.is_canceled() {
                    return;
                }
                start_now(|fid| source.exec(&entry, fid, next));
            }),
        );
        self.ctx.active.assign(handle);
    }
}

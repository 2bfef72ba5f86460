//! # The lazy task type.
//!
//! A [`Task`] is an immutable description of an asynchronous computation that
//! produces either a value or a [`TaskError`]. Nothing executes until one of
//! the `run_async` entries is called with a scheduler; running the same task
//! twice re-executes its effect.
//!
//! Descriptions are cheap to clone and safe to share: every combinator
//! returns a new task wrapping its source, and the tree is traversed through
//! the trampoline in [`crate::run_loop`] when started.
//!
//! The representation is a tagged sum. `now` and `raise_error` keep dedicated
//! variants because they can complete at the `run_async` boundary without
//! touching the scheduler; everything else is a boxed variant with its own
//! run method.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::callback::{Callback, FnCallback, Listener, ListenerRef, SafeCallback};
use crate::cancelable::{CancelToken, Cancelable, MultiAssignCancelable};
use crate::error::{TaskError, catch_user};
use crate::run_loop::{
    Context, FrameId, deliver_error, deliver_success, start, start_async, start_now, step,
};
use crate::scheduler::SchedulerRef;

/// # Lazy description of an asynchronous computation.
///
/// # Example
/// ```
/// use std::sync::{Arc, Mutex};
/// use lazytask::{SchedulerRef, SimScheduler, Task};
///
/// let sim = SimScheduler::new();
/// let scheduler: SchedulerRef = Arc::new(sim.clone());
///
/// let out = Arc::new(Mutex::new(None));
/// let sink = out.clone();
/// Task::now(2).map(|x| x * 21).run_async_fn(&scheduler, move |r| {
///     *sink.lock().unwrap() = Some(r);
/// });
/// assert!(matches!(*out.lock().unwrap(), Some(Ok(42))));
/// ```
pub struct Task<T> {
    inner: Arc<TaskInner<T>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

enum TaskInner<T> {
    /// Already-known value; completes without the scheduler.
    Pure(Box<dyn Fn() -> T + Send + Sync>),
    /// Already-known failure; completes without the scheduler.
    Raise(TaskError),
    /// Everything else: a variant with its own run method.
    Run(Box<dyn RunTask<T>>),
}

/// One task variant's execution entry.
///
/// `exec` is only ever entered through [`step`]/[`start`], so implementations
/// can assume cancelation was checked on the way in.
pub(crate) trait RunTask<T>: Send + Sync {
    fn exec(&self, ctx: &Context, frame: FrameId, cb: ListenerRef<T>);
}

impl<T: Send + 'static> Task<T> {
    pub(crate) fn from_run(run: impl RunTask<T> + 'static) -> Self {
        Self {
            inner: Arc::new(TaskInner::Run(Box::new(run))),
        }
    }

    /// A task that completes with `value` on every run.
    pub fn now(value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self {
            inner: Arc::new(TaskInner::Pure(Box::new(move || value.clone()))),
        }
    }

    /// A task that fails with `error` on every run.
    pub fn raise_error(error: TaskError) -> Self {
        Self {
            inner: Arc::new(TaskInner::Raise(error)),
        }
    }

    /// A task that evaluates `thunk` on every run.
    ///
    /// The closure is guarded by a mutex so an `FnMut` can be invoked through
    /// `&self`; the lock is held only while producing the value, not while
    /// downstream continuations run.
    pub fn eval<F>(thunk: F) -> Self
    where
        F: FnMut() -> T + Send + 'static,
    {
        Self::from_run(Eval {
            thunk: Mutex::new(thunk),
        })
    }

    /// A task produced lazily by `producer` on every run.
    pub fn defer<F>(producer: F) -> Self
    where
        F: Fn() -> Task<T> + Send + Sync + 'static,
    {
        Self::from_run(Defer {
            producer: Box::new(producer),
        })
    }

    /// A task that never completes. Useful with [`Task::timeout`] and for
    /// exercising cancelation.
    pub fn never() -> Self {
        Self::from_run(Never)
    }

    /// Bridges a callback-style API into a task.
    ///
    /// On each run `register` receives the scheduler and a callback to
    /// complete; the cancel handle it returns is bound to the activation so
    /// the caller can abort the registration. A panic inside `register` is
    /// delivered through the callback's error arm.
    pub fn create<F>(register: F) -> Self
    where
        F: Fn(&SchedulerRef, Arc<dyn Callback<T>>) -> Cancelable + Send + Sync + 'static,
    {
        Self::from_run(Create { register })
    }

    /// Forces an asynchronous boundary before running this task.
    pub fn fork(&self) -> Self {
        Self::from_run(Fork {
            inner: self.clone(),
        })
    }

    /// Transforms the produced value with `f`.
    ///
    /// A panic inside `f` is quarantined and delivered through the error arm;
    /// source errors are forwarded unchanged.
    pub fn map<R, F>(&self, f: F) -> Task<R>
    where
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        Task::from_run(Map {
            source: self.clone(),
            f: Arc::new(f),
        })
    }

    /// Continues with the task produced by `f` from the value.
    pub fn flat_map<R, F>(&self, f: F) -> Task<R>
    where
        R: Send + 'static,
        F: Fn(T) -> Task<R> + Send + Sync + 'static,
    {
        Task::from_run(FlatMap {
            source: self.clone(),
            f: Arc::new(f),
        })
    }

    /// Postpones the start of this task by `delay`.
    ///
    /// Canceling during the wait unarms the timer, so the source never runs.
    pub fn delay_execution(&self, delay: Duration) -> Self {
        Self::from_run(DelayExecution {
            source: self.clone(),
            delay,
        })
    }

    /// Runs the task immediately but postpones a successful result by
    /// `delay`. Errors are delivered without delay.
    pub fn delay_result(&self, delay: Duration) -> Self {
        Self::from_run(DelayResult {
            source: self.clone(),
            delay,
        })
    }

    /// Starts execution: allocates a fresh cancel handle, wraps `callback`
    /// into the single-shot gate and enters the run loop.
    ///
    /// The returned handle aborts the run; after cancelation no arm of
    /// `callback` fires.
    pub fn run_async<C>(&self, scheduler: &SchedulerRef, callback: C) -> Cancelable
    where
        C: Callback<T> + 'static,
    {
        let active = MultiAssignCancelable::arc();
        let safe: ListenerRef<T> = Arc::new(SafeCallback::new(Box::new(callback), scheduler.clone()));
        match self.inner.as_ref() {
            TaskInner::Pure(value) => match catch_user(|| value()) {
                Ok(value) => safe.on_success(FrameId::FIRST, value),
                Err(error) => safe.on_error(FrameId::FIRST, error),
            },
            TaskInner::Raise(error) => safe.on_error(FrameId::FIRST, error.clone()),
            TaskInner::Run(_) => {
                let ctx = Context::new(scheduler.clone(), active.clone());
                let this = self.clone();
                let entry = ctx.clone();
                start(&ctx, move |fid| this.exec(&entry, fid, safe));
            }
        }
        active
    }

    /// Starts execution, delivering the outcome to a closure over `Result`.
    pub fn run_async_fn<F>(&self, scheduler: &SchedulerRef, f: F) -> Cancelable
    where
        F: Fn(Result<T, TaskError>) + Send + Sync + 'static,
    {
        self.run_async(scheduler, FnCallback::new(f))
    }

    /// Runs the task tree. Entered only through [`step`]/[`start`].
    pub(crate) fn exec(&self, ctx: &Context, frame: FrameId, cb: ListenerRef<T>) {
        match self.inner.as_ref() {
            TaskInner::Pure(value) => match catch_user(|| value()) {
                Ok(value) => cb.on_success(frame, value),
                Err(error) => cb.on_error(frame, error),
            },
            TaskInner::Raise(error) => cb.on_error(frame, error.clone()),
            TaskInner::Run(run) => run.exec(ctx, frame, cb),
        }
    }
}

impl<T: Send + 'static> Task<Task<T>> {
    /// Flattens one level of task nesting.
    pub fn flatten(&self) -> Task<T> {
        self.flat_map(|task| task)
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.as_ref() {
            TaskInner::Pure(_) => f.write_str("Task::Now"),
            TaskInner::Raise(error) => f.debug_tuple("Task::Raise").field(error).finish(),
            TaskInner::Run(_) => f.write_str("Task::Run"),
        }
    }
}

// ---- Leaf variants ----

struct Eval<F> {
    thunk: Mutex<F>,
}

impl<T, F> RunTask<T> for Eval<F>
where
    T: Send + 'static,
    F: FnMut() -> T + Send + 'static,
{
    fn exec(&self, _ctx: &Context, frame: FrameId, cb: ListenerRef<T>) {
        let mut thunk = match self.thunk.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let out = catch_user(|| (*thunk)());
        drop(thunk);
        match out {
            Ok(value) => cb.on_success(frame, value),
            Err(error) => cb.on_error(frame, error),
        }
    }
}

struct Defer<T> {
    producer: Box<dyn Fn() -> Task<T> + Send + Sync>,
}

impl<T: Send + 'static> RunTask<T> for Defer<T> {
    fn exec(&self, ctx: &Context, frame: FrameId, cb: ListenerRef<T>) {
        match catch_user(|| (self.producer)()) {
            Ok(task) => {
                let entry = ctx.clone();
                step(ctx, frame, move |fid| task.exec(&entry, fid, cb));
            }
            Err(error) => cb.on_error(frame, error),
        }
    }
}

struct Never;

impl<T: Send + 'static> RunTask<T> for Never {
    fn exec(&self, _ctx: &Context, _frame: FrameId, _cb: ListenerRef<T>) {}
}

struct Fork<T> {
    inner: Task<T>,
}

impl<T: Send + 'static> RunTask<T> for Fork<T> {
    fn exec(&self, ctx: &Context, _frame: FrameId, cb: ListenerRef<T>) {
        let inner = self.inner.clone();
        let entry = ctx.clone();
        start_async(ctx, move |fid| inner.exec(&entry, fid, cb));
    }
}

struct Create<F> {
    register: F,
}

impl<T, F> RunTask<T> for Create<F>
where
    T: Send + 'static,
    F: Fn(&SchedulerRef, Arc<dyn Callback<T>>) -> Cancelable + Send + Sync + 'static,
{
    fn exec(&self, ctx: &Context, _frame: FrameId, cb: ListenerRef<T>) {
        let bridge = Arc::new(CreateBridge {
            ctx: ctx.clone(),
            done: AtomicBool::new(false),
            listener: cb,
        });
        let callback: Arc<dyn Callback<T>> = bridge.clone();
        match catch_user(|| (self.register)(&ctx.scheduler, callback)) {
            Ok(handle) => ctx.active.assign(handle),
            Err(error) => bridge.on_error(error),
        }
    }
}

/// Re-enters the run loop from an external completion, with a single-shot
/// gate: user registrations are not trusted to signal exactly once.
struct CreateBridge<T> {
    ctx: Context,
    done: AtomicBool,
    listener: ListenerRef<T>,
}

impl<T: Send + 'static> Callback<T> for CreateBridge<T> {
    fn on_success(&self, value: T) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        deliver_success(&self.ctx, FrameId::FIRST, self.listener.clone(), value);
    }

    fn on_error(&self, error: TaskError) {
        if self.done.swap(true, Ordering::AcqRel) {
            self.ctx.scheduler.report_failure(&error);
            return;
        }
        deliver_error(&self.ctx, FrameId::FIRST, self.listener.clone(), error);
    }
}

// ---- Sequential combinators ----

struct Map<S, T> {
    source: Task<S>,
    f: Arc<dyn Fn(S) -> T + Send + Sync>,
}

impl<S, T> RunTask<T> for Map<S, T>
where
    S: Send + 'static,
    T: Send + 'static,
{
    fn exec(&self, ctx: &Context, frame: FrameId, cb: ListenerRef<T>) {
        let listener = Arc::new(MapListener {
            ctx: ctx.clone(),
            f: self.f.clone(),
            downstream: cb,
        });
        let source = self.source.clone();
        let entry = ctx.clone();
        step(ctx, frame, move |fid| source.exec(&entry, fid, listener));
    }
}

struct MapListener<S, T> {
    ctx: Context,
    f: Arc<dyn Fn(S) -> T + Send + Sync>,
    downstream: ListenerRef<T>,
}

impl<S, T> Listener<S> for MapListener<S, T>
where
    S: Send + 'static,
    T: Send + 'static,
{
    fn on_success(&self, frame: FrameId, value: S) {
        match catch_user(|| (self.f)(value)) {
            Ok(mapped) => deliver_success(&self.ctx, frame, self.downstream.clone(), mapped),
            Err(error) => deliver_error(&self.ctx, frame, self.downstream.clone(), error),
        }
    }

    fn on_error(&self, frame: FrameId, error: TaskError) {
        deliver_error(&self.ctx, frame, self.downstream.clone(), error);
    }
}

struct FlatMap<S, T> {
    source: Task<S>,
    f: Arc<dyn Fn(S) -> Task<T> + Send + Sync>,
}

impl<S, T> RunTask<T> for FlatMap<S, T>
where
    S: Send + 'static,
    T: Send + 'static,
{
    fn exec(&self, ctx: &Context, frame: FrameId, cb: ListenerRef<T>) {
        let listener = Arc::new(FlatMapListener {
            ctx: ctx.clone(),
            f: self.f.clone(),
            downstream: cb,
        });
        let source = self.source.clone();
        let entry = ctx.clone();
        step(ctx, frame, move |fid| source.exec(&entry, fid, listener));
    }
}

struct FlatMapListener<S, T> {
    ctx: Context,
    f: Arc<dyn Fn(S) -> Task<T> + Send + Sync>,
    downstream: ListenerRef<T>,
}

impl<S, T> Listener<S> for FlatMapListener<S, T>
where
    S: Send + 'static,
    T: Send + 'static,
{
    fn on_success(&self, frame: FrameId, value: S) {
        match catch_user(|| (self.f)(value)) {
            Ok(next) => {
                let entry = self.ctx.clone();
                let downstream = self.downstream.clone();
                step(&self.ctx, frame, move |fid| {
                    next.exec(&entry, fid, downstream)
                });
            }
            Err(error) => deliver_error(&self.ctx, frame, self.downstream.clone(), error),
        }
    }

    fn on_error(&self, frame: FrameId, error: TaskError) {
        deliver_error(&self.ctx, frame, self.downstream.clone(), error);
    }
}

struct DelayExecution<T> {
    source: Task<T>,
    delay: Duration,
}

impl<T: Send + 'static> RunTask<T> for DelayExecution<T> {
    fn exec(&self, ctx: &Context, _frame: FrameId, cb: ListenerRef<T>) {
        let source = self.source.clone();
        let entry = ctx.clone();
        let handle = ctx.scheduler.schedule_once(
            self.delay,
            Box::new(move || {
                if entry.active.is_canceled() {
                    return;
                }
                start_now(|fid| source.exec(&entry, fid, cb));
            }),
        );
        ctx.active.assign(handle);
    }
}

struct DelayResult<T> {
    source: Task<T>,
    delay: Duration,
}

impl<T: Send + 'static> RunTask<T> for DelayResult<T> {
    fn exec(&self, ctx: &Context, frame: FrameId, cb: ListenerRef<T>) {
        let listener = Arc::new(DelayResultListener {
            ctx: ctx.clone(),
            delay: self.delay,
            downstream: cb,
        });
        let source = self.source.clone();
        let entry = ctx.clone();
        step(ctx, frame, move |fid| source.exec(&entry, fid, listener));
    }
}

struct DelayResultListener<T> {
    ctx: Context,
    delay: Duration,
    downstream: ListenerRef<T>,
}

impl<T: Send + 'static> Listener<T> for DelayResultListener<T> {
    fn on_success(&self, _frame: FrameId, value: T) {
        let downstream = self.downstream.clone();
        let guard = self.ctx.clone();
        let handle = self.ctx.scheduler.schedule_once(
            self.delay,
            Box::new(move || {
                if guard.active.is_canceled() {
                    return;
                }
                downstream.on_success(FrameId::FIRST, value);
            }),
        );
        self.ctx.active.assign(handle);
    }

    fn on_error(&self, frame: FrameId, error: TaskError) {
        // Errors are not delayed.
        deliver_error(&self.ctx, frame, self.downstream.clone(), error);
    }
}

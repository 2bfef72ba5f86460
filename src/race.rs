//! # Arbiters: races, parallel joins and timeouts.
//!
//! Every combinator here runs its branches under sibling slots of a
//! [`CompositeCancelable`] and selects a unique winner with an atomic gate:
//! exactly one outcome crosses to the downstream listener, and losing
//! branches are canceled promptly. After a winner is chosen, the activation's
//! cancel slot is rebound to the winning branch only, so the loser handles
//! become garbage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use either::Either;

use crate::callback::{Listener, ListenerRef};
use crate::cancelable::{CancelToken, CompositeCancelable, MultiAssignCancelable};
use crate::error::{TaskError, catch_user};
use crate::run_loop::{Context, FrameId, deliver_error, deliver_success, start_now, step};
use crate::task::{RunTask, Task};

impl<T: Send + 'static> Task<T> {
    /// Races this task against `other`; the first completion wins.
    pub fn amb_with(&self, other: &Task<T>) -> Task<T> {
        Task::amb(vec![self.clone(), other.clone()])
    }

    /// Races the given tasks; the first branch to complete, with a value or
    /// an error, wins, and every sibling is canceled.
    ///
    /// # Panics
    ///
    /// Panics if `tasks` is empty.
    pub fn amb(tasks: Vec<Task<T>>) -> Task<T> {
        assert!(!tasks.is_empty(), "amb requires at least one task");
        Task::from_run(Amb { tasks })
    }

    /// Fails with [`TaskError::Timeout`] unless this task completes within
    /// `after`. A timeout cancels the in-flight source.
    pub fn timeout(&self, after: Duration) -> Task<T> {
        Task::from_run(Timeout {
            source: self.clone(),
            after,
            backup: None,
        })
    }

    /// Switches to `backup` unless this task completes within `after`. The
    /// in-flight source is canceled on the switch.
    pub fn timeout_to(&self, after: Duration, backup: &Task<T>) -> Task<T> {
        Task::from_run(Timeout {
            source: self.clone(),
            after,
            backup: Some(backup.clone()),
        })
    }

    /// Runs this task and `that` in parallel and combines their values with
    /// `f`. The first error cancels the sibling and is delivered alone.
    pub fn map2<B, R, F>(&self, that: &Task<B>, f: F) -> Task<R>
    where
        B: Send + 'static,
        R: Send + 'static,
        F: Fn(T, B) -> R + Send + Sync + 'static,
    {
        Task::from_run(Map2 {
            left: self.clone(),
            right: that.clone(),
            f: Arc::new(f),
        })
    }

    /// Runs this task and `that` in parallel and pairs their values.
    pub fn zip<B>(&self, that: &Task<B>) -> Task<(T, B)>
    where
        B: Send + 'static,
    {
        self.map2(that, |a, b| (a, b))
    }
}

// ---- amb ----

struct Amb<T> {
    tasks: Vec<Task<T>>,
}

impl<T: Send + 'static> RunTask<T> for Amb<T> {
    fn exec(&self, ctx: &Context, frame: FrameId, cb: ListenerRef<T>) {
        let won = Arc::new(AtomicBool::new(false));
        let composite = CompositeCancelable::arc();
        ctx.active.assign(composite.clone());

        // Register every branch before starting any, so a branch that wins
        // synchronously still cancels siblings that have yet to start.
        let mut branches = Vec::with_capacity(self.tasks.len());
        for task in &self.tasks {
            let slot = MultiAssignCancelable::arc();
            let key = composite.add(slot.clone());
            branches.push((task.clone(), slot, key));
        }

        for (task, slot, key) in branches {
            let listener = Arc::new(AmbListener {
                won: won.clone(),
                composite: composite.clone(),
                slot: slot.clone(),
                key,
                outer: ctx.clone(),
                downstream: cb.clone(),
            });
            let branch = Context::new(ctx.scheduler.clone(), slot);
            step(ctx, frame, move |fid| task.exec(&branch, fid, listener));
        }
    }
}

struct AmbListener<T> {
    won: Arc<AtomicBool>,
    composite: Arc<CompositeCancelable>,
    slot: Arc<MultiAssignCancelable>,
    key: u64,
    outer: Context,
    downstream: ListenerRef<T>,
}

impl<T> AmbListener<T> {
    /// Attempts to claim the race; the winner cancels all siblings and leaves
    /// the activation bound to its own slot only.
    fn claim(&self) -> bool {
        if self.won.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.composite.remove(self.key);
        self.composite.cancel();
        self.outer.active.assign(self.slot.clone());
        true
    }
}

impl<T: Send + 'static> Listener<T> for AmbListener<T> {
    fn on_success(&self, frame: FrameId, value: T) {
        if self.claim() {
            deliver_success(&self.outer, frame, self.downstream.clone(), value);
        }
    }

    fn on_error(&self, frame: FrameId, error: TaskError) {
        // Losing branches are absorbed without reporting.
        if self.claim() {
            deliver_error(&self.outer, frame, self.downstream.clone(), error);
        }
    }
}

// ---- map2 ----

struct Map2<A, B, R> {
    left: Task<A>,
    right: Task<B>,
    f: Arc<dyn Fn(A, B) -> R + Send + Sync>,
}

impl<A, B, R> RunTask<R> for Map2<A, B, R>
where
    A: Send + 'static,
    B: Send + 'static,
    R: Send + 'static,
{
    fn exec(&self, ctx: &Context, frame: FrameId, cb: ListenerRef<R>) {
        let composite = CompositeCancelable::arc();
        ctx.active.assign(composite.clone());

        let left_slot = MultiAssignCancelable::arc();
        let right_slot = MultiAssignCancelable::arc();
        composite.add(left_slot.clone());
        composite.add(right_slot.clone());

        let shared = Arc::new(JoinShared {
            cell: Mutex::new(JoinCell::Empty),
            done: AtomicBool::new(false),
            f: self.f.clone(),
            composite,
            outer: ctx.clone(),
            downstream: cb,
        });

        let left = self.left.clone();
        let left_ctx = Context::new(ctx.scheduler.clone(), left_slot);
        let left_listener = Arc::new(JoinLeft {
            shared: shared.clone(),
        });
        step(ctx, frame, move |fid| {
            left.exec(&left_ctx, fid, left_listener)
        });

        let right = self.right.clone();
        let right_ctx = Context::new(ctx.scheduler.clone(), right_slot);
        let right_listener = Arc::new(JoinRight { shared });
        step(ctx, frame, move |fid| {
            right.exec(&right_ctx, fid, right_listener)
        });
    }
}

/// Cell tracking which side of the join has arrived.
enum JoinCell<A, B> {
    Empty,
    First(Either<A, B>),
    Done,
}

/// What a branch found when it signaled into the cell.
enum Arrival<A, B> {
    Wait,
    Pair(A, B),
    Violation,
}

struct JoinShared<A, B, R> {
    cell: Mutex<JoinCell<A, B>>,
    done: AtomicBool,
    f: Arc<dyn Fn(A, B) -> R + Send + Sync>,
    composite: Arc<CompositeCancelable>,
    outer: Context,
    downstream: ListenerRef<R>,
}

impl<A, B, R> JoinShared<A, B, R>
where
    A: Send + 'static,
    B: Send + 'static,
    R: Send + 'static,
{
    fn complete(&self, frame: FrameId, a: A, b: B) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        match catch_user(|| (self.f)(a, b)) {
            Ok(value) => deliver_success(&self.outer, frame, self.downstream.clone(), value),
            Err(error) => deliver_error(&self.outer, frame, self.downstream.clone(), error),
        }
    }

    fn fault(&self, frame: FrameId, error: TaskError) {
        if self.done.swap(true, Ordering::AcqRel) {
            // An outcome already crossed; late errors go to the reporter.
            self.outer.scheduler.report_failure(&error);
            return;
        }
        self.composite.cancel();
        deliver_error(&self.outer, frame, self.downstream.clone(), error);
    }

    fn violation(&self, frame: FrameId, side: &str) {
        self.fault(
            frame,
            TaskError::IllegalState {
                reason: format!("{side} branch of a join signaled twice"),
            },
        );
    }
}

struct JoinLeft<A, B, R> {
    shared: Arc<JoinShared<A, B, R>>,
}

impl<A, B, R> Listener<A> for JoinLeft<A, B, R>
where
    A: Send + 'static,
    B: Send + 'static,
    R: Send + 'static,
{
    fn on_success(&self, frame: FrameId, value: A) {
        let arrival = {
            let mut cell = self
                .shared
                .cell
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match std::mem::replace(&mut *cell, JoinCell::Done) {
                JoinCell::Empty => {
                    *cell = JoinCell::First(Either::Left(value));
                    Arrival::Wait
                }
                JoinCell::First(Either::Right(b)) => Arrival::Pair(value, b),
                JoinCell::First(Either::Left(_)) | JoinCell::Done => Arrival::Violation,
            }
        };
        match arrival {
            Arrival::Wait => {}
            Arrival::Pair(a, b) => self.shared.complete(frame, a, b),
            Arrival::Violation => self.shared.violation(frame, "left"),
        }
    }

    fn on_error(&self, frame: FrameId, error: TaskError) {
        self.shared.fault(frame, error);
    }
}

struct JoinRight<A, B, R> {
    shared: Arc<JoinShared<A, B, R>>,
}

impl<A, B, R> Listener<B> for JoinRight<A, B, R>
where
    A: Send + 'static,
    B: Send + 'static,
    R: Send + 'static,
{
    fn on_success(&self, frame: FrameId, value: B) {
        let arrival = {
            let mut cell = self
                .shared
                .cell
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match std::mem::replace(&mut *cell, JoinCell::Done) {
                JoinCell::Empty => {
                    *cell = JoinCell::First(Either::Right(value));
                    Arrival::Wait
                }
                JoinCell::First(Either::Left(a)) => Arrival::Pair(a, value),
                JoinCell::First(Either::Right(_)) | JoinCell::Done => Arrival::Violation,
            }
        };
        match arrival {
            Arrival::Wait => {}
            Arrival::Pair(a, b) => self.shared.complete(frame, a, b),
            Arrival::Violation => self.shared.violation(frame, "right"),
        }
    }

    fn on_error(&self, frame: FrameId, error: TaskError) {
        self.shared.fault(frame, error);
    }
}

// ---- timeout ----

struct Timeout<T> {
    source: Task<T>,
    after: Duration,
    backup: Option<Task<T>>,
}

impl<T: Send + 'static> RunTask<T> for Timeout<T> {
    fn exec(&self, ctx: &Context, frame: FrameId, cb: ListenerRef<T>) {
        let claimed = Arc::new(AtomicBool::new(false));
        let composite = CompositeCancelable::arc();
        let main_slot = MultiAssignCancelable::arc();
        let timer_slot = MultiAssignCancelable::arc();
        composite.add(main_slot.clone());
        composite.add(timer_slot.clone());
        ctx.active.assign(composite);

        let after = self.after;
        let timer = {
            let claimed = claimed.clone();
            let main_slot = main_slot.clone();
            let outer = ctx.clone();
            let backup = self.backup.clone();
            let downstream = cb.clone();
            ctx.scheduler.schedule_once(
                after,
                Box::new(move || {
                    if claimed.swap(true, Ordering::AcqRel) {
                        return;
                    }
                    main_slot.cancel();
                    match backup {
                        None => deliver_error(
                            &outer,
                            FrameId::FIRST,
                            downstream,
                            TaskError::Timeout { after },
                        ),
                        Some(backup) => {
                            let slot = MultiAssignCancelable::arc();
                            outer.active.assign(slot.clone());
                            let entry = Context::new(outer.scheduler.clone(), slot);
                            start_now(|fid| backup.exec(&entry, fid, downstream));
                        }
                    }
                }),
            )
        };
        timer_slot.assign(timer);

        let listener = Arc::new(TimeoutListener {
            claimed,
            timer_slot,
            main_slot: main_slot.clone(),
            outer: ctx.clone(),
            downstream: cb,
        });
        let source = self.source.clone();
        let main_ctx = Context::new(ctx.scheduler.clone(), main_slot);
        step(ctx, frame, move |fid| {
            source.exec(&main_ctx, fid, listener)
        });
    }
}

struct TimeoutListener<T> {
    claimed: Arc<AtomicBool>,
    timer_slot: Arc<MultiAssignCancelable>,
    main_slot: Arc<MultiAssignCancelable>,
    outer: Context,
    downstream: ListenerRef<T>,
}

impl<T> TimeoutListener<T> {
    fn claim(&self) -> bool {
        if self.claimed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.timer_slot.cancel();
        self.outer.active.assign(self.main_slot.clone());
        true
    }
}

impl<T: Send + 'static> Listener<T> for TimeoutListener<T> {
    fn on_success(&self, frame: FrameId, value: T) {
        if self.claim() {
            deliver_success(&self.outer, frame, self.downstream.clone(), value);
        }
    }

    fn on_error(&self, frame: FrameId, error: TaskError) {
        if self.claim() {
            deliver_error(&self.outer, frame, self.downstream.clone(), error);
        } else {
            // The timeout already fired; the source's failure has no listener
            // left.
            self.outer.scheduler.report_failure(&error);
        }
    }
}

//! # The frame-counted trampoline.
//!
//! Synchronous combinator chains must not overflow the stack, yet must not
//! pay a thread hop per step. The run loop threads a [`FrameId`] (a depth
//! counter) through every continuation entry and batches:
//!
//! ```text
//!   ┌──────────────┐  frame < batch   ┌───────────────────┐
//!   │ step(ctx, k) │ ───────────────► │ k(frame + 1)      │ same thread
//!   └──────┬───────┘                  └───────────────────┘
//!          │ frame ≥ batch
//!          ▼
//!   ┌──────────────────────────────┐
//!   │ scheduler.execute(k(fresh))  │ fresh runnable, counter reset
//!   └──────────────────────────────┘
//! ```
//!
//! Cancelation is checked before every hop, so a canceled run stops between
//! frames without preempting user code that is already executing.

use std::sync::Arc;

use crate::callback::ListenerRef;
use crate::cancelable::{CancelToken, MultiAssignCancelable};
use crate::error::TaskError;
use crate::scheduler::SchedulerRef;

/// Depth counter for one synchronous batch of continuation hops.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FrameId(u32);

impl FrameId {
    /// The counter a fresh runnable starts from.
    pub(crate) const FIRST: FrameId = FrameId(0);

    pub(crate) fn next(self) -> FrameId {
        FrameId(self.0.saturating_add(1))
    }

    pub(crate) fn depth(self) -> u32 {
        self.0
    }
}

/// Everything one activation of a task needs: where to run and which handle
/// binds the in-flight work.
#[derive(Clone)]
pub(crate) struct Context {
    pub(crate) scheduler: SchedulerRef,
    pub(crate) active: Arc<MultiAssignCancelable>,
}

impl Context {
    pub(crate) fn new(scheduler: SchedulerRef, active: Arc<MultiAssignCancelable>) -> Self {
        Self { scheduler, active }
    }
}

/// Advances the run loop by one hop.
///
/// Does nothing if the activation has been canceled. Below the batch
/// threshold the continuation runs on the current thread with an incremented
/// counter; at the threshold it is re-submitted to the scheduler with a fresh
/// one.
pub(crate) fn step<K>(ctx: &Context, frame: FrameId, k: K)
where
    K: FnOnce(FrameId) + Send + 'static,
{
    if ctx.active.is_canceled() {
        return;
    }
    if frame.depth() < ctx.scheduler.batch_size() {
        k(frame.next());
    } else {
        let guard = ctx.clone();
        ctx.scheduler.execute(Box::new(move || {
            if !guard.active.is_canceled() {
                k(FrameId::FIRST);
            }
        }));
    }
}

/// Enters the run loop according to the scheduler's default policy.
pub(crate) fn start<K>(ctx: &Context, k: K)
where
    K: FnOnce(FrameId) + Send + 'static,
{
    if ctx.scheduler.is_always_async() {
        start_async(ctx, k);
    } else {
        k(FrameId::FIRST);
    }
}

/// Enters the run loop on the current thread.
pub(crate) fn start_now<K>(k: K)
where
    K: FnOnce(FrameId),
{
    k(FrameId::FIRST);
}

/// Enters the run loop on the scheduler, regardless of the batch threshold.
pub(crate) fn start_async<K>(ctx: &Context, k: K)
where
    K: FnOnce(FrameId) + Send + 'static,
{
    let guard = ctx.clone();
    ctx.scheduler.execute(Box::new(move || {
        if !guard.active.is_canceled() {
            k(FrameId::FIRST);
        }
    }));
}

/// Forwards a success to `listener` through [`step`], so delivery also counts
/// as a hop and observes cancelation.
pub(crate) fn deliver_success<T: Send + 'static>(
    ctx: &Context,
    frame: FrameId,
    listener: ListenerRef<T>,
    value: T,
) {
    step(ctx, frame, move |fid| listener.on_success(fid, value));
}

/// Forwards an error to `listener` through [`step`].
pub(crate) fn deliver_error<T: Send + 'static>(
    ctx: &Context,
    frame: FrameId,
    listener: ListenerRef<T>,
    error: TaskError,
) {
    step(ctx, frame, move |fid| listener.on_error(fid, error));
}

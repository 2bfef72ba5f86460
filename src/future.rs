//! # Bridging a running task into a `Future`.
//!
//! [`CancelableFuture`] pairs a read-only future over the task's outcome with
//! the cancel handle of the underlying run. Completion goes through a
//! promise with idempotent try-complete semantics, so canceling after the
//! task finished is a harmless no-op.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::callback::Callback;
use crate::cancelable::Cancelable;
use crate::error::TaskError;
use crate::scheduler::SchedulerRef;
use crate::task::Task;

struct Promise<T> {
    tx: Mutex<Option<oneshot::Sender<Result<T, TaskError>>>>,
}

impl<T> Promise<T> {
    fn try_complete(&self, outcome: Result<T, TaskError>) {
        let sender = match self.tx.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(tx) = sender {
            let _ = tx.send(outcome);
        }
    }
}

struct PromiseCallback<T> {
    promise: Arc<Promise<T>>,
}

impl<T: Send> Callback<T> for PromiseCallback<T> {
    fn on_success(&self, value: T) {
        self.promise.try_complete(Ok(value));
    }

    fn on_error(&self, error: TaskError) {
        self.promise.try_complete(Err(error));
    }
}

/// A read-only future over a running task, plus the right to cancel it.
pub struct CancelableFuture<T> {
    rx: oneshot::Receiver<Result<T, TaskError>>,
    promise: Arc<Promise<T>>,
    work: Cancelable,
}

impl<T: Send + 'static> Task<T> {
    /// Starts execution and returns a future over the outcome.
    ///
    /// `now`/`raise_error` tasks complete the future before this returns,
    /// without touching the scheduler.
    pub fn run_future(&self, scheduler: &SchedulerRef) -> CancelableFuture<T> {
        let (tx, rx) = oneshot::channel();
        let promise = Arc::new(Promise {
            tx: Mutex::new(Some(tx)),
        });
        let work = self.run_async(
            scheduler,
            PromiseCallback {
                promise: promise.clone(),
            },
        );
        CancelableFuture { rx, promise, work }
    }
}

impl<T> CancelableFuture<T> {
    /// Cancels the underlying work and fails the future with
    /// [`TaskError::Canceled`]. Idempotent.
    pub fn cancel(&self) {
        self.work.cancel();
        self.promise.try_complete(Err(TaskError::Canceled));
    }

    /// Reports whether the underlying run has been canceled.
    pub fn is_canceled(&self) -> bool {
        self.work.is_canceled()
    }
}

impl<T> Future for CancelableFuture<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // The sender can only disappear unfulfilled if the run was torn
            // down without an outcome.
            Poll::Ready(Err(_)) => Poll::Ready(Err(TaskError::Canceled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

//! # Scheduling services consumed by the run loop.
//!
//! The core never spawns threads itself; everything that needs a thread hop,
//! a timer or an error sink goes through the [`Scheduler`] trait:
//!
//! - [`Scheduler::execute`] submits a runnable.
//! - [`Scheduler::schedule_once`] arms a one-shot timer and returns a handle
//!   that aborts the wait.
//! - [`Scheduler::report_failure`] is the sink for errors that have nowhere
//!   else to go (listener panics, late completions, superseded recovery
//!   errors).
//!
//! [`TokioScheduler`] is the production implementation over a
//! [`tokio::runtime::Handle`]. Timers are a `select!` between the sleep and a
//! [`CancellationToken`], so canceling the returned handle aborts the wait
//! before the runnable fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::cancelable::{CancelToken, Cancelable};
use crate::config::Config;
use crate::error::TaskError;

/// A unit of work submitted to a scheduler.
pub type Runnable = Box<dyn FnOnce() + Send + 'static>;

/// Shared handle to a scheduler.
pub type SchedulerRef = Arc<dyn Scheduler>;

/// # Execution services for the run loop.
pub trait Scheduler: Send + Sync + 'static {
    /// Submits `job` for execution.
    fn execute(&self, job: Runnable);

    /// Runs `job` after `delay`. The returned handle aborts the wait; once
    /// the job has started, canceling is a no-op.
    fn schedule_once(&self, delay: Duration, job: Runnable) -> Cancelable;

    /// Reports an error that could not be delivered to any listener.
    fn report_failure(&self, error: &TaskError);

    /// When true, `run_async` always submits to the scheduler instead of
    /// running synchronous prefixes on the caller's thread.
    fn is_always_async(&self) -> bool;

    /// Number of synchronous frames the trampoline executes before
    /// re-submitting the continuation.
    fn batch_size(&self) -> u32;
}

/// # Sink for errors that have no surviving listener.
pub trait Reporter: Send + Sync + 'static {
    /// Records one uncaught error.
    fn report(&self, error: &TaskError);
}

/// Default reporter: writes one line per error to stderr.
pub struct StderrReporter;

impl Reporter for StderrReporter {
    fn report(&self, error: &TaskError) {
        eprintln!("[lazytask] uncaught error: {error}");
    }
}

/// # Scheduler backed by a tokio runtime.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use lazytask::{SchedulerRef, TokioScheduler};
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() {
///     let scheduler: SchedulerRef = Arc::new(TokioScheduler::current());
///     scheduler.execute(Box::new(|| println!("hello from the runtime")));
/// }
/// ```
pub struct TokioScheduler {
    handle: Handle,
    config: Config,
    reporter: Arc<dyn Reporter>,
}

impl TokioScheduler {
    /// Binds to the runtime of the calling context.
    ///
    /// Panics outside a tokio runtime, like [`Handle::current`].
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Wraps the given runtime handle with the default [`Config`] and the
    /// stderr reporter.
    pub fn new(handle: Handle) -> Self {
        Self::with_config(handle, Config::default(), Arc::new(StderrReporter))
    }

    /// Wraps the given runtime handle with an explicit configuration and
    /// reporter.
    pub fn with_config(handle: Handle, config: Config, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            handle,
            config,
            reporter,
        }
    }
}

impl Scheduler for TokioScheduler {
    fn execute(&self, job: Runnable) {
        self.handle.spawn(async move { job() });
    }

    fn schedule_once(&self, delay: Duration, job: Runnable) -> Cancelable {
        let token = CancellationToken::new();
        let guard = token.clone();
        self.handle.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => job(),
                _ = guard.cancelled() => {}
            }
        });
        Arc::new(TokenCancelable { token })
    }

    fn report_failure(&self, error: &TaskError) {
        self.reporter.report(error);
    }

    fn is_always_async(&self) -> bool {
        self.config.always_async
    }

    fn batch_size(&self) -> u32 {
        self.config.batch_size
    }
}

/// Bridges a [`CancellationToken`] into the cancel-handle hierarchy.
struct TokenCancelable {
    token: CancellationToken,
}

impl CancelToken for TokenCancelable {
    fn cancel(&self) {
        self.token.cancel();
    }

    fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }
}

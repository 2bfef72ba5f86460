//! # lazytask
//!
//! **lazytask** is a lazy, cancelable asynchronous effect library.
//!
//! A [`Task`] is a *description* of a computation producing a value or a
//! failure; nothing runs until the description is started with a scheduler.
//! Descriptions compose through functorial and monadic combinators, support
//! error recovery, racing, timeouts and parallel joins, and every run is
//! bound to a cancel handle the caller may use to abort it.
//!
//! ## Features
//!
//! | Area            | Description                                                       | Key types / traits                            |
//! |-----------------|-------------------------------------------------------------------|-----------------------------------------------|
//! | **Tasks**       | Build and compose lazy computations.                              | [`Task`]                                      |
//! | **Run loop**    | Frame-counted trampoline: bounded stack, no per-step thread hops. | [`Config`]                                    |
//! | **Cancelation** | Handles that own and propagate the right to abort work.           | [`CancelToken`], [`MultiAssignCancelable`], [`CompositeCancelable`] |
//! | **Callbacks**   | At-most-once completion sinks.                                    | [`Callback`]                                  |
//! | **Scheduling**  | Thread pool, timers and the uncaught-error sink.                  | [`Scheduler`], [`TokioScheduler`], [`Reporter`] |
//! | **Testing**     | Deterministic virtual clock.                                      | [`SimScheduler`]                              |
//! | **Retries**     | Bounded retries, predicates, and delayed retries with jitter.     | [`BackoffStrategy`], [`JitterPolicy`]         |
//! | **Futures**     | Await a running task; canceling fails the future.                 | [`CancelableFuture`]                          |
//!
//! ```no_run
//! use std::sync::Arc;
//! use lazytask::{SchedulerRef, Task, TaskError, TokioScheduler};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), TaskError> {
//!     let scheduler: SchedulerRef = Arc::new(TokioScheduler::current());
//!
//!     let task = Task::eval(|| 2)
//!         .map(|x| x + 1)
//!         .flat_map(|x| Task::now(x * 10));
//!
//!     let value = task.run_future(&scheduler).await?;
//!     assert_eq!(value, 30);
//!     Ok(())
//! }
//! ```
//!
//! Tasks are not memoized: running the same description twice re-executes
//! its effect. Cancelation is cooperative and observed between trampoline
//! frames; user code that is already executing inside a frame is never
//! preempted.
//!
//! ---

mod backoff;
mod callback;
mod cancelable;
mod config;
mod error;
mod future;
mod race;
mod recover;
mod run_loop;
mod scheduler;
mod sim;
mod task;

// ---- Public re-exports ----

pub use backoff::{BackoffStrategy, JitterPolicy};
pub use callback::Callback;
pub use cancelable::{
    ActionCancelable, CancelToken, Cancelable, CompositeCancelable, EmptyCancelable,
    MultiAssignCancelable,
};
pub use config::Config;
pub use error::TaskError;
pub use future::CancelableFuture;
pub use scheduler::{Reporter, Runnable, Scheduler, SchedulerRef, StderrReporter, TokioScheduler};
pub use sim::SimScheduler;
pub use task::Task;

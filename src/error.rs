//! # Error types used by the task runtime.
//!
//! This module defines [`TaskError`], the single error enum delivered through
//! task callbacks, plus the panic-capture helpers the run loop uses to
//! quarantine user code.
//!
//! [`TaskError`] provides a helper method `as_label` for metrics and an
//! `is_retryable()` classification used by the retry combinators.
//!
//! "User code throws" maps to panics: a closure handed to `eval`, `map`,
//! `flat_map`, a recovery decider or an outer callback may panic, and the
//! runtime catches the unwind with [`catch_user`] wherever the quarantine is
//! armed. Only unwinding panics are trapped; aborts and stack exhaustion
//! propagate out of the run loop.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use thiserror::Error;

/// # Errors produced by task execution.
///
/// These represent failures of individual task runs: panics escaping user
/// code, explicit failures, timeouts, and cancelation.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    /// A panic escaped from user code while the quarantine was armed.
    #[error("user code panicked: {reason}")]
    Panicked {
        /// Stringified panic payload.
        reason: String,
    },

    /// Task execution failed but may succeed if retried.
    #[error("execution failed: {reason}")]
    Fail { reason: String },

    /// Task execution exceeded its timeout duration.
    #[error("task timed-out after {after:?}")]
    Timeout { after: Duration },

    /// Task was canceled before it could produce an outcome.
    ///
    /// This is **not an error** in the traditional sense, but signals
    /// intentional termination.
    #[error("task was canceled")]
    Canceled,

    /// `failed` was applied to a task that completed successfully.
    #[error("cannot extract the failure of a succeeded task")]
    NoSuchElement,

    /// A completion arrived that the protocol does not permit, e.g. a join
    /// branch signaling twice.
    #[error("completion protocol violated: {reason}")]
    IllegalState { reason: String },
}

impl TaskError {
    /// Shorthand for a retryable failure with the given reason.
    pub fn fail(reason: impl Into<String>) -> Self {
        TaskError::Fail {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Panicked { .. } => "task_panicked",
            TaskError::Fail { .. } => "task_failed",
            TaskError::Timeout { .. } => "task_timeout",
            TaskError::Canceled => "task_canceled",
            TaskError::NoSuchElement => "task_no_such_element",
            TaskError::IllegalState { .. } => "task_illegal_state",
        }
    }

    /// Indicates whether the error type is safe to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TaskError::Panicked { .. } | TaskError::Fail { .. } | TaskError::Timeout { .. }
        )
    }

    /// Converts a caught panic payload into an error.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let reason = if let Some(msg) = payload.downcast_ref::<&'static str>() {
            (*msg).to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "opaque panic payload".to_string()
        };
        TaskError::Panicked { reason }
    }
}

/// Runs user code with the quarantine armed.
///
/// An unwinding panic is converted into [`TaskError::Panicked`] so the caller
/// can route it through the normal error channel.
pub(crate) fn catch_user<R>(f: impl FnOnce() -> R) -> Result<R, TaskError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(payload) => Err(TaskError::from_panic(payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        assert_eq!(TaskError::fail("boom").as_label(), "task_failed");
        assert_eq!(TaskError::Canceled.as_label(), "task_canceled");
        assert_eq!(
            TaskError::Timeout {
                after: Duration::from_millis(50)
            }
            .as_label(),
            "task_timeout"
        );
    }

    #[test]
    fn catch_user_traps_panics() {
        let caught = catch_user(|| -> u32 { panic!("dummy") });
        match caught {
            Err(TaskError::Panicked { reason }) => assert_eq!(reason, "dummy"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(catch_user(|| 7).unwrap(), 7);
    }

    #[test]
    fn timeout_mentions_the_duration() {
        let err = TaskError::Timeout {
            after: Duration::from_millis(50),
        };
        assert!(err.to_string().contains("timed-out after 50ms"));
    }
}

//! Error taxonomy shared by every crate in the priority scheduler workspace.
//!
//! Mirrors spec §7: one variant per failure mode the scheduler, its
//! futures, or the keyed limiter can surface to a caller.

use std::fmt;
use thiserror::Error;

/// Crate-wide result alias, matching the `Result<T, E>` shape used
/// throughout this workspace.
pub type SchedResult<T> = std::result::Result<T, SchedulerError>;

/// The user-visible failure modes of the scheduler.
#[derive(Error, Debug, Clone)]
pub enum SchedulerError {
    /// A null/invalid payload, negative delay or timeout, or
    /// non-positive period was supplied.
    #[error("bad argument: {0}")]
    BadArgument(String),

    /// Submission was attempted after the pool entered
    /// `shutting-down` or `terminated`.
    #[error("pool is closed and no longer accepting submissions")]
    PoolClosed,

    /// The future was observed via `get` after a successful `cancel`.
    #[error("task was cancelled")]
    Cancelled,

    /// The user payload failed; `cause` carries its message.
    #[error("task execution failed: {cause}")]
    ExecutionFailure {
        /// Human-readable description of the original failure.
        cause: String,
    },

    /// A timed `get` expired while the future was still pending.
    #[error("timed out waiting for completion")]
    Timeout,

    /// A blocking call was interrupted by shutdown.
    #[error("operation was interrupted")]
    Interrupted,
}

impl SchedulerError {
    /// Builds a [`SchedulerError::BadArgument`] from any displayable
    /// reason.
    pub fn bad_argument(reason: impl fmt::Display) -> Self {
        SchedulerError::BadArgument(reason.to_string())
    }

    /// Builds a [`SchedulerError::ExecutionFailure`] from a caught
    /// error or panic payload.
    pub fn execution_failure(cause: impl fmt::Display) -> Self {
        SchedulerError::ExecutionFailure {
            cause: cause.to_string(),
        }
    }

    /// True if this variant represents a payload that ran and failed,
    /// as opposed to one that never ran.
    #[must_use]
    pub fn is_execution_failure(&self) -> bool {
        matches!(self, SchedulerError::ExecutionFailure { .. })
    }
}

/// Renders a caught `Box<dyn Any + Send>` panic payload (as produced by
/// `std::panic::catch_unwind`) into a readable string.
#[must_use]
pub fn describe_panic_payload(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_argument_carries_reason() {
        let err = SchedulerError::bad_argument("delay must be non-negative");
        assert_eq!(
            err.to_string(),
            "bad argument: delay must be non-negative"
        );
    }

    #[test]
    fn execution_failure_is_identifiable() {
        let err = SchedulerError::execution_failure("boom");
        assert!(err.is_execution_failure());
        assert!(!SchedulerError::Timeout.is_execution_failure());
    }

    #[test]
    fn describe_panic_payload_handles_str_and_string() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("oops");
        assert_eq!(describe_panic_payload(boxed.as_ref()), "oops");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("oops2"));
        assert_eq!(describe_panic_payload(boxed.as_ref()), "oops2");
    }
}

use std::time::Duration;

use thiserror::Error;

use crate::domain::{JobId, JobStatus};

/// Errors surfaced by the job runner core.
///
/// `Timeout` and `Handler` come from the execution phase and are retried by the
/// executor. Everything else is reported synchronously to whoever made the call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// The request (or a field update) has an invalid shape.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unknown target: {0}")]
    UnknownTarget(String),

    /// Optimistic-concurrency conflict: the record was not in the expected status.
    ///
    /// Always recoverable: re-read the record and decide again.
    #[error("stale transition for {id}: expected {expected}, found {actual}")]
    StaleTransition {
        id: JobId,
        expected: JobStatus,
        actual: JobStatus,
    },

    /// The state machine has no such edge.
    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("handler error: {0}")]
    Handler(String),

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("storage error: {0}")]
    Storage(String),
}

impl JobError {
    /// Execution-phase failures that count against `max_retries`.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Timeout(_) | JobError::Handler(_))
    }

    /// True when a transition lost a race against an external cancellation.
    pub(crate) fn is_cancelled_race(&self) -> bool {
        matches!(
            self,
            JobError::StaleTransition {
                actual: JobStatus::Cancelled,
                ..
            }
        )
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for JobError {
    fn from(err: sqlx::Error) -> Self {
        JobError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for JobError {
    fn from(err: serde_json::Error) -> Self {
        JobError::Storage(format!("json: {err}"))
    }
}

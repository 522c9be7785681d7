//! Job status state machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// Lifecycle status of a job record.
///
/// State transitions:
/// - Pending -> Running (claim) | Cancelled
/// - Running -> Completed | Retrying | Cancelled | Failed
/// - Retrying -> Running | Cancelled | Failed
///
/// Completed, Cancelled and Failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Submitted, waiting for the dispatcher.
    Pending,

    /// Claimed by an executor; an attempt is in flight.
    Running,

    /// Between attempts, waiting out the retry delay.
    Retrying,

    Completed,

    /// Cancelled externally.
    Cancelled,

    /// Retries exhausted (or the target vanished).
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Retrying,
        JobStatus::Completed,
        JobStatus::Cancelled,
        JobStatus::Failed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::Failed
        )
    }

    /// Can an external cancel request move a record out of this status?
    pub fn is_cancellable(self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Running | JobStatus::Retrying
        )
    }

    /// Is `self -> to` an edge of the state machine?
    pub fn can_transition_to(self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Retrying)
                | (Running, Cancelled)
                | (Running, Failed)
                | (Retrying, Running)
                | (Retrying, Cancelled)
                | (Retrying, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Retrying => "retrying",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| JobError::Validation(format!("unknown job status '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::claim(JobStatus::Pending, JobStatus::Running)]
    #[case::cancel_pending(JobStatus::Pending, JobStatus::Cancelled)]
    #[case::succeed(JobStatus::Running, JobStatus::Completed)]
    #[case::schedule_retry(JobStatus::Running, JobStatus::Retrying)]
    #[case::fail(JobStatus::Running, JobStatus::Failed)]
    #[case::rerun(JobStatus::Retrying, JobStatus::Running)]
    #[case::cancel_retrying(JobStatus::Retrying, JobStatus::Cancelled)]
    fn allowed_edges(#[case] from: JobStatus, #[case] to: JobStatus) {
        assert!(from.can_transition_to(to));
    }

    #[rstest]
    #[case::skip_claim(JobStatus::Pending, JobStatus::Completed)]
    #[case::retry_before_run(JobStatus::Pending, JobStatus::Retrying)]
    #[case::resurrect_failed(JobStatus::Failed, JobStatus::Pending)]
    #[case::cancel_completed(JobStatus::Completed, JobStatus::Cancelled)]
    #[case::restart_cancelled(JobStatus::Cancelled, JobStatus::Running)]
    #[case::retrying_completes(JobStatus::Retrying, JobStatus::Completed)]
    fn forbidden_edges(#[case] from: JobStatus, #[case] to: JobStatus) {
        assert!(!from.can_transition_to(to));
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for from in JobStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in JobStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn string_form_round_trips() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Retrying).unwrap(),
            "\"retrying\""
        );
    }
}

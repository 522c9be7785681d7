//! Job record: the persisted lifecycle object.

use std::cmp::Ordering;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::request::{JobRequest, duration_ms};
use super::{JobId, JobStatus};
use crate::error::JobError;

/// Metadata + lifecycle state of one submitted job.
///
/// Single source of truth for the job. Only the store mutates it, and only
/// through `transition`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub target: String,
    pub arguments: Vec<serde_json::Value>,
    pub status: JobStatus,

    /// Number of attempts that have finished (successfully or not).
    pub attempt: u32,

    pub max_retries: u32,

    #[serde(with = "duration_ms")]
    pub retry_delay: Duration,

    #[serde(with = "duration_ms")]
    pub timeout: Duration,

    pub priority: i32,

    /// Set only while `status == Failed`.
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Store-assigned submission number, breaks `created_at` ties.
    pub sequence: u64,
}

impl JobRecord {
    /// A fresh `pending` record for `request`.
    pub fn new(id: JobId, request: JobRequest, sequence: u64, now: DateTime<Utc>) -> Self {
        Self {
            id,
            target: request.target,
            arguments: request.arguments,
            status: JobStatus::Pending,
            attempt: 0,
            max_retries: request.max_retries,
            retry_delay: request.retry_delay,
            timeout: request.timeout,
            priority: request.priority,
            error_message: None,
            created_at: now,
            updated_at: now,
            sequence,
        }
    }

    /// Total attempts the retry budget allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// The parameters this record was submitted with.
    pub fn to_request(&self) -> JobRequest {
        JobRequest {
            target: self.target.clone(),
            arguments: self.arguments.clone(),
            priority: self.priority,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            timeout: self.timeout,
        }
    }

    /// Position of this record in dispatch order.
    pub fn order_key(&self) -> PendingCursor {
        PendingCursor {
            priority: self.priority,
            created_at: self.created_at,
            sequence: self.sequence,
        }
    }

    /// Compare-and-swap the status, applying `fields` on success.
    ///
    /// Leaves the record untouched on error.
    pub fn apply_transition(
        &mut self,
        from: JobStatus,
        to: JobStatus,
        fields: TransitionFields,
        now: DateTime<Utc>,
    ) -> Result<(), JobError> {
        if !from.can_transition_to(to) {
            return Err(JobError::InvalidTransition {
                id: self.id,
                from,
                to,
            });
        }
        if self.status != from {
            return Err(JobError::StaleTransition {
                id: self.id,
                expected: from,
                actual: self.status,
            });
        }
        let attempt = fields.attempt.unwrap_or(self.attempt);
        fields.check_attempt(attempt, self.max_retries)?;

        self.status = to;
        self.attempt = attempt;
        self.error_message = if to == JobStatus::Failed {
            fields.error_message
        } else {
            None
        };
        self.updated_at = now;
        Ok(())
    }
}

/// Field updates carried by a status transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionFields {
    pub attempt: Option<u32>,
    /// Kept only when the target status is `Failed`.
    pub error_message: Option<String>,
}

impl TransitionFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub(crate) fn check_attempt(&self, attempt: u32, max_retries: u32) -> Result<(), JobError> {
        if attempt > max_retries.saturating_add(1) {
            return Err(JobError::Validation(format!(
                "attempt {attempt} exceeds max_retries + 1 ({})",
                max_retries.saturating_add(1)
            )));
        }
        Ok(())
    }
}

/// Keyset position in dispatch order: priority desc, then created_at asc,
/// then sequence asc. "Smaller" means "dispatched earlier".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingCursor {
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub sequence: u64,
}

impl Ord for PendingCursor {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

impl PartialOrd for PendingCursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ulid::Ulid;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn record(max_retries: u32) -> JobRecord {
        let req = JobRequest::new("report").with_max_retries(max_retries);
        JobRecord::new(JobId::from_ulid(Ulid::new()), req, 1, at(0))
    }

    #[test]
    fn new_record_is_pending_with_no_attempts() {
        let rec = record(2);
        assert_eq!(rec.status, JobStatus::Pending);
        assert_eq!(rec.attempt, 0);
        assert_eq!(rec.max_attempts(), 3);
        assert_eq!(rec.created_at, rec.updated_at);
        assert_eq!(rec.to_request().max_retries, 2);
    }

    #[test]
    fn claim_moves_to_running_and_touches_updated_at() {
        let mut rec = record(2);
        rec.apply_transition(
            JobStatus::Pending,
            JobStatus::Running,
            TransitionFields::new(),
            at(5),
        )
        .unwrap();
        assert_eq!(rec.status, JobStatus::Running);
        assert_eq!(rec.updated_at, at(5));
    }

    #[test]
    fn stale_from_status_is_rejected_without_mutation() {
        let mut rec = record(2);
        let before = rec.clone();
        let err = rec
            .apply_transition(
                JobStatus::Running,
                JobStatus::Completed,
                TransitionFields::new().attempt(1),
                at(5),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            JobError::StaleTransition {
                expected: JobStatus::Running,
                actual: JobStatus::Pending,
                ..
            }
        ));
        assert_eq!(rec, before);
    }

    #[test]
    fn undefined_edge_is_invalid_even_when_status_matches() {
        let mut rec = record(2);
        let err = rec
            .apply_transition(
                JobStatus::Pending,
                JobStatus::Completed,
                TransitionFields::new(),
                at(1),
            )
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition { .. }));
    }

    #[test]
    fn attempt_may_not_exceed_retry_budget() {
        let mut rec = record(0);
        rec.apply_transition(JobStatus::Pending, JobStatus::Running, TransitionFields::new(), at(1))
            .unwrap();
        let err = rec
            .apply_transition(
                JobStatus::Running,
                JobStatus::Failed,
                TransitionFields::new().attempt(2).error_message("boom"),
                at(2),
            )
            .unwrap_err();
        assert!(matches!(err, JobError::Validation(_)));
        assert_eq!(rec.status, JobStatus::Running);
    }

    #[test]
    fn error_message_only_sticks_on_failed() {
        let mut rec = record(1);
        rec.apply_transition(JobStatus::Pending, JobStatus::Running, TransitionFields::new(), at(1))
            .unwrap();
        rec.apply_transition(
            JobStatus::Running,
            JobStatus::Retrying,
            TransitionFields::new().attempt(1).error_message("first"),
            at(2),
        )
        .unwrap();
        assert_eq!(rec.error_message, None);

        rec.apply_transition(JobStatus::Retrying, JobStatus::Running, TransitionFields::new(), at(3))
            .unwrap();
        rec.apply_transition(
            JobStatus::Running,
            JobStatus::Failed,
            TransitionFields::new().attempt(2).error_message("second"),
            at(4),
        )
        .unwrap();
        assert_eq!(rec.error_message.as_deref(), Some("second"));
        assert_eq!(rec.attempt, 2);
    }

    #[test]
    fn cursor_orders_by_priority_then_fifo() {
        let low = PendingCursor { priority: 1, created_at: at(0), sequence: 1 };
        let high = PendingCursor { priority: 5, created_at: at(2), sequence: 2 };
        let high_later = PendingCursor { priority: 5, created_at: at(3), sequence: 3 };
        let high_same_instant = PendingCursor { priority: 5, created_at: at(3), sequence: 4 };

        let mut keys = vec![high_same_instant, low, high_later, high];
        keys.sort();
        assert_eq!(keys, vec![high, high_later, high_same_instant, low]);
    }
}

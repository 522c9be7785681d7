//! Executor - one job from claim to terminal status.
//!
//! # Flow
//! 1. claim: `pending -> running` (CAS). Losing the race is not an error.
//! 2. resolve the target in the registry
//! 3. attempt loop: checkpoint -> handler (own task, bounded by timeout) ->
//!    `completed` | `retrying` (+ sleep) | `failed`
//!
//! Cancellation is cooperative: it is observed at every checkpoint and
//! whenever a transition finds the record already `cancelled`.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::RetryPolicy;
use crate::domain::{JobId, JobRecord, JobStatus, TransitionFields};
use crate::error::JobError;
use crate::ports::JobStore;
use crate::registry::{JobHandler, Registry};

/// How an execution ended, other than terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Handler succeeded; `attempts` includes the successful one.
    Completed { attempts: u32 },

    /// The record was cancelled before or during execution.
    Cancelled,

    /// Someone else claimed (or cancelled) the record first. Nothing ran.
    NotClaimed,
}

pub struct Executor {
    store: Arc<dyn JobStore>,
    registry: Arc<Registry>,
    retry: RetryPolicy,
}

impl Executor {
    pub fn new(store: Arc<dyn JobStore>, registry: Arc<Registry>, retry: RetryPolicy) -> Self {
        Self {
            store,
            registry,
            retry,
        }
    }

    /// Run `id` to a terminal status.
    ///
    /// Returns the last attempt's error (`Timeout` or `Handler`) when the
    /// retry budget runs out, and `UnknownTarget` when the target is no
    /// longer registered. Either way the record is `failed` by then.
    pub async fn execute(&self, id: JobId) -> Result<Completion, JobError> {
        let record = match self
            .store
            .transition(id, JobStatus::Pending, JobStatus::Running, TransitionFields::new())
            .await
        {
            Ok(record) => record,
            Err(JobError::StaleTransition { actual, .. }) => {
                debug!(job_id = %id, status = %actual, "claim lost");
                return Ok(Completion::NotClaimed);
            }
            Err(err) => return Err(err),
        };

        match self.run_claimed(record).await {
            Err(err) if err.is_cancelled_race() => {
                info!(job_id = %id, "job cancelled during execution");
                Ok(Completion::Cancelled)
            }
            other => other,
        }
    }

    async fn run_claimed(&self, record: JobRecord) -> Result<Completion, JobError> {
        let id = record.id;
        let max_attempts = record.max_attempts();

        let handler = match self.registry.resolve(&record.target) {
            Ok(entry) => Arc::clone(entry.handler()),
            Err(err) => {
                error!(job_id = %id, target = %record.target, "target is not registered");
                self.store
                    .transition(
                        id,
                        JobStatus::Running,
                        JobStatus::Failed,
                        TransitionFields::new().error_message(err.to_string()),
                    )
                    .await?;
                return Err(err);
            }
        };

        info!(job_id = %id, target = %record.target, priority = record.priority, "job started");

        // Status this execution believes the record is in.
        let mut expected = JobStatus::Running;
        let mut attempt = record.attempt;

        loop {
            // checkpoint
            let current = self.store.get(id).await?;
            if current.status == JobStatus::Cancelled {
                info!(job_id = %id, attempt, "job cancelled before next attempt");
                return Ok(Completion::Cancelled);
            }
            if current.status != expected {
                return Err(JobError::StaleTransition {
                    id,
                    expected,
                    actual: current.status,
                });
            }
            if expected == JobStatus::Retrying {
                self.store
                    .transition(id, JobStatus::Retrying, JobStatus::Running, TransitionFields::new())
                    .await?;
            }

            let result = run_attempt(
                Arc::clone(&handler),
                current.arguments.clone(),
                current.timeout,
            )
            .await;
            attempt += 1;

            let err = match result {
                Ok(()) => {
                    self.store
                        .transition(
                            id,
                            JobStatus::Running,
                            JobStatus::Completed,
                            TransitionFields::new().attempt(attempt),
                        )
                        .await?;
                    info!(job_id = %id, attempt, max_attempts, "job completed");
                    return Ok(Completion::Completed { attempts: attempt });
                }
                Err(err) => err,
            };

            warn!(job_id = %id, attempt, max_attempts, error = %err, "attempt failed");

            if attempt > current.max_retries {
                self.store
                    .transition(
                        id,
                        JobStatus::Running,
                        JobStatus::Failed,
                        TransitionFields::new()
                            .attempt(attempt)
                            .error_message(err.to_string()),
                    )
                    .await?;
                error!(job_id = %id, attempt, error = %err, "job failed, retries exhausted");
                return Err(err);
            }

            self.store
                .transition(
                    id,
                    JobStatus::Running,
                    JobStatus::Retrying,
                    TransitionFields::new().attempt(attempt),
                )
                .await?;
            expected = JobStatus::Retrying;

            let delay = self.retry.delay(current.retry_delay, attempt);
            debug!(job_id = %id, attempt, delay_ms = delay.as_millis() as u64, "retry scheduled");
            tokio::time::sleep(delay).await;
        }
    }
}

/// One handler call in its own task, aborted when `timeout` elapses.
async fn run_attempt(
    handler: Arc<dyn JobHandler>,
    arguments: Vec<Value>,
    timeout: Duration,
) -> Result<(), JobError> {
    let mut task = tokio::spawn(async move { handler.run(arguments).await });
    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(err))) => Err(JobError::Handler(err.message().to_string())),
        Ok(Err(join_err)) if join_err.is_panic() => {
            Err(JobError::Handler(panic_message(join_err.into_panic())))
        }
        Ok(Err(join_err)) => Err(JobError::Handler(join_err.to_string())),
        Err(_elapsed) => {
            task.abort();
            Err(JobError::Timeout(timeout))
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("handler panicked: {msg}")
    } else {
        "handler panicked".to_string()
    }
}

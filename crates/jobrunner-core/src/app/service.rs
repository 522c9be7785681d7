//! JobService - submission, status queries, cancellation, resubmission.
//!
//! Everything a dashboard or CLI does goes through here. Execution is the
//! dispatcher's business; the service only writes records and wakes it.

use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, info};

use crate::config::JobDefaults;
use crate::domain::{JobFilter, JobId, JobPage, JobRecord, JobRequest, JobStatus, Page, TransitionFields};
use crate::error::JobError;
use crate::observability::StatusCounts;
use crate::ports::JobStore;
use crate::registry::Registry;

pub struct JobService {
    store: Arc<dyn JobStore>,
    registry: Arc<Registry>,
    defaults: JobDefaults,
    wake: Arc<Notify>,
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<Registry>,
        defaults: JobDefaults,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            registry,
            defaults,
            wake,
        }
    }

    /// A request for `target` carrying the configured defaults.
    pub fn request(&self, target: impl Into<String>) -> JobRequest {
        self.defaults.request(target)
    }

    /// Validate `request` against the registry and persist it as `pending`.
    ///
    /// Nothing is written when validation fails.
    pub async fn submit(&self, request: JobRequest) -> Result<JobId, JobError> {
        request.validate()?;
        let entry = self.registry.resolve(&request.target)?;
        entry.signature().validate(&request.arguments)?;

        let record = self.store.create(request).await?;
        info!(
            job_id = %record.id,
            target = %record.target,
            priority = record.priority,
            max_retries = record.max_retries,
            "job submitted"
        );
        self.wake.notify_one();
        Ok(record.id)
    }

    pub async fn get(&self, id: JobId) -> Result<JobRecord, JobError> {
        self.store.get(id).await
    }

    pub async fn list(&self, filter: &JobFilter, page: Page) -> Result<JobPage, JobError> {
        self.store.list(filter, page).await
    }

    pub async fn counts(&self) -> Result<StatusCounts, JobError> {
        self.store.counts_by_status().await
    }

    /// Move a non-terminal record to `cancelled`.
    ///
    /// A terminal record is left as is and reported as `InvalidTransition`.
    /// Running work stops at its next checkpoint.
    pub async fn request_cancel(&self, id: JobId) -> Result<JobRecord, JobError> {
        loop {
            let current = self.store.get(id).await?;
            if !current.status.is_cancellable() {
                return Err(JobError::InvalidTransition {
                    id,
                    from: current.status,
                    to: JobStatus::Cancelled,
                });
            }

            match self
                .store
                .transition(id, current.status, JobStatus::Cancelled, TransitionFields::new())
                .await
            {
                Ok(record) => {
                    info!(job_id = %id, from = %current.status, "job cancelled");
                    return Ok(record);
                }
                Err(JobError::StaleTransition { actual, .. }) => {
                    debug!(job_id = %id, status = %actual, "cancel raced a transition, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Submit a fresh `pending` copy of a `failed` record.
    ///
    /// The failed record itself is not touched.
    pub async fn resubmit(&self, id: JobId) -> Result<JobId, JobError> {
        let failed = self.store.get(id).await?;
        if failed.status != JobStatus::Failed {
            return Err(JobError::InvalidTransition {
                id,
                from: failed.status,
                to: JobStatus::Pending,
            });
        }

        let new_id = self.submit(failed.to_request()).await?;
        info!(job_id = %new_id, resubmitted_from = %id, "failed job resubmitted");
        Ok(new_id)
    }
}

//! JobStore port - ジョブレコードの正本
//!
//! # 設計原則
//! - 状態変更はすべて `transition`（compare-and-swap）を通す。
//!   dispatcher・executor・外部からのキャンセルの間で唯一の直列化点になる。
//! - 実装: `store::InMemoryJobStore`、`store::SqliteJobStore`（feature `sqlite`）

use async_trait::async_trait;

use crate::domain::{
    JobFilter, JobId, JobPage, JobRecord, JobRequest, JobStatus, Page, PendingCursor,
    TransitionFields,
};
use crate::error::JobError;
use crate::observability::StatusCounts;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new `pending` record (attempt 0) for `request`.
    async fn create(&self, request: JobRequest) -> Result<JobRecord, JobError>;

    /// Fails with `NotFound` for unknown ids.
    async fn get(&self, id: JobId) -> Result<JobRecord, JobError>;

    /// Atomically move `id` from `from` to `to`, applying `fields`.
    ///
    /// Errors, in check order:
    /// - `InvalidTransition` if `from -> to` is not a state machine edge
    /// - `NotFound`
    /// - `StaleTransition` if the current status is not `from`
    /// - `Validation` if the new attempt count breaks `attempt <= max_retries + 1`
    async fn transition(
        &self,
        id: JobId,
        from: JobStatus,
        to: JobStatus,
        fields: TransitionFields,
    ) -> Result<JobRecord, JobError>;

    /// Up to `limit` pending records strictly after `after`, in dispatch order
    /// (priority desc, created_at asc, sequence asc).
    ///
    /// Pass `None` to restart from the top.
    async fn list_pending(
        &self,
        after: Option<PendingCursor>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, JobError>;

    /// Dashboard listing, priority desc then FIFO.
    async fn list(&self, filter: &JobFilter, page: Page) -> Result<JobPage, JobError>;

    async fn counts_by_status(&self) -> Result<StatusCounts, JobError>;
}

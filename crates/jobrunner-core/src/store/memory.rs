//! In-memory job store.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{
    JobFilter, JobId, JobPage, JobRecord, JobRequest, JobStatus, Page, PendingCursor,
    TransitionFields,
};
use crate::error::JobError;
use crate::observability::StatusCounts;
use crate::ports::{Clock, IdGenerator, JobStore, SystemClock, UlidGenerator};

/// In-memory store state.
struct InMemoryState {
    /// All records (single source of truth).
    records: HashMap<JobId, JobRecord>,

    /// Pending records in dispatch order. Kept in sync with `records` on every
    /// transition into or out of `Pending`.
    pending: BTreeMap<PendingCursor, JobId>,

    next_sequence: u64,
}

impl InMemoryState {
    fn new() -> Self {
        Self {
            records: HashMap::new(),
            pending: BTreeMap::new(),
            next_sequence: 1,
        }
    }

    fn allocate_sequence(&mut self) -> u64 {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        seq
    }
}

/// Job store backed by a `HashMap` behind a tokio `Mutex`.
///
/// The lock is never held across an `.await` outside this type, so the CAS in
/// `transition` is atomic with respect to every other caller.
pub struct InMemoryJobStore {
    state: Mutex<InMemoryState>,
    clock: Arc<dyn Clock>,
    ids: Box<dyn IdGenerator>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let ids = Box::new(UlidGenerator::new(Arc::clone(&clock)));
        Self {
            state: Mutex::new(InMemoryState::new()),
            clock,
            ids,
        }
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, request: JobRequest) -> Result<JobRecord, JobError> {
        let id = self.ids.generate_job_id();
        let now = self.clock.now();

        let mut state = self.state.lock().await;
        let sequence = state.allocate_sequence();
        let record = JobRecord::new(id, request, sequence, now);
        state.pending.insert(record.order_key(), id);
        state.records.insert(id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: JobId) -> Result<JobRecord, JobError> {
        let state = self.state.lock().await;
        state.records.get(&id).cloned().ok_or(JobError::NotFound(id))
    }

    async fn transition(
        &self,
        id: JobId,
        from: JobStatus,
        to: JobStatus,
        fields: TransitionFields,
    ) -> Result<JobRecord, JobError> {
        if !from.can_transition_to(to) {
            return Err(JobError::InvalidTransition { id, from, to });
        }
        let now = self.clock.now();

        let mut state = self.state.lock().await;
        let record = state.records.get_mut(&id).ok_or(JobError::NotFound(id))?;
        record.apply_transition(from, to, fields, now)?;
        let updated = record.clone();

        if from == JobStatus::Pending {
            state.pending.remove(&updated.order_key());
        }
        Ok(updated)
    }

    async fn list_pending(
        &self,
        after: Option<PendingCursor>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, JobError> {
        let state = self.state.lock().await;
        let lower = match after {
            Some(cursor) => Bound::Excluded(cursor),
            None => Bound::Unbounded,
        };
        let page = state
            .pending
            .range((lower, Bound::Unbounded))
            .filter_map(|(_, id)| state.records.get(id))
            .take(limit)
            .cloned()
            .collect();
        Ok(page)
    }

    async fn list(&self, filter: &JobFilter, page: Page) -> Result<JobPage, JobError> {
        let state = self.state.lock().await;
        let mut matching: Vec<&JobRecord> = state
            .records
            .values()
            .filter(|r| filter.matches(r))
            .collect();
        matching.sort_by_key(|r| r.order_key());

        let total = matching.len() as u64;
        let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        let items = matching
            .into_iter()
            .skip(offset)
            .take(page.per_page as usize)
            .cloned()
            .collect();
        Ok(JobPage { items, total, page })
    }

    async fn counts_by_status(&self) -> Result<StatusCounts, JobError> {
        let state = self.state.lock().await;
        let mut counts = StatusCounts::default();
        for record in state.records.values() {
            counts.record(record.status);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};

    fn store_with_clock() -> (InMemoryJobStore, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 11, 14, 22, 34, 35).unwrap(),
        ));
        (InMemoryJobStore::with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn create_and_get() {
        let store = InMemoryJobStore::new();
        let created = store.create(JobRequest::new("report")).await.unwrap();
        assert_eq!(created.status, JobStatus::Pending);
        assert_eq!(created.attempt, 0);

        let fetched = store.get(created.id).await.unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let store = InMemoryJobStore::new();
        let id = JobId::from_ulid(ulid::Ulid::new());
        assert_eq!(store.get(id).await.unwrap_err(), JobError::NotFound(id));
    }

    #[tokio::test]
    async fn transition_is_compare_and_swap() {
        let store = InMemoryJobStore::new();
        let rec = store.create(JobRequest::new("report")).await.unwrap();

        store
            .transition(rec.id, JobStatus::Pending, JobStatus::Running, TransitionFields::new())
            .await
            .unwrap();

        let err = store
            .transition(rec.id, JobStatus::Pending, JobStatus::Running, TransitionFields::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            JobError::StaleTransition { expected: JobStatus::Pending, actual: JobStatus::Running, .. }
        ));
    }

    #[tokio::test]
    async fn invalid_edge_is_checked_before_existence() {
        let store = InMemoryJobStore::new();
        let id = JobId::from_ulid(ulid::Ulid::new());
        let err = store
            .transition(id, JobStatus::Completed, JobStatus::Running, TransitionFields::new())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn concurrent_claims_have_exactly_one_winner() {
        let store = Arc::new(InMemoryJobStore::new());
        let rec = store.create(JobRequest::new("report")).await.unwrap();

        let mut claims = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            claims.push(tokio::spawn(async move {
                store
                    .transition(rec.id, JobStatus::Pending, JobStatus::Running, TransitionFields::new())
                    .await
            }));
        }

        let mut winners = 0;
        for claim in claims {
            match claim.await.unwrap() {
                Ok(_) => winners += 1,
                Err(JobError::StaleTransition { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn list_pending_orders_by_priority_then_fifo() {
        let (store, clock) = store_with_clock();
        let mut ids = Vec::new();
        for priority in [1, 5, 3, 5] {
            ids.push(store.create(JobRequest::new("report").with_priority(priority)).await.unwrap().id);
            clock.advance(chrono::Duration::seconds(1));
        }

        let pending = store.list_pending(None, 10).await.unwrap();
        let order: Vec<JobId> = pending.iter().map(|r| r.id).collect();
        assert_eq!(order, vec![ids[1], ids[3], ids[2], ids[0]]);
    }

    #[tokio::test]
    async fn same_instant_submissions_stay_fifo() {
        let (store, _clock) = store_with_clock();
        let a = store.create(JobRequest::new("report")).await.unwrap();
        let b = store.create(JobRequest::new("report")).await.unwrap();
        let c = store.create(JobRequest::new("report")).await.unwrap();
        assert_eq!(a.created_at, c.created_at);

        let order: Vec<JobId> = store
            .list_pending(None, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(order, vec![a.id, b.id, c.id]);
    }

    #[tokio::test]
    async fn list_pending_pages_with_a_cursor_and_skips_claimed() {
        let store = InMemoryJobStore::new();
        let mut ids = Vec::new();
        for priority in [4, 3, 2, 1] {
            ids.push(store.create(JobRequest::new("report").with_priority(priority)).await.unwrap());
        }
        store
            .transition(ids[1].id, JobStatus::Pending, JobStatus::Running, TransitionFields::new())
            .await
            .unwrap();

        let first = store.list_pending(None, 2).await.unwrap();
        assert_eq!(first.iter().map(|r| r.id).collect::<Vec<_>>(), vec![ids[0].id, ids[2].id]);

        let cursor = first.last().map(|r| r.order_key());
        let second = store.list_pending(cursor, 2).await.unwrap();
        assert_eq!(second.iter().map(|r| r.id).collect::<Vec<_>>(), vec![ids[3].id]);

        let third = store.list_pending(second.last().map(|r| r.order_key()), 2).await.unwrap();
        assert!(third.is_empty());
    }

    #[tokio::test]
    async fn list_filters_and_paginates() {
        let store = InMemoryJobStore::new();
        for priority in 0..12 {
            store.create(JobRequest::new("report").with_priority(priority % 3)).await.unwrap();
        }

        let first = store.list(&JobFilter::default(), Page::default()).await.unwrap();
        assert_eq!(first.total, 12);
        assert_eq!(first.items.len(), 10);
        assert_eq!(first.last_page(), 2);
        assert!(first.items.windows(2).all(|w| w[0].priority >= w[1].priority));

        let second = store.list(&JobFilter::default(), Page::new(2, 10)).await.unwrap();
        assert_eq!(second.items.len(), 2);

        let filter = JobFilter { status: Some(JobStatus::Pending), priority: Some(2) };
        let only_two = store.list(&filter, Page::default()).await.unwrap();
        assert_eq!(only_two.total, 4);
        assert!(only_two.items.iter().all(|r| r.priority == 2));
    }

    #[tokio::test]
    async fn counts_follow_transitions() {
        let store = InMemoryJobStore::new();
        let a = store.create(JobRequest::new("report")).await.unwrap();
        store.create(JobRequest::new("report")).await.unwrap();
        store
            .transition(a.id, JobStatus::Pending, JobStatus::Cancelled, TransitionFields::new())
            .await
            .unwrap();

        let counts = store.counts_by_status().await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.cancelled, 1);
        assert_eq!(counts.total(), 2);
    }

    #[tokio::test]
    async fn updated_at_follows_the_clock() {
        let (store, clock) = store_with_clock();
        let rec = store.create(JobRequest::new("report")).await.unwrap();
        clock.advance(chrono::Duration::seconds(9));
        let claimed = store
            .transition(rec.id, JobStatus::Pending, JobStatus::Running, TransitionFields::new())
            .await
            .unwrap();
        assert_eq!(claimed.created_at, rec.created_at);
        assert_eq!(claimed.updated_at, rec.created_at + chrono::Duration::seconds(9));
    }
}

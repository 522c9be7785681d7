//! SQLite-backed job store (feature `sqlite`).
//!
//! One row per record in `job_records`. `seq` is the rowid and doubles as
//! the FIFO tie-break, timestamps are stored as microseconds since the epoch.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::domain::{
    JobFilter, JobId, JobPage, JobRecord, JobRequest, JobStatus, Page, PendingCursor,
    TransitionFields,
};
use crate::error::JobError;
use crate::observability::StatusCounts;
use crate::ports::{Clock, IdGenerator, JobStore, SystemClock, UlidGenerator};

const COLUMNS: &str = "seq, id, target, arguments, status, attempt, max_retries, \
     retry_delay_ms, timeout_ms, priority, error_message, created_at, updated_at";

/// Durable store. Cheap to clone, the pool is shared.
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl SqliteJobStore {
    /// Open (creating if missing) the database at `url` and run migrations.
    ///
    /// `url` is a sqlx SQLite url such as `sqlite://jobs.db`.
    pub async fn connect(url: &str) -> Result<Self, JobError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::from_pool(pool, Arc::new(SystemClock)).await
    }

    /// Private in-memory database. A single connection, so every query sees
    /// the same database. The connection is never recycled: closing it
    /// would drop every record.
    pub async fn in_memory() -> Result<Self, JobError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::from_pool(pool, Arc::new(SystemClock)).await
    }

    pub async fn from_pool(pool: SqlitePool, clock: Arc<dyn Clock>) -> Result<Self, JobError> {
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        let store = Self { pool, clock, ids };
        store.migrate().await?;
        Ok(store)
    }

    /// Create the table and dispatch index if they do not exist.
    pub async fn migrate(&self) -> Result<(), JobError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_records (
                seq            INTEGER PRIMARY KEY AUTOINCREMENT,
                id             TEXT    NOT NULL UNIQUE,
                target         TEXT    NOT NULL,
                arguments      TEXT    NOT NULL,
                status         TEXT    NOT NULL,
                attempt        INTEGER NOT NULL DEFAULT 0,
                max_retries    INTEGER NOT NULL,
                retry_delay_ms INTEGER NOT NULL,
                timeout_ms     INTEGER NOT NULL,
                priority       INTEGER NOT NULL DEFAULT 0,
                error_message  TEXT    NULL,
                created_at     INTEGER NOT NULL,
                updated_at     INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS job_records_dispatch
                ON job_records (status, priority DESC, created_at, seq)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch(&self, id: JobId) -> Result<JobRecord, JobError> {
        let sql = format!("SELECT {COLUMNS} FROM job_records WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.as_ulid().to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => decode_record(&row),
            None => Err(JobError::NotFound(id)),
        }
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(&self, request: JobRequest) -> Result<JobRecord, JobError> {
        // Durations are stored in whole milliseconds.
        request.validate()?;
        let id = self.ids.generate_job_id();
        // Round to what the column can hold so the returned record matches a re-read.
        let now = from_micros(to_micros(self.clock.now()))?;
        let arguments = serde_json::to_string(&request.arguments)?;

        let result = sqlx::query(
            r#"
            INSERT INTO job_records (
                id, target, arguments, status, attempt, max_retries,
                retry_delay_ms, timeout_ms, priority, error_message,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7, ?8, NULL, ?9, ?9)
            "#,
        )
        .bind(id.as_ulid().to_string())
        .bind(&request.target)
        .bind(arguments)
        .bind(JobStatus::Pending.as_str())
        .bind(i64::from(request.max_retries))
        .bind(to_millis(request.retry_delay))
        .bind(to_millis(request.timeout))
        .bind(request.priority)
        .bind(to_micros(now))
        .execute(&self.pool)
        .await?;

        let sequence = u64::try_from(result.last_insert_rowid())
            .map_err(|_| JobError::Storage("negative rowid".into()))?;
        Ok(JobRecord::new(id, request, sequence, now))
    }

    async fn get(&self, id: JobId) -> Result<JobRecord, JobError> {
        self.fetch(id).await
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
        let now = to_micros(self.clock.now());
        let error_message = if to == JobStatus::Failed {
            fields.error_message.clone()
        } else {
            None
        };
        let key = id.as_ulid().to_string();

        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            r#"
            UPDATE job_records
               SET status = ?1,
                   attempt = COALESCE(?2, attempt),
                   error_message = ?3,
                   updated_at = ?4
             WHERE id = ?5
               AND status = ?6
               AND COALESCE(?2, attempt) <= max_retries + 1
            "#,
        )
        .bind(to.as_str())
        .bind(fields.attempt.map(i64::from))
        .bind(error_message)
        .bind(now)
        .bind(&key)
        .bind(from.as_str())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            // Work out which precondition failed.
            let row = sqlx::query("SELECT status, attempt, max_retries FROM job_records WHERE id = ?")
                .bind(&key)
                .fetch_optional(&mut *tx)
                .await?;
            tx.rollback().await?;

            let Some(row) = row else {
                return Err(JobError::NotFound(id));
            };
            let actual = JobStatus::from_str(row.try_get::<&str, _>("status")?)?;
            if actual != from {
                return Err(JobError::StaleTransition {
                    id,
                    expected: from,
                    actual,
                });
            }
            let attempt = fields
                .attempt
                .unwrap_or(to_u32(row.try_get("attempt")?, "attempt")?);
            let max_retries = to_u32(row.try_get("max_retries")?, "max_retries")?;
            fields.check_attempt(attempt, max_retries)?;
            return Err(JobError::Storage(format!(
                "transition {from} -> {to} for {id} matched no row"
            )));
        }

        let sql = format!("SELECT {COLUMNS} FROM job_records WHERE id = ?");
        let row = sqlx::query(&sql).bind(&key).fetch_one(&mut *tx).await?;
        tx.commit().await?;
        decode_record(&row)
    }

    async fn list_pending(
        &self,
        after: Option<PendingCursor>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, JobError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = match after {
            None => {
                let sql = format!(
                    "SELECT {COLUMNS} FROM job_records WHERE status = 'pending' \
                     ORDER BY priority DESC, created_at ASC, seq ASC LIMIT ?"
                );
                sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?
            }
            Some(cursor) => {
                let sql = format!(
                    "SELECT {COLUMNS} FROM job_records WHERE status = 'pending' \
                     AND (priority < ?1 OR (priority = ?1 AND \
                          (created_at > ?2 OR (created_at = ?2 AND seq > ?3)))) \
                     ORDER BY priority DESC, created_at ASC, seq ASC LIMIT ?4"
                );
                sqlx::query(&sql)
                    .bind(cursor.priority)
                    .bind(to_micros(cursor.created_at))
                    .bind(i64::try_from(cursor.sequence).unwrap_or(i64::MAX))
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(decode_record).collect()
    }

    async fn list(&self, filter: &JobFilter, page: Page) -> Result<JobPage, JobError> {
        let status = filter.status.map(|s| s.as_str());
        let clause = "(?1 IS NULL OR status = ?1) AND (?2 IS NULL OR priority = ?2)";

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM job_records WHERE {clause}"
        ))
        .bind(status)
        .bind(filter.priority)
        .fetch_one(&self.pool)
        .await?;

        let sql = format!(
            "SELECT {COLUMNS} FROM job_records WHERE {clause} \
             ORDER BY priority DESC, created_at ASC, seq ASC LIMIT ?3 OFFSET ?4"
        );
        let rows = sqlx::query(&sql)
            .bind(status)
            .bind(filter.priority)
            .bind(i64::from(page.per_page))
            .bind(i64::try_from(page.offset()).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        Ok(JobPage {
            items: rows.iter().map(decode_record).collect::<Result<_, _>>()?,
            total: u64::try_from(total).unwrap_or(0),
            page,
        })
    }

    async fn counts_by_status(&self) -> Result<StatusCounts, JobError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM job_records GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        let mut counts = StatusCounts::default();
        for row in rows {
            let status = JobStatus::from_str(row.try_get::<&str, _>("status")?)?;
            let n: i64 = row.try_get("n")?;
            counts.add(status, u64::try_from(n).unwrap_or(0));
        }
        Ok(counts)
    }
}

fn decode_record(row: &SqliteRow) -> Result<JobRecord, JobError> {
    let arguments: String = row.try_get("arguments")?;
    Ok(JobRecord {
        id: JobId::from_str(row.try_get::<&str, _>("id")?)?,
        target: row.try_get("target")?,
        arguments: serde_json::from_str(&arguments)?,
        status: JobStatus::from_str(row.try_get::<&str, _>("status")?)?,
        attempt: to_u32(row.try_get("attempt")?, "attempt")?,
        max_retries: to_u32(row.try_get("max_retries")?, "max_retries")?,
        retry_delay: from_millis(row.try_get("retry_delay_ms")?),
        timeout: from_millis(row.try_get("timeout_ms")?),
        priority: row.try_get("priority")?,
        error_message: row.try_get("error_message")?,
        created_at: from_micros(row.try_get("created_at")?)?,
        updated_at: from_micros(row.try_get("updated_at")?)?,
        sequence: u64::try_from(row.try_get::<i64, _>("seq")?)
            .map_err(|_| JobError::Storage("negative seq".into()))?,
    })
}

fn to_u32(value: i64, column: &str) -> Result<u32, JobError> {
    u32::try_from(value).map_err(|_| JobError::Storage(format!("{column} out of range: {value}")))
}

fn to_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

fn from_millis(ms: i64) -> Duration {
    Duration::from_millis(u64::try_from(ms).unwrap_or(0))
}

fn to_micros(t: DateTime<Utc>) -> i64 {
    t.timestamp_micros()
}

fn from_micros(us: i64) -> Result<DateTime<Utc>, JobError> {
    DateTime::from_timestamp_micros(us)
        .ok_or_else(|| JobError::Storage(format!("timestamp out of range: {us}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> SqliteJobStore {
        SqliteJobStore::in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn create_then_get_round_trips_the_row() {
        let store = store().await;
        let created = store
            .create(
                JobRequest::new("report")
                    .with_arguments(vec![json!("weekly"), json!({"pages": 3})])
                    .with_priority(7)
                    .with_max_retries(2)
                    .with_retry_delay(Duration::from_millis(1500)),
            )
            .await
            .unwrap();
        assert_eq!(created.status, JobStatus::Pending);

        let fetched = store.get(created.id).await.unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn durations_round_trip_or_are_refused() {
        let store = store().await;
        let created = store
            .create(
                JobRequest::new("report")
                    .with_timeout(Duration::from_millis(1))
                    .with_retry_delay(Duration::ZERO),
            )
            .await
            .unwrap();
        let fetched = store.get(created.id).await.unwrap();
        assert_eq!(fetched.timeout, Duration::from_millis(1));
        assert_eq!(fetched.retry_delay, Duration::ZERO);

        let err = store
            .create(JobRequest::new("report").with_timeout(Duration::from_micros(500)))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Validation(_)));
        assert_eq!(store.counts_by_status().await.unwrap().total(), 1);
    }

    #[tokio::test]
    async fn in_memory_pool_keeps_its_only_connection() {
        let store = store().await;
        let options = store.pool.options();
        assert_eq!(options.get_max_connections(), 1);
        assert_eq!(options.get_idle_timeout(), None);
        assert_eq!(options.get_max_lifetime(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_on_a_file_database_have_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("jobs.db").display());
        let store = Arc::new(SqliteJobStore::connect(&url).await.unwrap());

        for _ in 0..10 {
            let rec = store.create(JobRequest::new("report")).await.unwrap();
            let mut claims = Vec::new();
            for _ in 0..8 {
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
                    Err(JobError::StaleTransition { actual: JobStatus::Running, .. }) => {}
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
            assert_eq!(winners, 1);
            assert_eq!(store.get(rec.id).await.unwrap().status, JobStatus::Running);
        }
        assert_eq!(store.counts_by_status().await.unwrap().running, 10);
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let store = store().await;
        store.migrate().await.unwrap();
        store.create(JobRequest::new("report")).await.unwrap();
        store.migrate().await.unwrap();
        assert_eq!(store.counts_by_status().await.unwrap().total(), 1);
    }

    #[tokio::test]
    async fn transition_reports_each_failed_precondition() {
        let store = store().await;
        let rec = store.create(JobRequest::new("report").with_max_retries(0)).await.unwrap();

        let unknown = JobId::from_ulid(ulid::Ulid::new());
        assert_eq!(
            store
                .transition(unknown, JobStatus::Pending, JobStatus::Running, TransitionFields::new())
                .await
                .unwrap_err(),
            JobError::NotFound(unknown)
        );

        let err = store
            .transition(rec.id, JobStatus::Running, JobStatus::Completed, TransitionFields::new())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::StaleTransition { actual: JobStatus::Pending, .. }));

        store
            .transition(rec.id, JobStatus::Pending, JobStatus::Running, TransitionFields::new())
            .await
            .unwrap();
        let err = store
            .transition(
                rec.id,
                JobStatus::Running,
                JobStatus::Failed,
                TransitionFields::new().attempt(2).error_message("boom"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Validation(_)));
        assert_eq!(store.get(rec.id).await.unwrap().status, JobStatus::Running);
    }

    #[tokio::test]
    async fn failed_keeps_the_error_message() {
        let store = store().await;
        let rec = store.create(JobRequest::new("report").with_max_retries(0)).await.unwrap();
        store
            .transition(rec.id, JobStatus::Pending, JobStatus::Running, TransitionFields::new())
            .await
            .unwrap();
        let failed = store
            .transition(
                rec.id,
                JobStatus::Running,
                JobStatus::Failed,
                TransitionFields::new().attempt(1).error_message("boom"),
            )
            .await
            .unwrap();
        assert_eq!(failed.attempt, 1);
        assert_eq!(failed.error_message.as_deref(), Some("boom"));
        assert_eq!(store.get(rec.id).await.unwrap(), failed);
    }

    #[tokio::test]
    async fn list_pending_uses_dispatch_order_and_cursor() {
        let store = store().await;
        let mut ids = Vec::new();
        for priority in [1, 5, 3, 5] {
            ids.push(store.create(JobRequest::new("report").with_priority(priority)).await.unwrap().id);
        }

        let first = store.list_pending(None, 2).await.unwrap();
        assert_eq!(first.iter().map(|r| r.id).collect::<Vec<_>>(), vec![ids[1], ids[3]]);

        let rest = store
            .list_pending(first.last().map(|r| r.order_key()), 10)
            .await
            .unwrap();
        assert_eq!(rest.iter().map(|r| r.id).collect::<Vec<_>>(), vec![ids[2], ids[0]]);
    }

    #[tokio::test]
    async fn list_and_counts() {
        let store = store().await;
        for priority in 0..12 {
            store.create(JobRequest::new("report").with_priority(priority % 3)).await.unwrap();
        }
        let page = store.list(&JobFilter::default(), Page::new(2, 10)).await.unwrap();
        assert_eq!(page.total, 12);
        assert_eq!(page.items.len(), 2);
        assert!(page.items.iter().all(|r| r.priority == 0));

        let filter = JobFilter { status: None, priority: Some(1) };
        assert_eq!(store.list(&filter, Page::default()).await.unwrap().total, 4);

        let filter = JobFilter::status(JobStatus::Failed);
        assert_eq!(store.list(&filter, Page::default()).await.unwrap().total, 0);

        assert_eq!(store.counts_by_status().await.unwrap().pending, 12);
    }
}

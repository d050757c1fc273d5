use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use pricegrid_queue::{
    job::{JobFilter, JobId, JobRecord, JobStatus, JobUpdate, NewJob},
    JobStore, QueueError, StaleClaims,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};
use uuid::Uuid;

const JOB_COLUMNS: &str = "id, job_type, payload, status, attempts, max_attempts, \
     scheduled_at, created_at, claimed_at, processed_at, error";

/// Durable job store using SQLite.
///
/// Timestamps are stored as epoch milliseconds so ordering and the
/// `scheduled_at <= now` check are plain integer comparisons.
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn backend(e: sqlx::Error) -> QueueError {
    QueueError::Backend(e.to_string())
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, QueueError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| QueueError::Backend(format!("timestamp out of range: {}", ms)))
}

fn opt_from_millis(ms: Option<i64>) -> Result<Option<DateTime<Utc>>, QueueError> {
    ms.map(from_millis).transpose()
}

fn row_to_job(row: &SqliteRow) -> Result<JobRecord, QueueError> {
    let id: String = row.try_get("id").map_err(backend)?;
    let id = Uuid::parse_str(&id).map_err(|_| QueueError::Backend("Invalid UUID".into()))?;
    let payload: String = row.try_get("payload").map_err(backend)?;
    let status: String = row.try_get("status").map_err(backend)?;
    let attempts: i64 = row.try_get("attempts").map_err(backend)?;
    let max_attempts: i64 = row.try_get("max_attempts").map_err(backend)?;

    Ok(JobRecord {
        id,
        job_type: row.try_get("job_type").map_err(backend)?,
        payload: serde_json::from_str(&payload)?,
        status: status.parse().map_err(QueueError::Backend)?,
        attempts: attempts as u32,
        max_attempts: max_attempts as u32,
        scheduled_at: from_millis(row.try_get("scheduled_at").map_err(backend)?)?,
        created_at: from_millis(row.try_get("created_at").map_err(backend)?)?,
        claimed_at: opt_from_millis(row.try_get("claimed_at").map_err(backend)?)?,
        processed_at: opt_from_millis(row.try_get("processed_at").map_err(backend)?)?,
        error: row.try_get("error").map_err(backend)?,
    })
}

#[async_trait]
impl JobStore for SqliteJobStore {
    #[instrument(skip_all, err, fields(job_type = %job.job_type))]
    async fn insert(&self, job: NewJob) -> Result<JobRecord, QueueError> {
        let mut record = job.into_record(Uuid::new_v4(), Utc::now().trunc_subsecs(3));
        record.scheduled_at = record.scheduled_at.trunc_subsecs(3);
        let payload = serde_json::to_string(&record.payload)?;

        sqlx::query(
            "INSERT INTO jobs (id, job_type, payload, status, attempts, max_attempts, scheduled_at, created_at) \
             VALUES (?, ?, ?, ?, 0, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(&record.job_type)
        .bind(payload)
        .bind(JobStatus::Pending.as_str())
        .bind(record.max_attempts as i64)
        .bind(to_millis(record.scheduled_at))
        .bind(to_millis(record.created_at))
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(record)
    }

    #[instrument(skip_all, err)]
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<JobRecord>, QueueError> {
        let now = to_millis(now);

        // Single statement: SQLite serializes writers, so the subselect and
        // the update cannot interleave with another claimer.
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'processing',
                attempts = attempts + 1,
                claimed_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'pending' AND scheduled_at <= ?
                ORDER BY scheduled_at ASC, created_at ASC
                LIMIT 1
            )
            AND status = 'pending'
            RETURNING {}
            "#,
            JOB_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(now)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        let job = row.as_ref().map(row_to_job).transpose()?;
        if let Some(ref job) = job {
            debug!(job_id = %job.id, attempts = job.attempts, "Claimed job");
        }
        Ok(job)
    }

    #[instrument(skip_all, err, fields(job_id = %id, status = %update.status))]
    async fn update(&self, id: JobId, update: JobUpdate) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?,
                scheduled_at = COALESCE(?, scheduled_at),
                processed_at = COALESCE(?, processed_at),
                error = COALESCE(?, error)
            WHERE id = ?
            "#,
        )
        .bind(update.status.as_str())
        .bind(update.scheduled_at.map(to_millis))
        .bind(update.processed_at.map(to_millis))
        .bind(update.error)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotFound(id));
        }
        Ok(())
    }

    #[instrument(skip_all, err, fields(job_id = %id, attempt = attempt, status = %update.status))]
    async fn resolve_claim(
        &self,
        id: JobId,
        attempt: u32,
        update: JobUpdate,
    ) -> Result<bool, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?,
                scheduled_at = COALESCE(?, scheduled_at),
                processed_at = COALESCE(?, processed_at),
                error = COALESCE(?, error)
            WHERE id = ? AND status = 'processing' AND attempts = ?
            "#,
        )
        .bind(update.status.as_str())
        .bind(update.scheduled_at.map(to_millis))
        .bind(update.processed_at.map(to_millis))
        .bind(update.error)
        .bind(id.to_string())
        .bind(attempt as i64)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.get(id).await? {
            Some(_) => Ok(false),
            None => Err(QueueError::NotFound(id)),
        }
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, QueueError> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        row.as_ref().map(row_to_job).transpose()
    }

    async fn list(&self, filter: JobFilter) -> Result<Vec<JobRecord>, QueueError> {
        let sql = format!(
            "SELECT {} FROM jobs WHERE (? IS NULL OR status = ?) \
             ORDER BY scheduled_at ASC, created_at ASC LIMIT ?",
            JOB_COLUMNS
        );
        let status = filter.status.map(|s| s.as_str());
        // SQLite treats a negative LIMIT as unbounded
        let limit = filter.limit.map_or(-1, |l| l.min(i64::MAX as usize) as i64);

        let rows = sqlx::query(&sql)
            .bind(status)
            .bind(status)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        rows.iter().map(row_to_job).collect()
    }

    #[instrument(skip_all, err)]
    async fn release_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<StaleClaims, QueueError> {
        let cutoff = to_millis(cutoff);
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let failed = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed',
                error = 'claim abandoned after ' || attempts || ' attempts'
            WHERE status = 'processing'
            AND (claimed_at IS NULL OR claimed_at < ?)
            AND attempts >= max_attempts
            "#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await
        .map_err(backend)?
        .rows_affected();

        let released = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                scheduled_at = MAX(scheduled_at, ?)
            WHERE status = 'processing'
            AND (claimed_at IS NULL OR claimed_at < ?)
            "#,
        )
        .bind(to_millis(now))
        .bind(cutoff)
        .execute(&mut *tx)
        .await
        .map_err(backend)?
        .rows_affected();

        tx.commit().await.map_err(backend)?;

        Ok(StaleClaims { released, failed })
    }
}

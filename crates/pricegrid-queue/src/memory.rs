//! In-memory job store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::job::{JobFilter, JobId, JobRecord, JobStatus, JobUpdate, NewJob};
use crate::store::{abandoned_message, JobStore, QueueError, StaleClaims};

/// Job store held in process memory.
///
/// Every claim runs under the write lock, which serializes concurrent
/// claimers. Useful for tests and single-process deployments.
#[derive(Debug, Default, Clone)]
pub struct MemoryJobStore {
    jobs: Arc<RwLock<HashMap<Uuid, JobRecord>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs, any status
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

/// Claim order: earliest `scheduled_at`, creation time as tie-breaker
fn claim_key(job: &JobRecord) -> (DateTime<Utc>, DateTime<Utc>) {
    (job.scheduled_at, job.created_at)
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: NewJob) -> Result<JobRecord, QueueError> {
        let record = job.into_record(Uuid::new_v4(), Utc::now());

        let mut jobs = self.jobs.write().await;
        jobs.insert(record.id, record.clone());

        Ok(record)
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<JobRecord>, QueueError> {
        let mut jobs = self.jobs.write().await;

        let job = jobs
            .values_mut()
            .filter(|j| j.status == JobStatus::Pending && j.scheduled_at <= now)
            .min_by_key(|j| claim_key(j));

        Ok(job.map(|job| {
            job.status = JobStatus::Processing;
            job.attempts += 1;
            job.claimed_at = Some(now);
            job.clone()
        }))
    }

    async fn update(&self, id: JobId, update: JobUpdate) -> Result<(), QueueError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        update.apply(job);
        Ok(())
    }

    async fn resolve_claim(
        &self,
        id: JobId,
        attempt: u32,
        update: JobUpdate,
    ) -> Result<bool, QueueError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        if job.status != JobStatus::Processing || job.attempts != attempt {
            return Ok(false);
        }
        update.apply(job);
        Ok(true)
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, QueueError> {
        let jobs = self.jobs.read().await;
        Ok(jobs.get(&id).cloned())
    }

    async fn list(&self, filter: JobFilter) -> Result<Vec<JobRecord>, QueueError> {
        let jobs = self.jobs.read().await;

        let mut matching: Vec<JobRecord> =
            jobs.values().filter(|j| filter.matches(j)).cloned().collect();
        matching.sort_by_key(claim_key);

        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }

    async fn release_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<StaleClaims, QueueError> {
        let mut jobs = self.jobs.write().await;
        let mut stale = StaleClaims::default();

        for job in jobs.values_mut() {
            let abandoned = job.status == JobStatus::Processing
                && job.claimed_at.map_or(true, |at| at < cutoff);
            if !abandoned {
                continue;
            }
            if job.has_attempts_left() {
                job.status = JobStatus::Pending;
                job.scheduled_at = job.scheduled_at.max(now);
                stale.released += 1;
            } else {
                job.status = JobStatus::Failed;
                job.error = Some(abandoned_message(job.attempts));
                stale.failed += 1;
            }
        }

        Ok(stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn new_job(job_type: &str, scheduled_at: DateTime<Utc>) -> NewJob {
        NewJob {
            job_type: job_type.to_string(),
            payload: json!({ "foo": "bar" }),
            max_attempts: 3,
            scheduled_at,
        }
    }

    #[tokio::test]
    async fn test_insert_and_claim() {
        let store = MemoryJobStore::new();
        let now = Utc::now();

        let inserted = store.insert(new_job("test_job", now)).await.unwrap();
        assert_eq!(inserted.status, JobStatus::Pending);
        assert_eq!(inserted.attempts, 0);

        let claimed = store.claim_next(now).await.unwrap().expect("Should have job");
        assert_eq!(claimed.id, inserted.id);
        assert_eq!(claimed.status, JobStatus::Processing);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.claimed_at, Some(now));

        // Already processing, nothing left to claim
        assert!(store.claim_next(now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_future_job_not_claimed_early() {
        let store = MemoryJobStore::new();
        let now = Utc::now();

        store
            .insert(new_job("delayed", now + Duration::seconds(10)))
            .await
            .unwrap();

        assert!(store.claim_next(now).await.unwrap().is_none());
        assert!(store
            .claim_next(now + Duration::seconds(10))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_earliest_scheduled_claimed_first() {
        let store = MemoryJobStore::new();
        let now = Utc::now();

        let later = store
            .insert(new_job("later", now - Duration::seconds(1)))
            .await
            .unwrap();
        let earlier = store
            .insert(new_job("earlier", now - Duration::seconds(5)))
            .await
            .unwrap();

        assert_eq!(store.claim_next(now).await.unwrap().unwrap().id, earlier.id);
        assert_eq!(store.claim_next(now).await.unwrap().unwrap().id, later.id);
    }

    #[tokio::test]
    async fn test_update_missing_job() {
        let store = MemoryJobStore::new();
        let id = Uuid::new_v4();
        let err = store
            .update(id, JobUpdate::failed("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::NotFound(missing) if missing == id));
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let store = MemoryJobStore::new();
        let now = Utc::now();

        store.insert(new_job("a", now)).await.unwrap();
        store.insert(new_job("b", now)).await.unwrap();
        store.claim_next(now).await.unwrap();

        let pending = store.list(JobFilter::status(JobStatus::Pending)).await.unwrap();
        let processing = store
            .list(JobFilter::status(JobStatus::Processing))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(processing.len(), 1);

        let limited = store.list(JobFilter::default().with_limit(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_release_stale_keeps_attempts() {
        let store = MemoryJobStore::new();
        let now = Utc::now();

        let job = store.insert(new_job("slow", now)).await.unwrap();
        store.claim_next(now).await.unwrap();

        // Claim is not older than the cutoff yet
        assert_eq!(
            store.release_stale(now, now).await.unwrap(),
            StaleClaims::default()
        );

        let later = now + Duration::minutes(10);
        let stale = store.release_stale(later, later).await.unwrap();
        assert_eq!(stale.released, 1);
        assert_eq!(stale.failed, 0);

        let released = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(released.status, JobStatus::Pending);
        assert_eq!(released.attempts, 1);
        assert_eq!(released.scheduled_at, later);
    }

    #[tokio::test]
    async fn test_release_stale_fails_exhausted_claims() {
        let store = MemoryJobStore::new();
        let now = Utc::now();

        let job = store
            .insert(NewJob {
                max_attempts: 1,
                ..new_job("once", now)
            })
            .await
            .unwrap();
        store.claim_next(now).await.unwrap();

        let later = now + Duration::minutes(10);
        let stale = store.release_stale(later, later).await.unwrap();
        assert_eq!(stale, StaleClaims { released: 0, failed: 1 });

        let failed = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.attempts, 1);
        assert_eq!(failed.error.as_deref(), Some("claim abandoned after 1 attempts"));

        // Never claimable again
        assert!(store.claim_next(later).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolve_claim_rejects_superseded_claim() {
        let store = MemoryJobStore::new();
        let now = Utc::now();

        let job = store.insert(new_job("slow", now)).await.unwrap();
        let first = store.claim_next(now).await.unwrap().unwrap();
        store.release_stale(now + Duration::seconds(1), now).await.unwrap();
        let second = store.claim_next(now).await.unwrap().unwrap();
        assert_eq!(second.attempts, 2);

        assert!(!store
            .resolve_claim(job.id, first.attempts, JobUpdate::completed(now))
            .await
            .unwrap());
        assert_eq!(
            store.get(job.id).await.unwrap().unwrap().status,
            JobStatus::Processing
        );

        assert!(store
            .resolve_claim(job.id, second.attempts, JobUpdate::failed("boom"))
            .await
            .unwrap());
        let resolved = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(resolved.status, JobStatus::Failed);
        assert_eq!(resolved.error.as_deref(), Some("boom"));
    }
}

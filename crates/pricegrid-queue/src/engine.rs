//! Claim / execute / resolve engine

use chrono::{DateTime, Duration, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::job::{JobFilter, JobId, JobRecord, JobResult, JobUpdate, NewJob};
use crate::registry::{validate_job_type, HandlerRegistry};
use crate::store::{JobStore, QueueError, StaleClaims};

/// Per-job overrides for [`JobQueue::enqueue_with`]
#[derive(Debug, Clone, Copy, Default)]
pub struct EnqueueOptions {
    /// Falls back to `QueueConfig::default_max_attempts`
    pub max_attempts: Option<u32>,
    /// Postpone the first attempt
    pub delay: Option<std::time::Duration>,
}

/// What a single [`JobQueue::process_next`] call did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// No job was ready
    Idle,
    Completed {
        job_id: JobId,
        job_type: String,
    },
    /// Attempt failed, job is pending again
    Retrying {
        job_id: JobId,
        job_type: String,
        error: String,
        retry_at: DateTime<Utc>,
    },
    /// Attempt failed with no attempts left
    Failed {
        job_id: JobId,
        job_type: String,
        error: String,
    },
    /// The handler finished after its claim was released as stale. The
    /// result was dropped and the row left to the current claim holder.
    ClaimLost {
        job_id: JobId,
        job_type: String,
    },
}

impl ProcessOutcome {
    /// `false` only when no job was claimed
    pub fn processed(&self) -> bool {
        !matches!(self, Self::Idle)
    }

    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Self::Idle => None,
            Self::Completed { job_id, .. }
            | Self::Retrying { job_id, .. }
            | Self::Failed { job_id, .. }
            | Self::ClaimLost { job_id, .. } => Some(*job_id),
        }
    }

    pub fn job_type(&self) -> Option<&str> {
        match self {
            Self::Idle => None,
            Self::Completed { job_type, .. }
            | Self::Retrying { job_type, .. }
            | Self::Failed { job_type, .. }
            | Self::ClaimLost { job_type, .. } => Some(job_type),
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Retrying { error, .. } | Self::Failed { error, .. } => Some(error),
            Self::Idle | Self::Completed { .. } | Self::ClaimLost { .. } => None,
        }
    }
}

/// Durable at-least-once job queue.
///
/// Holds no shared state of its own: everything lives in the injected store,
/// whose atomic claim is what keeps concurrent `process_next` callers from
/// running the same job twice.
pub struct JobQueue<S: JobStore + ?Sized> {
    store: Arc<S>,
    registry: Arc<HandlerRegistry>,
    config: QueueConfig,
}

impl<S: JobStore + ?Sized> Clone for JobQueue<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            config: self.config,
        }
    }
}

impl<S: JobStore + 'static> JobQueue<S> {
    pub fn new(store: S, registry: HandlerRegistry, config: QueueConfig) -> Self {
        Self::new_with_arc(Arc::new(store), registry, config)
    }
}

impl<S: JobStore + ?Sized> JobQueue<S> {
    /// Create from an existing Arc store (supports dyn dispatch)
    pub fn new_with_arc(store: Arc<S>, registry: HandlerRegistry, config: QueueConfig) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Persist a new job, ready immediately
    pub async fn enqueue(
        &self,
        job_type: &str,
        payload: serde_json::Value,
    ) -> Result<JobId, QueueError> {
        self.enqueue_with(job_type, payload, EnqueueOptions::default())
            .await
    }

    pub async fn enqueue_with(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<JobId, QueueError> {
        validate_job_type(job_type)?;
        let max_attempts = options
            .max_attempts
            .unwrap_or(self.config.default_max_attempts);
        if max_attempts == 0 {
            return Err(QueueError::InvalidMaxAttempts);
        }

        let delay = options
            .delay
            .map(clamp_duration)
            .unwrap_or_else(Duration::zero);
        let now = Utc::now();
        let scheduled_at = now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC);

        let job = self
            .store
            .insert(NewJob {
                job_type: job_type.to_string(),
                payload,
                max_attempts,
                scheduled_at,
            })
            .await?;

        info!(job_id = %job.id, job_type = %job.job_type, max_attempts, "Job enqueued");
        Ok(job.id)
    }

    /// Claim and run at most one ready job
    pub async fn process_next(&self) -> Result<ProcessOutcome, QueueError> {
        self.process_next_at(Utc::now()).await
    }

    /// [`process_next`](Self::process_next) against an explicit clock.
    ///
    /// Only store failures are returned as errors. Every job-level failure,
    /// including an unknown job type, is resolved into the job's row.
    pub async fn process_next_at(&self, now: DateTime<Utc>) -> Result<ProcessOutcome, QueueError> {
        let Some(job) = self.store.claim_next(now).await? else {
            debug!("No jobs available");
            return Ok(ProcessOutcome::Idle);
        };

        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempt = job.attempts,
            max_attempts = job.max_attempts,
            "Job claimed"
        );

        let result = self.execute(&job).await;
        self.resolve(job, result, now).await
    }

    async fn execute(&self, job: &JobRecord) -> JobResult {
        let run = AssertUnwindSafe(self.registry.dispatch(&job.job_type, &job.payload))
            .catch_unwind();

        let outcome = match self.config.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return JobResult::Failure(format!(
                        "handler timed out after {}s",
                        limit.as_secs_f64()
                    ))
                }
            },
            None => run.await,
        };

        outcome.unwrap_or_else(|panic| {
            JobResult::Failure(format!("handler panicked: {}", panic_message(&*panic)))
        })
    }

    async fn resolve(
        &self,
        job: JobRecord,
        result: JobResult,
        claimed_at: DateTime<Utc>,
    ) -> Result<ProcessOutcome, QueueError> {
        let error = match result {
            JobResult::Success => {
                let update = JobUpdate::completed(Utc::now().max(claimed_at));
                if !self.finish(&job, update).await? {
                    return Ok(self.claim_lost(job));
                }
                info!(job_id = %job.id, job_type = %job.job_type, "Job completed");
                return Ok(ProcessOutcome::Completed {
                    job_id: job.id,
                    job_type: job.job_type,
                });
            }
            JobResult::Failure(error) => error,
        };

        error!(job_id = %job.id, job_type = %job.job_type, error = %error, "Job failed");

        if !job.has_attempts_left() {
            if !self.finish(&job, JobUpdate::failed(error.clone())).await? {
                return Ok(self.claim_lost(job));
            }
            warn!(
                job_id = %job.id,
                attempts = job.attempts,
                "Job permanently failed"
            );
            return Ok(ProcessOutcome::Failed {
                job_id: job.id,
                job_type: job.job_type,
                error,
            });
        }

        let delay = self.config.backoff.delay_chrono(job.attempts);
        let retry_at = Utc::now()
            .max(claimed_at)
            .checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        if !self
            .finish(&job, JobUpdate::retry(retry_at, error.clone()))
            .await?
        {
            return Ok(self.claim_lost(job));
        }
        info!(
            job_id = %job.id,
            attempt = job.attempts,
            delay_secs = delay.num_seconds(),
            "Job retry scheduled with backoff"
        );

        Ok(ProcessOutcome::Retrying {
            job_id: job.id,
            job_type: job.job_type,
            error,
            retry_at,
        })
    }

    async fn finish(&self, job: &JobRecord, update: JobUpdate) -> Result<bool, QueueError> {
        self.store.resolve_claim(job.id, job.attempts, update).await
    }

    fn claim_lost(&self, job: JobRecord) -> ProcessOutcome {
        warn!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempt = job.attempts,
            "Claim was released while the handler ran, result discarded"
        );
        ProcessOutcome::ClaimLost {
            job_id: job.id,
            job_type: job.job_type,
        }
    }

    /// Hand abandoned claims back to the queue, failing those with no
    /// attempts left. No-op unless `QueueConfig::stale_after` is set.
    ///
    /// Errors with `InvalidConfig` unless a `handler_timeout` shorter than
    /// `stale_after` bounds how long a live claim can run.
    pub async fn recover_stale(&self, now: DateTime<Utc>) -> Result<StaleClaims, QueueError> {
        self.config.validate()?;
        let Some(stale_after) = self.config.stale_after else {
            return Ok(StaleClaims::default());
        };
        let window = clamp_duration(stale_after);
        let cutoff = now
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let stale = self.store.release_stale(cutoff, now).await?;
        if stale.total() > 0 {
            warn!(
                released = stale.released,
                failed = stale.failed,
                "Recovered stale job claims"
            );
        }
        Ok(stale)
    }

    pub async fn job(&self, id: JobId) -> Result<Option<JobRecord>, QueueError> {
        self.store.get(id).await
    }

    pub async fn jobs(&self, filter: JobFilter) -> Result<Vec<JobRecord>, QueueError> {
        self.store.list(filter).await
    }
}

/// `std` to `chrono` without overflow (capped at ~68 years)
fn clamp_duration(d: std::time::Duration) -> Duration {
    Duration::seconds(d.as_secs().min(i32::MAX as u64) as i64)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use crate::memory::MemoryJobStore;
    use serde_json::json;

    fn queue_with(registry: HandlerRegistry) -> JobQueue<MemoryJobStore> {
        JobQueue::new(MemoryJobStore::new(), registry, QueueConfig::default())
    }

    #[tokio::test]
    async fn test_enqueue_validates_input() {
        let queue = queue_with(HandlerRegistry::new());

        assert!(matches!(
            queue.enqueue("", json!({})).await,
            Err(QueueError::InvalidJobType(_))
        ));
        assert!(matches!(
            queue
                .enqueue_with(
                    "t",
                    json!({}),
                    EnqueueOptions {
                        max_attempts: Some(0),
                        delay: None
                    }
                )
                .await,
            Err(QueueError::InvalidMaxAttempts)
        ));
        assert!(queue.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_enqueue_creates_pending_job() {
        let queue = queue_with(HandlerRegistry::new());
        let id = queue.enqueue("t", json!({ "k": 1 })).await.unwrap();

        let job = queue.job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, 3);
        assert_eq!(job.payload, json!({ "k": 1 }));
        assert!(job.scheduled_at <= Utc::now());
    }

    #[tokio::test]
    async fn test_idle_outcome() {
        let queue = queue_with(HandlerRegistry::new());
        let outcome = queue.process_next().await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Idle);
        assert!(!outcome.processed());
        assert!(outcome.job_id().is_none());
    }

    #[tokio::test]
    async fn test_panicking_handler_is_a_failure() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_fn("boom", |payload| async move {
                if payload.is_object() {
                    panic!("kaboom");
                }
                JobResult::Success
            })
            .unwrap();
        let queue = queue_with(registry);
        let id = queue.enqueue("boom", json!({})).await.unwrap();

        let outcome = queue.process_next().await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Retrying { .. }));
        assert_eq!(outcome.error(), Some("handler panicked: kaboom"));

        let job = queue.job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_handler_timeout() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_fn("hang", |_| async move {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                JobResult::Success
            })
            .unwrap();
        let config = QueueConfig {
            handler_timeout: Some(std::time::Duration::from_millis(20)),
            ..QueueConfig::default()
        };
        let queue = JobQueue::new(MemoryJobStore::new(), registry, config);
        queue.enqueue("hang", json!({})).await.unwrap();

        let outcome = queue.process_next().await.unwrap();
        assert_eq!(outcome.error(), Some("handler timed out after 0.02s"));
    }

    #[tokio::test]
    async fn test_recover_stale_disabled_by_default() {
        let queue = queue_with(HandlerRegistry::new());
        queue.enqueue("t", json!({})).await.unwrap();
        let now = Utc::now();
        queue.store().claim_next(now).await.unwrap();

        let later = now + Duration::hours(1);
        assert_eq!(
            queue.recover_stale(later).await.unwrap(),
            StaleClaims::default()
        );
    }

    fn stale_config() -> QueueConfig {
        QueueConfig {
            handler_timeout: Some(std::time::Duration::from_secs(60)),
            stale_after: Some(std::time::Duration::from_secs(300)),
            ..QueueConfig::default()
        }
    }

    #[tokio::test]
    async fn test_recover_stale_releases_old_claims() {
        let queue = JobQueue::new(MemoryJobStore::new(), HandlerRegistry::new(), stale_config());
        let id = queue.enqueue("t", json!({})).await.unwrap();
        let now = Utc::now();
        queue.store().claim_next(now).await.unwrap();

        assert_eq!(
            queue.recover_stale(now + Duration::seconds(60)).await.unwrap(),
            StaleClaims::default()
        );
        assert_eq!(
            queue
                .recover_stale(now + Duration::seconds(301))
                .await
                .unwrap()
                .released,
            1
        );
        assert_eq!(
            queue.job(id).await.unwrap().unwrap().status,
            JobStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_recover_stale_requires_shorter_handler_timeout() {
        for handler_timeout in [None, Some(std::time::Duration::from_secs(300))] {
            let config = QueueConfig {
                handler_timeout,
                ..stale_config()
            };
            let queue = JobQueue::new(MemoryJobStore::new(), HandlerRegistry::new(), config);
            queue.enqueue("t", json!({})).await.unwrap();
            let now = Utc::now();
            queue.store().claim_next(now).await.unwrap();

            assert!(matches!(
                queue.recover_stale(now + Duration::hours(1)).await,
                Err(QueueError::InvalidConfig(_))
            ));
            let jobs = queue.jobs(JobFilter::default()).await.unwrap();
            assert_eq!(jobs[0].status, JobStatus::Processing);
        }
    }

    #[tokio::test]
    async fn test_exhausted_abandoned_claim_is_not_rerun() {
        let runs = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = runs.clone();
        let mut registry = HandlerRegistry::new();
        registry
            .register_fn("once", move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    JobResult::Success
                }
            })
            .unwrap();
        let queue = JobQueue::new(MemoryJobStore::new(), registry, stale_config());
        let id = queue
            .enqueue_with(
                "once",
                json!({}),
                EnqueueOptions {
                    max_attempts: Some(1),
                    delay: None,
                },
            )
            .await
            .unwrap();

        // Invoker claims the only attempt, then dies before resolving
        let now = Utc::now();
        queue.store().claim_next(now).await.unwrap().unwrap();

        let later = now + Duration::seconds(301);
        let stale = queue.recover_stale(later).await.unwrap();
        assert_eq!(stale, StaleClaims { released: 0, failed: 1 });
        assert_eq!(queue.process_next_at(later).await.unwrap(), ProcessOutcome::Idle);

        let job = queue.job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.error.as_deref(), Some("claim abandoned after 1 attempts"));
        assert_eq!(runs.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_late_result_from_released_claim_is_discarded() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use tokio::sync::Notify;

        let runs = Arc::new(AtomicU32::new(0));
        let started = Arc::new(Notify::new());
        let gate = Arc::new(Notify::new());
        let mut registry = HandlerRegistry::new();
        {
            let (runs, started, gate) = (runs.clone(), started.clone(), gate.clone());
            registry
                .register_fn("slow", move |_| {
                    let (runs, started, gate) = (runs.clone(), started.clone(), gate.clone());
                    async move {
                        if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                            started.notify_one();
                            gate.notified().await;
                            return JobResult::failure("first run finished late");
                        }
                        JobResult::Success
                    }
                })
                .unwrap();
        }
        let queue = JobQueue::new(MemoryJobStore::new(), registry, stale_config());
        let id = queue.enqueue("slow", json!({})).await.unwrap();
        let now = Utc::now();

        let first = tokio::spawn({
            let queue = queue.clone();
            async move { queue.process_next_at(now).await }
        });
        started.notified().await;

        // A second invoker starts up and treats the running claim as abandoned
        let later = now + Duration::seconds(301);
        assert_eq!(queue.recover_stale(later).await.unwrap().released, 1);
        let second = queue.process_next_at(later).await.unwrap();
        assert!(matches!(second, ProcessOutcome::Completed { .. }));

        gate.notify_one();
        let first = first.await.unwrap().unwrap();
        assert_eq!(
            first,
            ProcessOutcome::ClaimLost {
                job_id: id,
                job_type: "slow".into()
            }
        );
        assert!(first.processed());

        let job = queue.job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempts, 2);
        assert!(job.error.is_none());
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_outcome_serializes_with_tag() {
        let outcome = ProcessOutcome::Failed {
            job_id: uuid::Uuid::nil(),
            job_type: "t".into(),
            error: "e".into(),
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["outcome"], "failed");
        assert_eq!(value["job_type"], "t");
        assert_eq!(value["error"], "e");
    }
}

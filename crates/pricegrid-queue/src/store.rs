//! Job Store Trait

use crate::job::{JobFilter, JobId, JobRecord, JobUpdate, NewJob};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Job not found: {0}")]
    NotFound(JobId),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid job type: {0:?}")]
    InvalidJobType(String),
    #[error("max_attempts must be at least 1")]
    InvalidMaxAttempts,
    #[error("Handler already registered for job type: {0}")]
    DuplicateHandler(String),
    #[error("No handler registered for job type: {0}")]
    MissingHandler(String),
    #[error("Invalid queue configuration: {0}")]
    InvalidConfig(String),
}

/// What [`JobStore::release_stale`] did with abandoned claims
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaleClaims {
    /// Returned to `pending`
    pub released: u64,
    /// Out of attempts, moved to `failed`
    pub failed: u64,
}

impl StaleClaims {
    pub fn total(&self) -> u64 {
        self.released + self.failed
    }
}

/// Error recorded on a job whose last allowed claim was abandoned
pub fn abandoned_message(attempts: u32) -> String {
    format!("claim abandoned after {} attempts", attempts)
}

/// Durable record store behind the queue.
///
/// The only shared mutable state of the queue lives here. Implementations must
/// make [`claim_next`](JobStore::claim_next) atomic: two concurrent callers
/// never receive the same job.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new `pending` job with zero attempts
    async fn insert(&self, job: NewJob) -> Result<JobRecord, QueueError>;

    /// Claim the earliest-scheduled `pending` job with `scheduled_at <= now`.
    ///
    /// In one atomic step the job becomes `processing`, `attempts` is
    /// incremented and `claimed_at` is set. Returns the post-update record.
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<JobRecord>, QueueError>;

    /// Overwrite status and whichever optional fields the update carries
    async fn update(&self, id: JobId, update: JobUpdate) -> Result<(), QueueError>;

    /// Apply a post-execution update only while the job is still
    /// `processing` under the claim that counted `attempt`.
    ///
    /// Returns `false` without writing when that claim is gone (released as
    /// stale and possibly claimed again).
    async fn resolve_claim(
        &self,
        id: JobId,
        attempt: u32,
        update: JobUpdate,
    ) -> Result<bool, QueueError>;

    /// Fetch a single job
    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, QueueError>;

    /// List jobs ordered by `scheduled_at`
    async fn list(&self, filter: JobFilter) -> Result<Vec<JobRecord>, QueueError>;

    /// Deal with `processing` jobs claimed before `cutoff`.
    ///
    /// Jobs with `attempts >= max_attempts` become `failed` with
    /// [`abandoned_message`]. The rest return to `pending`, eligible no
    /// earlier than `now`, with attempts left as they are.
    async fn release_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<StaleClaims, QueueError>;
}

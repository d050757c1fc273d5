//! Job definitions

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Job Identifier
pub type JobId = Uuid;

/// Upper bound on a single retry delay (7 days)
pub const MAX_BACKOFF_SECS: u64 = 7 * 24 * 60 * 60;

/// Job Status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in queue (possibly scheduled in the future)
    Pending,
    /// Claimed by exactly one invoker
    Processing,
    /// Handler succeeded
    Completed,
    /// Permanently failed after max attempts
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// `completed` and `failed` are never claimed again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("invalid job status: {}", other)),
        }
    }
}

/// Outcome of a handler invocation.
///
/// Handlers never raise; every failure is a value carrying the message that
/// ends up in the job's `error` column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    /// Job succeeded
    Success,
    /// Job failed; subject to retry until `max_attempts`
    Failure(String),
}

impl JobResult {
    pub fn failure(msg: impl Into<String>) -> Self {
        Self::Failure(msg.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl<E: fmt::Display> From<Result<(), E>> for JobResult {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(e) => Self::Failure(e.to_string()),
        }
    }
}

/// Retry backoff strategy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BackoffStrategy {
    Constant { secs: u64 },
    Exponential { initial_secs: u64, multiplier: f64 },
}

impl Default for BackoffStrategy {
    /// `2^attempts` seconds: 2s after the first attempt, then 4s, 8s, ...
    fn default() -> Self {
        Self::Exponential {
            initial_secs: 1,
            multiplier: 2.0,
        }
    }
}

impl BackoffStrategy {
    /// Delay before the next attempt, given the attempt count recorded by the
    /// claim that just failed.
    pub fn delay(&self, attempts: u32) -> std::time::Duration {
        let secs = match self {
            Self::Constant { secs } => *secs,
            Self::Exponential {
                initial_secs,
                multiplier,
            } => {
                let exponent = attempts.min(i32::MAX as u32) as i32;
                let secs = *initial_secs as f64 * multiplier.powi(exponent);
                // `as` saturates on overflow and maps NaN to 0
                secs.min(MAX_BACKOFF_SECS as f64) as u64
            }
        };
        std::time::Duration::from_secs(secs.min(MAX_BACKOFF_SECS))
    }

    /// Same as [`delay`](Self::delay), as a `chrono` duration for timestamp math
    pub fn delay_chrono(&self, attempts: u32) -> Duration {
        Duration::seconds(self.delay(attempts).as_secs() as i64)
    }
}

/// A persisted job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl JobRecord {
    /// Whether another failure leaves room for a retry
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// Row handed to [`JobStore::insert`](crate::store::JobStore::insert)
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: String,
    pub payload: serde_json::Value,
    pub max_attempts: u32,
    pub scheduled_at: DateTime<Utc>,
}

impl NewJob {
    /// Turn the request into a fresh `pending` record with zero attempts
    pub fn into_record(self, id: JobId, created_at: DateTime<Utc>) -> JobRecord {
        JobRecord {
            id,
            job_type: self.job_type,
            payload: self.payload,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: self.max_attempts,
            scheduled_at: self.scheduled_at,
            created_at,
            claimed_at: None,
            processed_at: None,
            error: None,
        }
    }
}

/// Post-execution update. `None` fields are left untouched by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl JobUpdate {
    pub fn completed(at: DateTime<Utc>) -> Self {
        Self {
            status: JobStatus::Completed,
            scheduled_at: None,
            processed_at: Some(at),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            scheduled_at: None,
            processed_at: None,
            error: Some(error.into()),
        }
    }

    pub fn retry(scheduled_at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Pending,
            scheduled_at: Some(scheduled_at),
            processed_at: None,
            error: Some(error.into()),
        }
    }

    /// Apply the update to an in-memory record
    pub fn apply(&self, job: &mut JobRecord) {
        job.status = self.status;
        if let Some(at) = self.scheduled_at {
            job.scheduled_at = at;
        }
        if let Some(at) = self.processed_at {
            job.processed_at = Some(at);
        }
        if let Some(ref error) = self.error {
            job.error = Some(error.clone());
        }
    }
}

/// Query filter for listing jobs
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, job: &JobRecord) -> bool {
        self.status.map_or(true, |s| s == job.status)
    }
}

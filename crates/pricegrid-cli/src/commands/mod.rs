//! Subcommands

pub mod enqueue;
pub mod jobs;
pub mod process;
pub mod work;

use anyhow::{Context, Result};
use pricegrid_persist::{register_redaction_handlers, SqliteBackend, SqliteConfig, SqliteJobStore};
use pricegrid_queue::{HandlerRegistry, JobQueue, ProcessOutcome, QueueConfig};

/// Connection options shared by every subcommand
pub struct DbArgs {
    pub database_url: Option<String>,
}

impl DbArgs {
    fn config(&self) -> SqliteConfig {
        match self.database_url {
            Some(ref url) if url.contains(":memory:") => SqliteConfig {
                url: url.clone(),
                ..SqliteConfig::memory()
            },
            Some(ref url) => SqliteConfig {
                url: url.clone(),
                ..SqliteConfig::from_env()
            },
            None => SqliteConfig::from_env(),
        }
    }
}

/// Connect to the database and build a queue with every handler registered
pub async fn open_queue(
    db: &DbArgs,
    config: QueueConfig,
) -> Result<(SqliteBackend, JobQueue<SqliteJobStore>)> {
    config.validate()?;
    let backend = SqliteBackend::new_with_config(db.config())
        .await
        .context("Failed to open database")?;

    let mut registry = HandlerRegistry::new();
    register_redaction_handlers(&mut registry, backend.pool().clone())?;
    registry.require(&pricegrid_persist::REDACTION_JOB_TYPES)?;

    let store = SqliteJobStore::new(backend.pool().clone());
    Ok((backend, JobQueue::new(store, registry, config)))
}

/// One line per outcome, for humans
pub fn describe(outcome: &ProcessOutcome) -> String {
    match outcome {
        ProcessOutcome::Idle => "No jobs ready".to_string(),
        ProcessOutcome::Completed { job_id, job_type } => {
            format!("Completed {} ({})", job_id, job_type)
        }
        ProcessOutcome::Retrying {
            job_id,
            job_type,
            error,
            retry_at,
        } => format!(
            "Failed {} ({}): {} - retry at {}",
            job_id,
            job_type,
            error,
            retry_at.to_rfc3339()
        ),
        ProcessOutcome::Failed {
            job_id,
            job_type,
            error,
        } => format!("Permanently failed {} ({}): {}", job_id, job_type, error),
        ProcessOutcome::ClaimLost { job_id, job_type } => format!(
            "Discarded result for {} ({}): claim was released while running",
            job_id, job_type
        ),
    }
}

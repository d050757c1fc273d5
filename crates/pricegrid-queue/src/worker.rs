//! Invoker loops that drive `process_next`

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::config::env_parse;
use crate::engine::{JobQueue, ProcessOutcome};
use crate::store::JobStore;

/// Pause after a store error before trying again
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Number of concurrent `process_next` loops
    pub concurrency: usize,
    /// Sleep between polls when the queue is idle
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl WorkerConfig {
    /// Create from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            concurrency: env_parse::<usize>("PRICEGRID_WORKER_CONCURRENCY")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.concurrency),
            poll_interval: env_parse::<u64>("PRICEGRID_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
        }
    }
}

/// Tallies from one worker run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: u64,
    pub retried: u64,
    pub failed: u64,
    /// Results dropped because the claim was released mid-run
    pub lost_claims: u64,
    pub store_errors: u64,
}

impl WorkerStats {
    pub fn processed(&self) -> u64 {
        self.completed + self.retried + self.failed + self.lost_claims
    }

    fn record(&mut self, outcome: &ProcessOutcome) {
        match outcome {
            ProcessOutcome::Idle => {}
            ProcessOutcome::Completed { .. } => self.completed += 1,
            ProcessOutcome::Retrying { .. } => self.retried += 1,
            ProcessOutcome::Failed { .. } => self.failed += 1,
            ProcessOutcome::ClaimLost { .. } => self.lost_claims += 1,
        }
    }

    fn merge(&mut self, other: WorkerStats) {
        self.completed += other.completed;
        self.retried += other.retried;
        self.failed += other.failed;
        self.lost_claims += other.lost_claims;
        self.store_errors += other.store_errors;
    }
}

/// Repeatedly invokes the queue until told to stop.
///
/// Correctness under `concurrency > 1` comes from the store's atomic claim;
/// the loops share nothing but the queue handle.
pub struct Worker<S: JobStore + ?Sized> {
    queue: JobQueue<S>,
    config: WorkerConfig,
}

impl<S: JobStore + ?Sized + 'static> Worker<S> {
    pub fn new(queue: JobQueue<S>, config: WorkerConfig) -> Self {
        Self { queue, config }
    }

    /// Run until `shutdown` turns `true` (or its sender is dropped).
    /// In-flight jobs are finished before returning.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> WorkerStats {
        info!(
            concurrency = self.config.concurrency,
            poll_ms = self.config.poll_interval.as_millis() as u64,
            "Worker started"
        );

        if let Err(e) = self.queue.recover_stale(chrono::Utc::now()).await {
            error!(error = %e, "Stale claim recovery failed");
        }

        let mut loops = JoinSet::new();
        for worker_id in 0..self.config.concurrency.max(1) {
            let queue = self.queue.clone();
            let shutdown = shutdown.clone();
            let poll_interval = self.config.poll_interval;
            loops.spawn(run_loop(worker_id, queue, poll_interval, shutdown));
        }

        let mut stats = WorkerStats::default();
        while let Some(joined) = loops.join_next().await {
            match joined {
                Ok(loop_stats) => stats.merge(loop_stats),
                Err(e) => error!(error = %e, "Worker loop aborted"),
            }
        }

        info!(
            processed = stats.processed(),
            failed = stats.failed,
            "Worker stopped"
        );
        stats
    }

    /// Process jobs until the queue reports idle. Returns every outcome.
    pub async fn drain(&self) -> Result<Vec<ProcessOutcome>, crate::QueueError> {
        let mut outcomes = Vec::new();
        loop {
            let outcome = self.queue.process_next().await?;
            if !outcome.processed() {
                return Ok(outcomes);
            }
            outcomes.push(outcome);
        }
    }
}

async fn run_loop<S: JobStore + ?Sized>(
    worker_id: usize,
    queue: JobQueue<S>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> WorkerStats {
    let mut stats = WorkerStats::default();

    while !*shutdown.borrow() {
        let pause = match queue.process_next().await {
            Ok(ProcessOutcome::Idle) => poll_interval,
            Ok(outcome) => {
                stats.record(&outcome);
                continue;
            }
            Err(e) => {
                stats.store_errors += 1;
                error!(worker_id, error = %e, "Queue error");
                ERROR_BACKOFF
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    stats
}

//! Work command - run worker loops until Ctrl-C
//!
//! Usage:
//! ```bash
//! pricegrid work --concurrency 4 --poll-ms 250
//! ```

use anyhow::Result;
use clap::Args;
use pricegrid_queue::{QueueConfig, Worker, WorkerConfig};
use std::time::Duration;
use tokio::sync::watch;

use super::{open_queue, DbArgs};

/// Arguments for the work command
#[derive(Args)]
pub struct WorkArgs {
    /// Concurrent invoker loops (defaults to PRICEGRID_WORKER_CONCURRENCY or 2)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Idle poll interval in milliseconds (defaults to PRICEGRID_POLL_INTERVAL_MS or 500)
    #[arg(long)]
    poll_ms: Option<u64>,

    /// Per-attempt handler deadline in seconds
    #[arg(long)]
    handler_timeout_secs: Option<u64>,
}

/// Run the work command
pub async fn run(db: DbArgs, args: WorkArgs) -> Result<()> {
    let mut queue_config = QueueConfig::from_env();
    if let Some(secs) = args.handler_timeout_secs {
        queue_config.handler_timeout = Some(Duration::from_secs(secs));
    }

    let mut worker_config = WorkerConfig::from_env();
    if let Some(n) = args.concurrency {
        worker_config.concurrency = n.max(1);
    }
    if let Some(ms) = args.poll_ms {
        worker_config.poll_interval = Duration::from_millis(ms);
    }

    let (_db, queue) = open_queue(&db, queue_config).await?;
    let worker = Worker::new(queue, worker_config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested, finishing in-flight jobs");
        }
        let _ = shutdown_tx.send(true);
    });

    crate::print_info(&format!(
        "Worker running with {} loop(s); press Ctrl-C to stop",
        worker_config.concurrency
    ));
    let stats = worker.run(shutdown_rx).await;

    crate::print_success(&format!(
        "Stopped: {} completed, {} retried, {} failed, {} lost claims, {} store errors",
        stats.completed, stats.retried, stats.failed, stats.lost_claims, stats.store_errors
    ));
    Ok(())
}

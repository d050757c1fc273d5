//! Process command - run ready jobs once
//!
//! Usage:
//! ```bash
//! pricegrid process
//! pricegrid process --drain --json
//! ```

use anyhow::Result;
use clap::Args;
use pricegrid_queue::{ProcessOutcome, QueueConfig, Worker, WorkerConfig};

use super::{describe, open_queue, DbArgs};

/// Arguments for the process command
#[derive(Args)]
pub struct ProcessArgs {
    /// Keep processing until no job is ready
    #[arg(long)]
    drain: bool,

    /// Print outcomes as JSON
    #[arg(long)]
    json: bool,
}

/// Run the process command
pub async fn run(db: DbArgs, args: ProcessArgs) -> Result<()> {
    let (_db, queue) = open_queue(&db, QueueConfig::from_env()).await?;

    let outcomes = if args.drain {
        Worker::new(queue, WorkerConfig::default()).drain().await?
    } else {
        vec![queue.process_next().await?]
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
        return Ok(());
    }

    if outcomes.is_empty() {
        crate::print_info(&describe(&ProcessOutcome::Idle));
    }
    for outcome in &outcomes {
        match outcome {
            ProcessOutcome::Idle => crate::print_info(&describe(outcome)),
            ProcessOutcome::Completed { .. } => crate::print_success(&describe(outcome)),
            ProcessOutcome::Retrying { .. } | ProcessOutcome::ClaimLost { .. } => {
                crate::print_warning(&describe(outcome))
            }
            ProcessOutcome::Failed { .. } => crate::print_error(&describe(outcome)),
        }
    }
    Ok(())
}

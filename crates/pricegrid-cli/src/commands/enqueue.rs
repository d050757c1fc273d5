//! Enqueue command - queue a new job
//!
//! Usage:
//! ```bash
//! pricegrid enqueue shop_redact --payload '{"shop": "acme.myshopify.com"}'
//! pricegrid enqueue customer_redact --payload '{"shop": "acme.myshopify.com"}' --delay-secs 60
//! ```

use anyhow::{bail, Context, Result};
use clap::Args;
use pricegrid_queue::{EnqueueOptions, QueueConfig};
use std::time::Duration;

use super::{open_queue, DbArgs};

/// Arguments for the enqueue command
#[derive(Args)]
pub struct EnqueueArgs {
    /// Job type (selects the handler)
    job_type: String,

    /// JSON object passed verbatim to the handler
    #[arg(long, default_value = "{}")]
    payload: String,

    /// Attempt ceiling (defaults to PRICEGRID_MAX_ATTEMPTS or 3)
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Postpone the first attempt
    #[arg(long)]
    delay_secs: Option<u64>,
}

/// Run the enqueue command
pub async fn run(db: DbArgs, args: EnqueueArgs) -> Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(&args.payload).context("Payload must be valid JSON")?;
    if !payload.is_object() {
        bail!("Payload must be a JSON object");
    }

    let (_db, queue) = open_queue(&db, QueueConfig::from_env()).await?;
    if !queue.registry().contains(&args.job_type) {
        crate::print_warning(&format!(
            "No handler registered for '{}'; the job will fail when processed",
            args.job_type
        ));
    }

    let options = EnqueueOptions {
        max_attempts: args.max_attempts,
        delay: args.delay_secs.map(Duration::from_secs),
    };
    let id = queue.enqueue_with(&args.job_type, payload, options).await?;

    crate::print_success(&format!("Job enqueued: {} ({})", id, args.job_type));
    Ok(())
}

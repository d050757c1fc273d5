//! Status and list commands - inspect stored jobs
//!
//! Usage:
//! ```bash
//! pricegrid status 0b7c7f5e-8f2e-4d7e-a3a8-2f1d5c6b9e10
//! pricegrid list --status pending --limit 20
//! ```

use anyhow::{anyhow, Context, Result};
use clap::Args;
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use pricegrid_queue::{JobFilter, JobRecord, JobStatus, QueueConfig};
use uuid::Uuid;

use super::{open_queue, DbArgs};

/// Arguments for the status command
#[derive(Args)]
pub struct StatusArgs {
    /// Job id
    id: String,

    /// Output raw JSON
    #[arg(long)]
    json: bool,
}

/// Arguments for the list command
#[derive(Args)]
pub struct ListArgs {
    /// Only jobs in this status (pending, processing, completed, failed)
    #[arg(long)]
    status: Option<String>,

    /// Maximum rows
    #[arg(long, default_value_t = 50)]
    limit: usize,
}

fn status_cell(status: JobStatus) -> Cell {
    let color = match status {
        JobStatus::Pending => Color::Yellow,
        JobStatus::Processing => Color::Blue,
        JobStatus::Completed => Color::Green,
        JobStatus::Failed => Color::Red,
    };
    Cell::new(status.as_str()).fg(color)
}

/// Run the status command
pub async fn status(db: DbArgs, args: StatusArgs) -> Result<()> {
    let id = Uuid::parse_str(&args.id).context("Job id must be a UUID")?;
    let (_db, queue) = open_queue(&db, QueueConfig::from_env()).await?;
    let job = queue
        .job(id)
        .await?
        .ok_or_else(|| anyhow!("Job not found: {}", id))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&job)?);
        return Ok(());
    }

    print_job(&job);
    Ok(())
}

fn print_job(job: &JobRecord) {
    println!("{} {}", "Job".bold().cyan(), job.id.to_string().bold());
    println!("  {} {}", "Type:".dimmed(), job.job_type);
    println!("  {} {}", "Status:".dimmed(), job.status.as_str().bold());
    println!(
        "  {} {}/{}",
        "Attempts:".dimmed(),
        job.attempts,
        job.max_attempts
    );
    println!("  {} {}", "Scheduled:".dimmed(), job.scheduled_at.to_rfc3339());
    println!("  {} {}", "Created:".dimmed(), job.created_at.to_rfc3339());
    if let Some(at) = job.processed_at {
        println!("  {} {}", "Processed:".dimmed(), at.to_rfc3339());
    }
    if let Some(ref error) = job.error {
        println!("  {} {}", "Last error:".dimmed(), error.red());
    }
    println!("  {} {}", "Payload:".dimmed(), job.payload);
}

/// Run the list command
pub async fn list(db: DbArgs, args: ListArgs) -> Result<()> {
    let status = args
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()
        .map_err(|e| anyhow!(e))?;

    let (_db, queue) = open_queue(&db, QueueConfig::from_env()).await?;
    let jobs = queue
        .jobs(JobFilter {
            status,
            limit: Some(args.limit),
        })
        .await?;

    if jobs.is_empty() {
        crate::print_info("No jobs found");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Id").fg(Color::Cyan),
            Cell::new("Type").fg(Color::Cyan),
            Cell::new("Status").fg(Color::Cyan),
            Cell::new("Attempts").fg(Color::Cyan),
            Cell::new("Scheduled").fg(Color::Cyan),
            Cell::new("Last error").fg(Color::Cyan),
        ]);

    for job in &jobs {
        table.add_row(vec![
            Cell::new(job.id),
            Cell::new(&job.job_type),
            status_cell(job.status),
            Cell::new(format!("{}/{}", job.attempts, job.max_attempts)),
            Cell::new(job.scheduled_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(job.error.as_deref().unwrap_or("")),
        ]);
    }

    println!("{table}");
    Ok(())
}

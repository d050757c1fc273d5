//! Pricegrid CLI - operate the background job queue
//!
//! # Usage
//!
//! ```bash
//! # Queue a shop redaction
//! pricegrid enqueue shop_redact --payload '{"shop": "acme.myshopify.com"}'
//!
//! # Run the next ready job (or everything that is ready)
//! pricegrid process
//! pricegrid process --drain
//!
//! # Keep workers running until Ctrl-C
//! pricegrid work --concurrency 4
//!
//! # Inspect jobs
//! pricegrid list --status failed
//! pricegrid status <job-id>
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;

mod commands;

use commands::{enqueue, jobs, process, work};

/// Pricegrid job queue
///
/// Durable, at-least-once background jobs for the storefront backend.
#[derive(Parser)]
#[command(
    name = "pricegrid",
    version,
    about = "Pricegrid CLI - background job queue operations",
    long_about = "Enqueue, run and inspect Pricegrid background jobs.\n\n\
                  Jobs are stored in SQLite and retried with exponential\n\
                  backoff until they succeed or run out of attempts."
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// SQLite database URL
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a new job
    #[command(name = "enqueue")]
    Enqueue(enqueue::EnqueueArgs),

    /// Run the next ready job
    #[command(name = "process")]
    Process(process::ProcessArgs),

    /// Run worker loops until interrupted
    #[command(name = "work")]
    Work(work::WorkArgs),

    /// Show a single job
    #[command(name = "status")]
    Status(jobs::StatusArgs),

    /// List jobs
    #[command(name = "list")]
    List(jobs::ListArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup tracing based on verbosity
    setup_logging(cli.verbose);

    let db = commands::DbArgs {
        database_url: cli.database_url,
    };

    match cli.command {
        Commands::Enqueue(args) => enqueue::run(db, args).await,
        Commands::Process(args) => process::run(db, args).await,
        Commands::Work(args) => work::run(db, args).await,
        Commands::Status(args) => jobs::status(db, args).await,
        Commands::List(args) => jobs::list(db, args).await,
    }
}

/// Setup logging based on verbosity level
fn setup_logging(verbosity: u8) {
    use tracing_subscriber::EnvFilter;

    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();
}

/// Print a success message with a checkmark
pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg);
}

/// Print an error message with an X
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red().bold(), msg);
}

/// Print a warning message
pub fn print_warning(msg: &str) {
    println!("{} {}", "⚠".yellow().bold(), msg);
}

/// Print an info message
pub fn print_info(msg: &str) {
    println!("{} {}", "ℹ".blue().bold(), msg);
}

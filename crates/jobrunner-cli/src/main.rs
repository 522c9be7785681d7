//! jobrunner - background job runner CLI

mod commands;
mod handlers;
mod logging;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobrunner_core::{Runner, RunnerConfig};

use commands::{ListArgs, SubmitArgs, WorkArgs};

#[derive(Parser)]
#[command(
    name = "jobrunner",
    version,
    about = "Priority-aware, retryable, cancellable background jobs"
)]
struct Cli {
    /// TOML config file
    #[arg(short, long, global = true, env = "JOBRUNNER_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite job database (overrides config and JOBRUNNER_DATABASE)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a job
    Submit(SubmitArgs),
    /// Show one job record as JSON
    Status { id: String },
    /// List job records, highest priority first
    List(ListArgs),
    /// Cancel a pending, running or retrying job
    Cancel { id: String },
    /// Resubmit a failed job as a new pending record
    Retry { id: String },
    /// Record counts per status
    Counts,
    /// Run the dispatcher until Ctrl-C
    Work(WorkArgs),
    /// In-memory walkthrough with the demo targets
    Demo,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = RunnerConfig::load(cli.config.as_deref()).context("failed to load config")?;
    let _log_guard = logging::init(&config.log).context("failed to set up logging")?;

    let flaky_failures = match &cli.command {
        Commands::Demo => return commands::demo(config).await,
        Commands::Work(args) => args.flaky_failures,
        _ => 0,
    };

    let database = commands::database_path(&config, cli.database.as_deref())?;
    let store = commands::open_store(&database).await?;
    let registry = handlers::registry(flaky_failures)?;
    let runner = Runner::new(registry, store, config);

    match cli.command {
        Commands::Submit(args) => commands::submit(&runner, args).await,
        Commands::Status { id } => commands::status(&runner, &id).await,
        Commands::List(args) => commands::list(&runner, args).await,
        Commands::Cancel { id } => commands::cancel(&runner, &id).await,
        Commands::Retry { id } => commands::retry(&runner, &id).await,
        Commands::Counts => commands::counts(&runner).await,
        Commands::Work(_) => commands::work(&runner).await,
        Commands::Demo => Ok(()),
    }
}

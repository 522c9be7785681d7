//! Command handlers

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Args;
use jobrunner_core::config::RunnerConfig;
use jobrunner_core::ports::JobStore;
use jobrunner_core::store::{InMemoryJobStore, SqliteJobStore};
use jobrunner_core::{JobFilter, JobId, JobPage, JobRecord, JobStatus, Page, Runner};
use serde_json::Value;
use tracing::info;

use crate::handlers;

#[derive(Args)]
pub struct SubmitArgs {
    /// Registered target name
    pub target: String,
    /// Positional arguments; each is parsed as JSON, falling back to a string
    pub arguments: Vec<String>,
    #[arg(long, allow_negative_numbers = true)]
    pub priority: Option<i32>,
    #[arg(long)]
    pub max_retries: Option<u32>,
    #[arg(long)]
    pub retry_delay_ms: Option<u64>,
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[derive(Args)]
pub struct ListArgs {
    /// Only records in this status
    #[arg(long)]
    pub status: Option<JobStatus>,
    /// Only records with this priority
    #[arg(long, allow_negative_numbers = true)]
    pub priority: Option<i32>,
    #[arg(long, default_value_t = 1)]
    pub page: u32,
    #[arg(long, default_value_t = Page::DEFAULT_PER_PAGE)]
    pub per_page: u32,
}

#[derive(Args)]
pub struct WorkArgs {
    /// How many calls of the `flaky` target fail before it starts succeeding
    #[arg(long, default_value_t = 2)]
    pub flaky_failures: u32,
}

/// Open the configured SQLite database.
pub async fn open_store(database: &Path) -> Result<Arc<dyn JobStore>> {
    let url = format!("sqlite://{}", database.display());
    let store = SqliteJobStore::connect(&url)
        .await
        .with_context(|| format!("failed to open job database at {}", database.display()))?;
    Ok(Arc::new(store))
}

pub async fn submit(runner: &Runner, args: SubmitArgs) -> Result<()> {
    let service = runner.service();
    let mut request = service
        .request(args.target)
        .with_arguments(args.arguments.iter().map(|a| parse_argument(a)).collect());
    if let Some(priority) = args.priority {
        request = request.with_priority(priority);
    }
    if let Some(max_retries) = args.max_retries {
        request = request.with_max_retries(max_retries);
    }
    if let Some(ms) = args.retry_delay_ms {
        request = request.with_retry_delay(Duration::from_millis(ms));
    }
    if let Some(ms) = args.timeout_ms {
        request = request.with_timeout(Duration::from_millis(ms));
    }

    let id = service.submit(request).await.context("submit rejected")?;
    println!("{id}");
    Ok(())
}

pub async fn status(runner: &Runner, id: &str) -> Result<()> {
    let record = runner.service().get(parse_id(id)?).await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

pub async fn list(runner: &Runner, args: ListArgs) -> Result<()> {
    let filter = JobFilter {
        status: args.status,
        priority: args.priority,
    };
    let page = runner
        .service()
        .list(&filter, Page::new(args.page, args.per_page))
        .await?;
    print_page(&page);
    Ok(())
}

pub async fn cancel(runner: &Runner, id: &str) -> Result<()> {
    let record = runner
        .service()
        .request_cancel(parse_id(id)?)
        .await
        .context("cancel rejected")?;
    println!("{} {}", record.id, record.status);
    Ok(())
}

pub async fn retry(runner: &Runner, id: &str) -> Result<()> {
    let new_id = runner
        .service()
        .resubmit(parse_id(id)?)
        .await
        .context("retry rejected")?;
    println!("{new_id}");
    Ok(())
}

pub async fn counts(runner: &Runner) -> Result<()> {
    let counts = runner.service().counts().await?;
    println!("{}", serde_json::to_string_pretty(&counts)?);
    Ok(())
}

/// Run the dispatcher until Ctrl-C, then drain.
pub async fn work(runner: &Runner) -> Result<()> {
    let handle = runner.start();
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested, draining in-flight jobs");
    handle.shutdown_and_join().await;
    Ok(())
}

/// In-memory walkthrough of priorities, retries, timeouts and cancellation.
pub async fn demo(mut config: RunnerConfig) -> Result<()> {
    config.dispatcher.concurrency = 2;
    config.dispatcher.poll_interval = Duration::from_millis(200);
    config.defaults.retry_delay = Duration::from_secs(1);
    config.defaults.timeout = Duration::from_secs(5);

    let registry = handlers::registry(2)?;
    let runner = Runner::new(registry, Arc::new(InMemoryJobStore::new()), config);
    let service = runner.service();

    let mut ids = Vec::new();
    // low priority, retried twice before it succeeds
    ids.push(
        service
            .submit(
                service
                    .request("flaky")
                    .with_arguments(vec![Value::from("world")])
                    .with_max_retries(2),
            )
            .await?,
    );
    // normal report
    ids.push(
        service
            .submit(service.request("report").with_arguments(vec![Value::from(1)]))
            .await?,
    );
    // urgent
    ids.push(
        service
            .submit(
                service
                    .request("echo")
                    .with_arguments(vec![Value::from("urgent")])
                    .with_priority(5),
            )
            .await?,
    );
    // always times out, no retries
    ids.push(
        service
            .submit(
                service
                    .request("report")
                    .with_arguments(vec![Value::from(10)])
                    .with_timeout(Duration::from_secs(1))
                    .with_max_retries(0),
            )
            .await?,
    );
    // cancelled before it ever runs
    let doomed = service
        .submit(service.request("report").with_priority(-1))
        .await?;
    service.request_cancel(doomed).await?;
    ids.push(doomed);

    let handle = runner.start();
    loop {
        let mut done = true;
        for id in &ids {
            done &= service.get(*id).await?.status.is_terminal();
        }
        if done {
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    handle.shutdown_and_join().await;

    let page = service
        .list(&JobFilter::default(), Page::default())
        .await?;
    print_page(&page);
    println!("{}", serde_json::to_string_pretty(&service.counts().await?)?);
    Ok(())
}

fn parse_id(id: &str) -> Result<JobId> {
    id.parse::<JobId>().with_context(|| format!("not a job id: {id}"))
}

fn parse_argument(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn print_page(page: &JobPage) {
    println!(
        "{:<30} {:<10} {:>8} {:<9} {:>9}  ERROR",
        "ID", "TARGET", "PRIORITY", "STATUS", "ATTEMPTS"
    );
    for record in &page.items {
        println!("{}", row(record));
    }
    println!(
        "page {}/{} ({} records)",
        page.page.number,
        page.last_page(),
        page.total
    );
}

fn row(record: &JobRecord) -> String {
    format!(
        "{:<30} {:<10} {:>8} {:<9} {:>5}/{:<3}  {}",
        record.id.to_string(),
        record.target,
        record.priority,
        record.status.to_string(),
        record.attempt,
        record.max_attempts(),
        record.error_message.as_deref().unwrap_or("")
    )
}

/// `--database` given on the command line wins over config and env.
pub fn database_path(config: &RunnerConfig, flag: Option<&Path>) -> Result<std::path::PathBuf> {
    let path = flag
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.store.database.clone());
    if path.as_os_str().is_empty() {
        bail!("no job database configured");
    }
    Ok(path)
}

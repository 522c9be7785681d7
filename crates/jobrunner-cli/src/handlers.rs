//! Demo targets shipped with the CLI.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use jobrunner_core::registry::{
    ArgKind, Handler, HandlerError, JobHandler, Registry, RegistryError, Signature, TypedJob,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

/// `report [seconds]`: simulated long-running report.
#[derive(Debug, Deserialize)]
pub struct GenerateReport {
    #[serde(default = "default_report_seconds")]
    pub seconds: u64,
}

fn default_report_seconds() -> u64 {
    3
}

impl TypedJob for GenerateReport {
    const TARGET: &'static str = "report";

    fn signature() -> Signature {
        Signature::new().optional("seconds", ArgKind::Integer)
    }
}

pub struct ReportHandler;

#[async_trait]
impl Handler<GenerateReport> for ReportHandler {
    async fn handle(&self, job: GenerateReport) -> Result<(), HandlerError> {
        tokio::time::sleep(Duration::from_secs(job.seconds)).await;
        info!(seconds = job.seconds, "report generated");
        Ok(())
    }
}

/// `echo ...`: logs its arguments.
struct EchoHandler;

#[async_trait]
impl JobHandler for EchoHandler {
    async fn run(&self, arguments: Vec<Value>) -> Result<(), HandlerError> {
        let arguments = Value::Array(arguments);
        info!(%arguments, "echo");
        Ok(())
    }
}

/// `flaky <name>`: fails the first `failures` calls (shared across jobs),
/// then greets.
#[derive(Debug, Deserialize)]
pub struct Flaky {
    pub name: String,
}

impl TypedJob for Flaky {
    const TARGET: &'static str = "flaky";

    fn signature() -> Signature {
        Signature::new().param("name", ArgKind::String)
    }
}

pub struct FlakyHandler {
    remaining_failures: AtomicU32,
}

impl FlakyHandler {
    pub fn new(failures: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl Handler<Flaky> for FlakyHandler {
    async fn handle(&self, job: Flaky) -> Result<(), HandlerError> {
        let left = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if let Ok(left) = left {
            return Err(HandlerError::new(format!(
                "intentional failure (left={left})"
            )));
        }
        info!(name = %job.name, "hello");
        Ok(())
    }
}

/// Registry with every demo target. `flaky_failures` configures `flaky`.
pub fn registry(flaky_failures: u32) -> Result<Registry, RegistryError> {
    Registry::builder()
        .register_typed::<GenerateReport, _>(ReportHandler)?
        .register("echo", Arc::new(EchoHandler), Signature::any())?
        .register_typed::<Flaky, _>(FlakyHandler::new(flaky_failures))?
        .expect_targets(&["report", "echo", "flaky"])
        .build()
}

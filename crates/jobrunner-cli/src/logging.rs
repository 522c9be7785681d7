//! Tracing subscriber setup.

use std::path::Path;

use anyhow::{Context, Result};
use jobrunner_core::config::{LogConfig, LogFormat};
use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

/// Install the global subscriber. `RUST_LOG` wins over `config.level`.
///
/// With `config.error_file` set, WARN+ events from the core are also appended
/// to that file; keep the returned guard alive until exit so they get flushed.
/// Safe to call more than once; later calls are no-ops.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let console: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed(),
        LogFormat::Json => fmt::layer().with_writer(std::io::stderr).json().boxed(),
    };

    let (error_file, guard) = match &config.error_file {
        Some(path) => {
            let (writer, guard) = error_file_writer(path)?;
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(core_warnings());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(console.with_filter(filter))
        .with(error_file)
        .try_init();
    Ok(guard)
}

/// Non-blocking appender on `path`, creating its directory if needed.
fn error_file_writer(path: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let name = path
        .file_name()
        .with_context(|| format!("error log path has no file name: {}", path.display()))?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create log directory {}", dir.display()))?;
    Ok(tracing_appender::non_blocking(
        tracing_appender::rolling::never(dir, name),
    ))
}

/// Failed attempts and failed jobs.
fn core_warnings() -> Targets {
    Targets::new().with_target("jobrunner_core", Level::WARN)
}

//! Runner configuration.
//!
//! Loaded from TOML, then `JOBRUNNER_*` environment variables override
//! individual keys:
//!
//! ```toml
//! [dispatcher]
//! concurrency = 4
//! poll_interval_ms = 1000
//! page_size = 32
//!
//! [defaults]
//! priority = 0
//! max_retries = 3
//! retry_delay_ms = 5000
//! timeout_ms = 60000
//!
//! [retry]
//! backoff = "fixed"        # or "exponential"
//! multiplier = 2.0
//! max_delay_ms = 300000
//!
//! [store]
//! database = "jobrunner.db"
//!
//! [log]
//! level = "info"
//! format = "pretty"        # or "json"
//! error_file = "logs/jobrunner_errors.log"   # optional
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::JobRequest;
use crate::domain::request::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY, DEFAULT_TIMEOUT, duration_ms};
use crate::engine::RetryPolicy;

pub const ENV_CONCURRENCY: &str = "JOBRUNNER_CONCURRENCY";
pub const ENV_POLL_INTERVAL_MS: &str = "JOBRUNNER_POLL_INTERVAL_MS";
pub const ENV_DATABASE: &str = "JOBRUNNER_DATABASE";
pub const ENV_LOG: &str = "JOBRUNNER_LOG";
pub const ENV_ERROR_LOG: &str = "JOBRUNNER_ERROR_LOG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub dispatcher: DispatcherConfig,
    pub defaults: JobDefaults,
    pub retry: RetryConfig,
    pub store: StoreConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Maximum number of jobs executing at once.
    pub concurrency: usize,

    /// Upper bound on the wait between dispatch cycles.
    #[serde(rename = "poll_interval_ms", with = "duration_ms")]
    pub poll_interval: Duration,

    /// Rows fetched per `list_pending` call.
    pub page_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_secs(1),
            page_size: 32,
        }
    }
}

/// Values used for submissions that do not set them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobDefaults {
    pub priority: i32,
    pub max_retries: u32,
    #[serde(rename = "retry_delay_ms", with = "duration_ms")]
    pub retry_delay: Duration,
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            priority: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl JobDefaults {
    /// A request for `target` pre-filled with these defaults.
    pub fn request(&self, target: impl Into<String>) -> JobRequest {
        JobRequest::new(target)
            .with_priority(self.priority)
            .with_max_retries(self.max_retries)
            .with_retry_delay(self.retry_delay)
            .with_timeout(self.timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub backoff: BackoffKind,
    /// Only read for `exponential`.
    pub multiplier: f64,
    /// Only read for `exponential`.
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffKind::Fixed,
            multiplier: 2.0,
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        match self.backoff {
            BackoffKind::Fixed => RetryPolicy::fixed(),
            BackoffKind::Exponential => RetryPolicy::exponential(self.multiplier, self.max_delay),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file.
    pub database: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("jobrunner.db"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
    /// Append WARN+ events from the core (failed attempts, failed jobs) here.
    pub error_file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            error_file: None,
        }
    }
}

impl RunnerConfig {
    /// Defaults, overlaid with `path` (if any), then with the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `JOBRUNNER_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_CONCURRENCY) {
            self.dispatcher.concurrency = parse_env(ENV_CONCURRENCY, &value)?;
        }
        if let Some(value) = lookup(ENV_POLL_INTERVAL_MS) {
            let ms: u64 = parse_env(ENV_POLL_INTERVAL_MS, &value)?;
            self.dispatcher.poll_interval = Duration::from_millis(ms);
        }
        if let Some(value) = lookup(ENV_DATABASE) {
            self.store.database = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_LOG) {
            self.log.level = value;
        }
        if let Some(value) = lookup(ENV_ERROR_LOG) {
            self.log.error_file = Some(PathBuf::from(value));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatcher.concurrency == 0 {
            return Err(ConfigError::Invalid("dispatcher.concurrency must be at least 1".into()));
        }
        if self.dispatcher.page_size == 0 {
            return Err(ConfigError::Invalid("dispatcher.page_size must be at least 1".into()));
        }
        if self.defaults.timeout.is_zero() {
            return Err(ConfigError::Invalid("defaults.timeout_ms must be positive".into()));
        }
        if self.retry.backoff == BackoffKind::Exponential
            && (self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0)
        {
            return Err(ConfigError::Invalid("retry.multiplier must be >= 1.0".into()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

//! Job submission request.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// Immutable description of one unit of work to perform.
///
/// Durations are (de)serialized as milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Registry key of the handler to run.
    pub target: String,

    /// Positional arguments passed to the handler.
    #[serde(default)]
    pub arguments: Vec<serde_json::Value>,

    /// Higher is more urgent.
    #[serde(default)]
    pub priority: i32,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(with = "duration_ms", default = "default_retry_delay")]
    pub retry_delay: Duration,

    /// Upper bound for a single attempt.
    #[serde(with = "duration_ms", default = "default_timeout")]
    pub timeout: Duration,
}

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_delay() -> Duration {
    DEFAULT_RETRY_DELAY
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

impl JobRequest {
    /// A request with the stock defaults: priority 0, 3 retries, 5s delay, 60s timeout.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            arguments: Vec::new(),
            priority: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_arguments(mut self, arguments: Vec<serde_json::Value>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Shape checks that do not need the registry.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.target.trim().is_empty() {
            return Err(JobError::Validation("target must not be empty".into()));
        }
        if self.timeout.is_zero() {
            return Err(JobError::Validation("timeout must be greater than zero".into()));
        }
        // Stored and serialized as whole milliseconds.
        for (name, value) in [("timeout", self.timeout), ("retry_delay", self.retry_delay)] {
            if value.subsec_nanos() % 1_000_000 != 0 {
                return Err(JobError::Validation(format!(
                    "{name} must be a whole number of milliseconds, got {value:?}"
                )));
            }
        }
        Ok(())
    }
}

/// Serde adapter for `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

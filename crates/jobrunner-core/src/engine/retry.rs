//! Retry policy: decides the wait before the next attempt.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the per-record `retry_delay` grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Wait exactly `retry_delay` every time.
    #[default]
    Fixed,

    /// `retry_delay * multiplier^(attempt - 1)`, capped at `max_delay`.
    Exponential {
        multiplier: f64,
        #[serde(with = "crate::domain::request::duration_ms")]
        max_delay: Duration,
    },
}

/// Retry policy shared by all executions of one runner.
///
/// The base delay is per record; the policy only shapes it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed() -> Self {
        Self {
            backoff: Backoff::Fixed,
        }
    }

    pub fn exponential(multiplier: f64, max_delay: Duration) -> Self {
        Self {
            backoff: Backoff::Exponential {
                multiplier,
                max_delay,
            },
        }
    }

    /// Delay before retrying after `attempt` failed attempts (1-indexed).
    ///
    /// With base=2s, multiplier=2.0, max 10s:
    /// - attempt 1: 2s
    /// - attempt 2: 4s
    /// - attempt 3: 8s
    /// - attempt 4: 10s
    pub fn delay(&self, base: Duration, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => base,
            Backoff::Exponential {
                multiplier,
                max_delay,
            } => {
                let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
                let secs = base.as_secs_f64() * multiplier.max(1.0).powi(exponent);
                let max_secs = max_delay.as_secs_f64();
                if !secs.is_finite() || secs >= max_secs {
                    max_delay
                } else {
                    Duration::from_secs_f64(secs)
                }
            }
        }
    }
}

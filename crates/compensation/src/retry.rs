//! Retry policy and the state it produces.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// How often and how fast a failed execution is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySpec {
    pub max_retries: u32,
    /// Backoff before the first retry; doubled on every further retry.
    pub min_backoff: Duration,
    /// How long a prepared retry may run before it counts as hung.
    pub execution_timeout: Duration,
}

impl Default for RetrySpec {
    fn default() -> Self {
        Self {
            max_retries: 10,
            min_backoff: Duration::from_secs(180),
            execution_timeout: Duration::from_secs(120),
        }
    }
}

impl RetrySpec {
    /// Retry state after the `retries`-th attempt started at `retry_at`.
    ///
    /// `next_retry_at = retry_at + min_backoff * 2^retries` and
    /// `timeout_at = retry_at + execution_timeout`. Both saturate instead of
    /// overflowing.
    pub fn next_retry_state(&self, retries: u32, retry_at: DateTime<Utc>) -> RetryState {
        let backoff = self
            .min_backoff
            .saturating_mul(2u32.checked_pow(retries).unwrap_or(u32::MAX));

        RetryState {
            retries,
            retry_at,
            timeout_at: add(retry_at, self.execution_timeout),
            next_retry_at: add(retry_at, backoff),
        }
    }
}

fn add(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Where an execution record is in its retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetryState {
    /// Retries started so far. The original failure is not counted.
    pub retries: u32,
    pub retry_at: DateTime<Utc>,
    pub timeout_at: DateTime<Utc>,
    pub next_retry_at: DateTime<Utc>,
}

impl RetryState {
    pub fn timed_out(&self, now: DateTime<Utc>) -> bool {
        now > self.timeout_at
    }
}

/// Lifecycle of an execution record.
///
/// ```text
/// FAILED ──prepare──► PREPARED ──success──► SUCCEEDED
///   ▲                    │
///   └──────failure───────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionFailedStatus {
    #[default]
    Failed,
    Prepared,
    Succeeded,
}

impl ExecutionFailedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionFailedStatus::Failed => "FAILED",
            ExecutionFailedStatus::Prepared => "PREPARED",
            ExecutionFailedStatus::Succeeded => "SUCCEEDED",
        }
    }
}

impl std::fmt::Display for ExecutionFailedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether retrying a failure can be expected to help.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoverableType {
    Recoverable,
    Unrecoverable,
    #[default]
    Unknown,
}

impl std::fmt::Display for RecoverableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RecoverableType::Recoverable => "RECOVERABLE",
            RecoverableType::Unrecoverable => "UNRECOVERABLE",
            RecoverableType::Unknown => "UNKNOWN",
        })
    }
}

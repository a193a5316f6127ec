//! Bounded retry of transient backend errors.
//!
//! Throttling and eventual-consistency lag are retried with backoff inside a
//! task's own `find`/render; every other error surfaces on the first attempt.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cloud::CloudError;
use crate::execute::TaskError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
  Fixed,
  #[default]
  Exponential,
}

/// How many times a backend call is attempted, and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  /// Total attempts including the first one. Zero is treated as one.
  pub max_attempts: u32,
  pub base_delay_ms: u64,
  pub strategy: Backoff,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      base_delay_ms: 500,
      strategy: Backoff::Exponential,
    }
  }
}

impl RetryPolicy {
  pub fn new(max_attempts: u32, strategy: Backoff, base_delay_ms: u64) -> Self {
    Self {
      max_attempts,
      base_delay_ms,
      strategy,
    }
  }

  /// Delay before retry number `retry` (0 is the first retry).
  pub fn delay(&self, retry: u32) -> Duration {
    let ms = match self.strategy {
      Backoff::Fixed => self.base_delay_ms,
      Backoff::Exponential => self.base_delay_ms.saturating_mul(2u64.saturating_pow(retry)),
    };
    Duration::from_millis(ms)
  }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// policy's attempts run out.
///
/// # Arguments
///
/// * `policy` - Attempt budget and backoff
/// * `task` - Task name used in the resulting error
/// * `op` - The backend call, re-invoked for each attempt
///
/// # Returns
///
/// The call's value, or a [`TaskError`]: `Timeout` once transient failures
/// exhaust the budget, otherwise the mapped error of the first permanent failure.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, task: &str, mut op: F) -> Result<T, TaskError>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, CloudError>>,
{
  let attempts = policy.max_attempts.max(1);
  let mut attempt = 0;

  loop {
    attempt += 1;
    match op().await {
      Ok(value) => return Ok(value),
      Err(e) if e.is_transient() && attempt < attempts => {
        let delay = policy.delay(attempt - 1);
        debug!(task, attempt, error = %e, delay_ms = delay.as_millis() as u64, "retrying transient error");
        tokio::time::sleep(delay).await;
      }
      Err(e) if e.is_transient() => {
        return Err(TaskError::Timeout {
          resource: task.to_string(),
          attempts,
          last_seen: e.to_string(),
        });
      }
      Err(e) => return Err(TaskError::from_cloud(task, e)),
    }
  }
}

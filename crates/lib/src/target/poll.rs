//! Readiness polling for live backends.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::execute::{CancelToken, TaskError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
  /// Sleep between two probes.
  pub interval_ms: u64,
  /// Total number of probes before giving up. Zero is treated as one.
  pub max_attempts: u32,
}

impl Default for PollConfig {
  fn default() -> Self {
    Self {
      interval_ms: 10_000,
      max_attempts: 30,
    }
  }
}

impl PollConfig {
  pub fn interval(&self) -> Duration {
    Duration::from_millis(self.interval_ms)
  }
}

/// Waits for an object to reach an observable state by repeated probing.
#[derive(Debug, Clone)]
pub struct Poller {
  config: PollConfig,
  cancel: CancelToken,
}

impl Poller {
  pub fn new(config: PollConfig) -> Self {
    Self {
      config,
      cancel: CancelToken::new(),
    }
  }

  /// Stop waiting once `cancel` fires.
  pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
    self.cancel = cancel;
    self
  }

  /// Probe until `ready` accepts the observed state.
  ///
  /// Exactly `max_attempts` probes are made at most, with one interval of
  /// sleep between consecutive probes and none after the last. A probe that
  /// returns `None` means the object is not visible yet and counts as not
  /// ready. A probe error ends the wait immediately. Cancellation lets the
  /// probe in flight finish but cuts the sleep short and makes no further
  /// probes.
  ///
  /// # Returns
  ///
  /// The first state accepted by `ready`, [`TaskError::Timeout`] naming
  /// `resource` and the last state seen, or [`TaskError::Cancelled`].
  pub async fn wait_for<S, F, Fut, R>(&self, resource: &str, mut probe: F, ready: R) -> Result<S, TaskError>
  where
    S: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<S>, TaskError>>,
    R: Fn(&S) -> bool,
  {
    let attempts = self.config.max_attempts.max(1);
    let mut last_seen = "not found".to_string();

    for attempt in 1..=attempts {
      if self.cancel.is_cancelled() {
        return Err(self.cancelled(resource, last_seen));
      }

      match probe().await? {
        Some(state) if ready(&state) => return Ok(state),
        Some(state) => last_seen = state.to_string(),
        None => last_seen = "not found".to_string(),
      }
      debug!(resource, attempt, last_seen = %last_seen, "waiting for resource");

      if attempt < attempts {
        tokio::select! {
          _ = tokio::time::sleep(self.config.interval()) => {}
          _ = self.cancel.cancelled() => return Err(self.cancelled(resource, last_seen)),
        }
      }
    }

    Err(TaskError::Timeout {
      resource: resource.to_string(),
      attempts,
      last_seen,
    })
  }

  fn cancelled(&self, resource: &str, last_seen: String) -> TaskError {
    debug!(resource, last_seen = %last_seen, "wait cancelled");
    TaskError::Cancelled {
      resource: resource.to_string(),
      last_seen,
    }
  }
}

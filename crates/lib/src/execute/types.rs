//! Types for task graph execution.
//!
//! This module defines the error taxonomy and the run-level configuration
//! shared by the executor, the deletion pass and the reconciler.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cloud::{CloudError, Tags};
use crate::lifecycle::Lifecycle;
use crate::retry::RetryPolicy;
use crate::target::{PollConfig, TargetKind};

/// Errors that end a single task. They never abort sibling branches.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TaskError {
  /// Observed state diverges from desired under a read-only lifecycle.
  #[error("{task}: {lifecycle} violated: {message}")]
  LifecycleViolation {
    task: String,
    lifecycle: Lifecycle,
    message: String,
  },

  /// A wait or retry budget ran out.
  #[error("timeout waiting for {resource} after {attempts} attempts, last seen: {last_seen}")]
  Timeout {
    resource: String,
    attempts: u32,
    last_seen: String,
  },

  /// The run was cancelled while the task was waiting on the backend.
  #[error("wait for {resource} cancelled, last seen: {last_seen}")]
  Cancelled { resource: String, last_seen: String },

  /// Malformed desired state or a missing dependency output. Not retried.
  #[error("{task}: {message}")]
  Structural { task: String, message: String },

  #[error("{task}: access denied: {message}")]
  AccessDenied { task: String, message: String },

  #[error("{task}: {source}")]
  Cloud {
    task: String,
    #[source]
    source: CloudError,
  },

  /// The worker running the task panicked or was aborted.
  #[error("{task}: worker panicked")]
  Panicked { task: String },
}

impl TaskError {
  /// Attribute a backend error to a task.
  pub fn from_cloud(task: &str, error: CloudError) -> Self {
    match error {
      CloudError::AccessDenied(message) => TaskError::AccessDenied {
        task: task.to_string(),
        message,
      },
      source => TaskError::Cloud {
        task: task.to_string(),
        source,
      },
    }
  }

  pub fn structural(task: &str, message: impl Into<String>) -> Self {
    TaskError::Structural {
      task: task.to_string(),
      message: message.into(),
    }
  }
}

/// Defects in the task map found while building the graph. Nothing runs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
  #[error("dependency cycle detected among tasks: {}", tasks.join(", "))]
  Cycle { tasks: Vec<String> },

  #[error("task {task} references itself")]
  SelfReference { task: String },

  #[error("task {task} references unknown task {reference}")]
  DanglingReference { task: String, reference: String },

  /// Two tasks claim the same cloud object.
  #[error("{kind} {key} is declared by more than one task: {}", tasks.join(", "))]
  AmbiguousOwnership {
    kind: String,
    key: String,
    tasks: Vec<String>,
  },

  /// Two tasks map to one address in an exported document.
  #[error("export address {address} is shared by tasks: {}", tasks.join(", "))]
  AddressCollision { address: String, tasks: Vec<String> },

  #[error("no renderer for task {task} of kind {kind} on the {target} target")]
  MissingRenderer {
    task: String,
    kind: String,
    target: TargetKind,
  },
}

/// Aggregate outcome of a run, returned once every reachable task is terminal.
#[derive(Debug, Error)]
pub enum EngineError {
  #[error("{} task(s) failed: {}; {} blocked", failed.len(), failed.join(", "), blocked.len())]
  TasksFailed { failed: Vec<String>, blocked: Vec<String> },

  #[error("run cancelled with {unfinished} task(s) not finished")]
  Cancelled { unfinished: usize },

  #[error("deletion pass failed: {message}")]
  DeletionFailed { message: String },

  #[error("target finish failed: {message}")]
  Finish { message: String },
}

/// Configuration for one reconciliation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
  /// Maximum number of tasks running at once.
  pub parallelism: usize,

  /// Readiness wait used by live renders.
  pub poll: PollConfig,

  /// Retry policy for transient backend errors.
  pub retry: RetryPolicy,

  /// Force the deletion pass on or off; `None` leaves it to the target.
  pub process_deletions: Option<bool>,

  /// Tags marking objects as owned by this cluster.
  ///
  /// Applied by the live target at finish, and used to find orphans. With no
  /// owner tags the deletion pass refuses to run.
  pub owner_tags: Tags,
}

impl Default for RunConfig {
  fn default() -> Self {
    Self {
      parallelism: 4,
      poll: PollConfig::default(),
      retry: RetryPolicy::default(),
      process_deletions: None,
      owner_tags: Tags::new(),
    }
  }
}

impl RunConfig {
  /// The `KubernetesCluster` ownership tag for `cluster`.
  pub fn cluster_tags(cluster: &str) -> Tags {
    let mut tags = Tags::new();
    tags.insert("KubernetesCluster".to_string(), cluster.to_string());
    tags
  }
}

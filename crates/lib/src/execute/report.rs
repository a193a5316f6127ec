//! Per-task and per-run outcome records.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};

use super::types::{EngineError, TaskError};
use crate::target::TargetKind;

/// Where a task is in its run.
///
/// `Pending → Ready → Running → {Done, Failed}`; a task whose dependency did
/// not finish goes straight to `Blocked` (or `Cancelled`) and never runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
  Pending,
  Ready,
  Running,
  Done,
  Failed,
  Blocked,
  Cancelled,
}

impl TaskState {
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      TaskState::Done | TaskState::Failed | TaskState::Blocked | TaskState::Cancelled
    )
  }
}

impl fmt::Display for TaskState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      TaskState::Pending => "pending",
      TaskState::Ready => "ready",
      TaskState::Running => "running",
      TaskState::Done => "done",
      TaskState::Failed => "failed",
      TaskState::Blocked => "blocked",
      TaskState::Cancelled => "cancelled",
    };
    f.write_str(s)
  }
}

/// What a render did (or, for dry runs and exports, would do).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
  #[default]
  None,
  Create,
  Update,
  Delete,
}

fn serialize_error<S: Serializer>(error: &Option<TaskError>, s: S) -> Result<S::Ok, S::Error> {
  match error {
    Some(e) => s.serialize_some(&e.to_string()),
    None => s.serialize_none(),
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
  pub state: TaskState,
  pub action: TaskAction,
  pub wave: usize,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub warnings: Vec<String>,
  #[serde(serialize_with = "serialize_error", skip_serializing_if = "Option::is_none")]
  pub error: Option<TaskError>,
  /// The dependency whose outcome kept this task from running.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub blocked_by: Option<String>,
}

impl TaskReport {
  pub fn pending(wave: usize) -> Self {
    Self {
      state: TaskState::Pending,
      action: TaskAction::None,
      wave,
      warnings: Vec::new(),
      error: None,
      blocked_by: None,
    }
  }
}

/// Outcome of deleting one orphaned object.
#[derive(Debug, Clone, Serialize)]
pub struct DeletionReport {
  pub kind: String,
  pub key: String,
  pub state: TaskState,
  pub wave: usize,
  #[serde(serialize_with = "serialize_error", skip_serializing_if = "Option::is_none")]
  pub error: Option<TaskError>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub blocked_by: Option<String>,
}

/// Whether the target's finish step ran.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "message")]
pub enum FinishOutcome {
  #[default]
  Skipped,
  Done,
  Failed(String),
}

/// Counts per state, for summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
  pub done: usize,
  pub created: usize,
  pub updated: usize,
  pub unchanged: usize,
  pub failed: usize,
  pub blocked: usize,
  pub cancelled: usize,
  pub deleted: usize,
  pub warnings: usize,
}

/// Aggregate outcome of one reconciliation run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
  pub target: TargetKind,
  pub tasks: BTreeMap<String, TaskReport>,
  /// Deletions keyed by `kind/key`.
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  pub deletions: BTreeMap<String, DeletionReport>,
  /// Deleted objects in the order they were removed.
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub deletion_order: Vec<String>,
  /// Run-level problems that belong to no single task.
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub warnings: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub deletion_error: Option<String>,
  pub finish: FinishOutcome,
  pub cancelled: bool,
}

impl RunReport {
  pub fn new(target: TargetKind) -> Self {
    Self {
      target,
      tasks: BTreeMap::new(),
      deletions: BTreeMap::new(),
      deletion_order: Vec::new(),
      warnings: Vec::new(),
      deletion_error: None,
      finish: FinishOutcome::Skipped,
      cancelled: false,
    }
  }

  pub fn state(&self, task: &str) -> Option<TaskState> {
    self.tasks.get(task).map(|r| r.state)
  }

  fn names_in(&self, state: TaskState) -> Vec<String> {
    self
      .tasks
      .iter()
      .filter(|(_, r)| r.state == state)
      .map(|(name, _)| name.clone())
      .collect()
  }

  pub fn failed(&self) -> Vec<String> {
    self.names_in(TaskState::Failed)
  }

  pub fn blocked(&self) -> Vec<String> {
    self.names_in(TaskState::Blocked)
  }

  /// Whether every task reached `Done`.
  pub fn tasks_succeeded(&self) -> bool {
    self.tasks.values().all(|r| r.state == TaskState::Done)
  }

  pub fn deletions_succeeded(&self) -> bool {
    self.deletion_error.is_none() && self.deletions.values().all(|d| d.state == TaskState::Done)
  }

  /// Returns true if every task and deletion succeeded and finish did not fail.
  pub fn is_success(&self) -> bool {
    !self.cancelled
      && self.tasks_succeeded()
      && self.deletions_succeeded()
      && !matches!(self.finish, FinishOutcome::Failed(_))
  }

  pub fn summary(&self) -> Summary {
    let mut s = Summary::default();
    for report in self.tasks.values() {
      s.warnings += report.warnings.len();
      match report.state {
        TaskState::Done => {
          s.done += 1;
          match report.action {
            TaskAction::Create => s.created += 1,
            TaskAction::Update => s.updated += 1,
            TaskAction::None | TaskAction::Delete => s.unchanged += 1,
          }
        }
        TaskState::Failed => s.failed += 1,
        TaskState::Blocked => s.blocked += 1,
        TaskState::Cancelled => s.cancelled += 1,
        TaskState::Pending | TaskState::Ready | TaskState::Running => {}
      }
    }
    s.deleted = self.deletions.values().filter(|d| d.state == TaskState::Done).count();
    s.warnings += self.warnings.len();
    s
  }

  /// Returns the total number of tasks in the run.
  pub fn total(&self) -> usize {
    self.tasks.len()
  }

  /// Turn the report into the aggregate run error, if there is one.
  pub fn into_result(self) -> Result<RunReport, EngineError> {
    let failed = self.failed();
    let blocked = self.blocked();
    if !failed.is_empty() || !blocked.is_empty() {
      return Err(EngineError::TasksFailed { failed, blocked });
    }

    if self.cancelled {
      let unfinished = self.tasks.values().filter(|r| r.state == TaskState::Cancelled).count();
      return Err(EngineError::Cancelled { unfinished });
    }

    if let Some(message) = &self.deletion_error {
      return Err(EngineError::DeletionFailed {
        message: message.clone(),
      });
    }
    let failed_deletions: Vec<_> = self
      .deletions
      .iter()
      .filter(|(_, d)| d.state != TaskState::Done)
      .map(|(id, _)| id.as_str())
      .collect();
    if !failed_deletions.is_empty() {
      return Err(EngineError::DeletionFailed {
        message: format!("not deleted: {}", failed_deletions.join(", ")),
      });
    }

    if let FinishOutcome::Failed(message) = &self.finish {
      return Err(EngineError::Finish {
        message: message.clone(),
      });
    }

    Ok(self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn report_with(states: &[(&str, TaskState, TaskAction)]) -> RunReport {
    let mut report = RunReport::new(TargetKind::LiveApply);
    for (name, state, action) in states {
      let mut r = TaskReport::pending(0);
      r.state = *state;
      r.action = *action;
      report.tasks.insert(name.to_string(), r);
    }
    report
  }

  #[test]
  fn empty_report_is_success() {
    let report = RunReport::new(TargetKind::DryRun);
    assert!(report.is_success());
    assert_eq!(report.total(), 0);
    assert!(report.into_result().is_ok());
  }

  #[test]
  fn summary_counts_actions() {
    let report = report_with(&[
      ("network", TaskState::Done, TaskAction::Create),
      ("subnet", TaskState::Done, TaskAction::Update),
      ("dns", TaskState::Done, TaskAction::None),
      ("instance", TaskState::Failed, TaskAction::None),
      ("lb", TaskState::Blocked, TaskAction::None),
    ]);

    let s = report.summary();
    assert_eq!(s.done, 3);
    assert_eq!(s.created, 1);
    assert_eq!(s.updated, 1);
    assert_eq!(s.unchanged, 1);
    assert_eq!(s.failed, 1);
    assert_eq!(s.blocked, 1);
    assert!(!report.is_success());
  }

  #[test]
  fn into_result_lists_failed_and_blocked() {
    let report = report_with(&[
      ("network", TaskState::Failed, TaskAction::None),
      ("subnet", TaskState::Blocked, TaskAction::None),
      ("instance", TaskState::Blocked, TaskAction::None),
    ]);

    match report.into_result().unwrap_err() {
      EngineError::TasksFailed { failed, blocked } => {
        assert_eq!(failed, vec!["network"]);
        assert_eq!(blocked, vec!["instance", "subnet"]);
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn cancelled_run_is_error() {
    let mut report = report_with(&[
      ("network", TaskState::Done, TaskAction::Create),
      ("subnet", TaskState::Cancelled, TaskAction::None),
    ]);
    report.cancelled = true;

    assert!(matches!(report.into_result(), Err(EngineError::Cancelled { unfinished: 1 })));
  }

  #[test]
  fn failed_finish_is_error() {
    let mut report = report_with(&[("network", TaskState::Done, TaskAction::None)]);
    report.finish = FinishOutcome::Failed("tagging failed".to_string());
    assert!(!report.is_success());
    assert!(matches!(report.into_result(), Err(EngineError::Finish { .. })));
  }

  #[test]
  fn json_shape() {
    let mut report = report_with(&[("network", TaskState::Failed, TaskAction::None)]);
    report.tasks.get_mut("network").unwrap().error = Some(TaskError::structural("network", "missing cidr"));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["target"], "live_apply");
    assert_eq!(json["tasks"]["network"]["state"], "failed");
    assert_eq!(json["tasks"]["network"]["error"], "network: missing cidr");
    assert_eq!(json["finish"]["status"], "skipped");
    assert!(json.get("deletions").is_none());
  }
}

//! Dry-run planning: record what a live run would do.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::{Render, RenderRequest, RunContext};
use crate::changes::ChangeSet;
use crate::cloud::{Cloud, CloudResource};
use crate::execute::{TaskAction, TaskError};

/// One task's intended action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedChange {
  pub task: String,
  pub kind: String,
  pub key: String,
  pub wave: usize,
  pub action: TaskAction,
  pub changes: ChangeSet,
}

/// An owned object the run would delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedDeletion {
  pub kind: String,
  pub key: String,
  pub wave: usize,
}

/// Everything a dry run recorded, in the order a live run would act.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Plan {
  pub changes: Vec<PlannedChange>,
  pub deletions: Vec<PlannedDeletion>,
}

impl Plan {
  /// Changes that would actually touch the backend.
  pub fn mutations(&self) -> impl Iterator<Item = &PlannedChange> {
    self.changes.iter().filter(|c| c.action != TaskAction::None)
  }

  pub fn is_empty(&self) -> bool {
    self.mutations().next().is_none() && self.deletions.is_empty()
  }
}

#[derive(Debug, Default)]
struct Records {
  changes: Vec<PlannedChange>,
  deletions: Vec<PlannedDeletion>,
}

/// Records change sets and intended deletions without calling any mutating API.
#[derive(Debug, Clone)]
pub struct DryRunTarget {
  cloud: Option<Arc<dyn Cloud>>,
  records: Arc<Mutex<Records>>,
}

impl DryRunTarget {
  pub fn new(cloud: Option<Arc<dyn Cloud>>) -> Self {
    Self {
      cloud,
      records: Arc::default(),
    }
  }

  pub fn cloud(&self) -> Option<&Arc<dyn Cloud>> {
    self.cloud.as_ref()
  }

  fn records(&self) -> MutexGuard<'_, Records> {
    self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  pub fn record(&self, change: PlannedChange) {
    debug!(task = %change.task, action = ?change.action, "planned");
    self.records().changes.push(change);
  }

  pub(super) fn record_deletion(&self, orphan: &CloudResource, wave: usize) {
    debug!(resource = %orphan.id(), wave, "planned deletion");
    self.records().deletions.push(PlannedDeletion {
      kind: orphan.kind.clone(),
      key: orphan.key.clone(),
      wave,
    });
  }

  /// The plan so far. Changes are ordered by wave then task name; deletions
  /// by deletion wave then identity.
  pub fn plan(&self) -> Plan {
    let records = self.records();
    let mut changes = records.changes.clone();
    changes.sort_by(|a, b| (a.wave, &a.task).cmp(&(b.wave, &b.task)));
    let mut deletions = records.deletions.clone();
    deletions.sort_by(|a, b| (a.wave, &a.kind, &a.key).cmp(&(b.wave, &b.kind, &b.key)));
    Plan { changes, deletions }
  }
}

/// Stock dry-run renderer: derive the action from the diff and record it.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanRender;

#[async_trait]
impl Render for PlanRender {
  async fn render(&self, req: RenderRequest<'_>, ctx: &RunContext) -> Result<TaskAction, TaskError> {
    let task = req.task;
    let Some(target) = ctx.target().as_dry_run() else {
      return Err(TaskError::structural(task.name(), "plan renderer used outside a dry run"));
    };

    let action = match req.actual {
      None => TaskAction::Create,
      Some(_) if req.changes.is_empty() => TaskAction::None,
      Some(_) => TaskAction::Update,
    };

    target.record(PlannedChange {
      task: task.name().to_string(),
      kind: task.kind().to_string(),
      key: task.cloud_key().unwrap_or(task.name()).to_string(),
      wave: req.wave,
      action,
      changes: req.changes.clone(),
    });
    Ok(action)
  }
}

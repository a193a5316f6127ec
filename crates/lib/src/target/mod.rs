//! Execution targets.
//!
//! A [`Target`] is the backend a run renders tasks against. The set is closed:
//! live apply against a cloud, dry-run planning, and infrastructure-as-code
//! export. Every variant walks the same wave plan, so a plan or an exported
//! document lists objects in the order a live run would touch them.
//!
//! Render logic is not a method of the task. It lives in [`Render`]
//! implementations registered in a [`RenderTable`] under a (task kind, target
//! kind) pair, and the table is checked against the task map before anything
//! runs.

mod context;
mod dryrun;
mod export;
mod live;
mod poll;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::changes::ChangeSet;
use crate::cloud::{Cloud, CloudResource};
use crate::execute::{GraphError, RunConfig, TaskAction, TaskError};
use crate::task::{Fields, Task, TaskMap};

pub use context::RunContext;
pub use dryrun::{DryRunTarget, Plan, PlanRender, PlannedChange, PlannedDeletion};
pub use export::{ExportRender, ExportTarget};
pub use live::{LiveRender, LiveTarget};
pub use poll::{PollConfig, Poller};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
  LiveApply,
  DryRun,
  CodeExport,
}

impl TargetKind {
  pub const ALL: [TargetKind; 3] = [TargetKind::LiveApply, TargetKind::DryRun, TargetKind::CodeExport];
}

impl fmt::Display for TargetKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      TargetKind::LiveApply => "live-apply",
      TargetKind::DryRun => "dry-run",
      TargetKind::CodeExport => "code-export",
    };
    f.write_str(s)
  }
}

/// Errors from backend-wide target steps.
#[derive(Debug, Error)]
pub enum TargetError {
  #[error(transparent)]
  Task(#[from] TaskError),

  #[error("failed to write {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to serialize export: {0}")]
  Serialize(#[from] serde_json::Error),
}

/// The backend of one run. Cheap to clone; clones share recorded state.
#[derive(Debug, Clone)]
pub enum Target {
  LiveApply(LiveTarget),
  DryRun(DryRunTarget),
  CodeExport(ExportTarget),
}

impl Target {
  pub fn live(cloud: impl Cloud + 'static) -> Self {
    Target::LiveApply(LiveTarget::new(Arc::new(cloud)))
  }

  /// A dry run; with a cloud it diffs against observed state, without one
  /// every task plans as a create.
  pub fn dry_run(cloud: Option<Arc<dyn Cloud>>) -> Self {
    Target::DryRun(DryRunTarget::new(cloud))
  }

  pub fn export(cluster: impl Into<String>, out_dir: impl Into<PathBuf>) -> Self {
    Target::CodeExport(ExportTarget::new(cluster, out_dir))
  }

  pub fn kind(&self) -> TargetKind {
    match self {
      Target::LiveApply(_) => TargetKind::LiveApply,
      Target::DryRun(_) => TargetKind::DryRun,
      Target::CodeExport(_) => TargetKind::CodeExport,
    }
  }

  /// The cloud tasks observe state through, if any.
  pub fn cloud(&self) -> Option<&Arc<dyn Cloud>> {
    match self {
      Target::LiveApply(t) => Some(t.cloud()),
      Target::DryRun(t) => t.cloud(),
      Target::CodeExport(t) => t.cloud(),
    }
  }

  /// Whether tasks can observe actual state on this target.
  pub fn observes(&self) -> bool {
    self.cloud().is_some()
  }

  /// Whether this run should also remove owned objects that are no longer declared.
  pub fn process_deletions(&self) -> bool {
    match self {
      Target::LiveApply(_) => true,
      Target::DryRun(_) => true,
      Target::CodeExport(t) => t.includes_deletions(),
    }
  }

  /// Target-specific checks on the task map, made before anything runs.
  ///
  /// # Errors
  ///
  /// Export fails with [`GraphError::AddressCollision`] when two tasks would
  /// share one address in the written document.
  pub fn validate(&self, tasks: &TaskMap) -> Result<(), GraphError> {
    match self {
      Target::CodeExport(_) => export::check_addresses(tasks),
      Target::LiveApply(_) | Target::DryRun(_) => Ok(()),
    }
  }

  /// Remove (or record the removal of) one orphaned object.
  pub async fn delete(&self, orphan: &CloudResource, wave: usize, ctx: &RunContext) -> Result<(), TaskError> {
    match self {
      Target::LiveApply(t) => t.delete(orphan, ctx).await,
      Target::DryRun(t) => {
        t.record_deletion(orphan, wave);
        Ok(())
      }
      Target::CodeExport(t) => {
        t.record_deletion(orphan, wave);
        Ok(())
      }
    }
  }

  /// Backend-wide bookkeeping after every task succeeded.
  pub async fn finish(&self, tasks: &TaskMap, config: &RunConfig) -> Result<(), TargetError> {
    match self {
      Target::LiveApply(t) => t.finish(tasks, config).await,
      Target::DryRun(_) => Ok(()),
      Target::CodeExport(t) => t.finish(),
    }
  }

  pub fn as_dry_run(&self) -> Option<&DryRunTarget> {
    match self {
      Target::DryRun(t) => Some(t),
      _ => None,
    }
  }

  pub fn as_export(&self) -> Option<&ExportTarget> {
    match self {
      Target::CodeExport(t) => Some(t),
      _ => None,
    }
  }
}

/// Everything a renderer needs about one task at the moment it renders.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
  pub task: &'a dyn Task,
  /// Observed state from `find`, `None` if the object does not exist.
  pub actual: Option<&'a Fields>,
  /// Desired fields with references resolved to cloud keys.
  pub resolved: &'a Fields,
  pub changes: &'a ChangeSet,
  pub wave: usize,
}

/// The render step of one task kind on one target kind.
///
/// Implementations compare desired and observed state and perform the
/// minimal action; rendering an unchanged object must do nothing.
#[async_trait]
pub trait Render: Send + Sync {
  async fn render(&self, req: RenderRequest<'_>, ctx: &RunContext) -> Result<TaskAction, TaskError>;
}

/// Dispatch table from (task kind, target kind) to a renderer.
#[derive(Default, Clone)]
pub struct RenderTable {
  renderers: HashMap<(String, TargetKind), Arc<dyn Render>>,
}

impl fmt::Debug for RenderTable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut keys: Vec<_> = self.renderers.keys().collect();
    keys.sort();
    f.debug_struct("RenderTable").field("renderers", &keys).finish()
  }
}

impl RenderTable {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&mut self, kind: impl Into<String>, target: TargetKind, renderer: Arc<dyn Render>) -> &mut Self {
    self.renderers.insert((kind.into(), target), renderer);
    self
  }

  /// Register the stock live, plan and export renderers for a kind.
  pub fn register_generic(&mut self, kind: &str) -> &mut Self {
    self
      .register(kind, TargetKind::LiveApply, Arc::new(LiveRender))
      .register(kind, TargetKind::DryRun, Arc::new(PlanRender))
      .register(kind, TargetKind::CodeExport, Arc::new(ExportRender))
  }

  /// A table with the stock renderers for every given kind.
  pub fn standard<'a>(kinds: impl IntoIterator<Item = &'a str>) -> Self {
    let mut table = Self::new();
    for kind in kinds {
      table.register_generic(kind);
    }
    table
  }

  pub fn lookup(&self, kind: &str, target: TargetKind) -> Option<&Arc<dyn Render>> {
    self.renderers.get(&(kind.to_string(), target))
  }

  /// Fail if any task has no renderer for `target`. Tasks are checked in name order.
  pub fn check(&self, tasks: &TaskMap, target: TargetKind) -> Result<(), GraphError> {
    for (name, task) in tasks.iter() {
      if self.lookup(task.kind(), target).is_none() {
        return Err(GraphError::MissingRenderer {
          task: name.to_string(),
          kind: task.kind().to_string(),
          target,
        });
      }
    }
    Ok(())
  }
}

//! One reconciliation run: graph, execution, deletions, finish.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use super::cancel::CancelToken;
use super::dag::{ExecutionPlan, TaskGraph};
use super::delete::execute_deletions;
use super::execute_plan;
use super::report::{FinishOutcome, RunReport};
use super::types::{GraphError, RunConfig};
use crate::target::{RenderTable, RunContext, Target};
use crate::task::TaskMap;

/// Drives a task map to its desired state on one target.
///
/// ```ignore
/// let report = Reconciler::new(config).run(tasks, Target::live(cloud)).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
  config: RunConfig,
  renderers: Option<Arc<RenderTable>>,
  cancel: CancelToken,
}

impl Reconciler {
  pub fn new(config: RunConfig) -> Self {
    Self {
      config,
      renderers: None,
      cancel: CancelToken::new(),
    }
  }

  /// Use `renderers` instead of the stock renderers for every task kind.
  pub fn with_renderers(mut self, renderers: RenderTable) -> Self {
    self.renderers = Some(Arc::new(renderers));
    self
  }

  pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn config(&self) -> &RunConfig {
    &self.config
  }

  pub fn cancel_token(&self) -> &CancelToken {
    &self.cancel
  }

  /// Validate the task map and compute its execution waves without running anything.
  pub fn plan(&self, tasks: &TaskMap) -> Result<ExecutionPlan, GraphError> {
    Ok(TaskGraph::build(tasks)?.plan())
  }

  /// Reconcile `tasks` against `target`.
  ///
  /// # Errors
  ///
  /// Only structural problems (cycles, dangling references, ambiguous
  /// ownership, missing renderers, colliding export addresses) fail the call; nothing has been touched
  /// when they do. Task and deletion failures are recorded in the report,
  /// and [`RunReport::into_result`] turns them into an error.
  pub async fn run(&self, tasks: impl Into<Arc<TaskMap>>, target: Target) -> Result<RunReport, GraphError> {
    let tasks: Arc<TaskMap> = tasks.into();
    let started = Instant::now();

    let graph = TaskGraph::build(&tasks)?;
    let renderers = match &self.renderers {
      Some(table) => table.clone(),
      None => {
        let kinds: Vec<String> = tasks.iter().map(|(_, t)| t.kind().to_string()).collect();
        Arc::new(RenderTable::standard(kinds.iter().map(String::as_str)))
      }
    };
    renderers.check(&tasks, target.kind())?;
    target.validate(&tasks)?;

    let plan = graph.plan();
    let ctx = RunContext::new(
      target.clone(),
      tasks.clone(),
      renderers,
      Arc::new(self.config.clone()),
      self.cancel.clone(),
    );

    let mut report = execute_plan(&ctx, &graph, &plan).await;

    let deletions = self.config.process_deletions.unwrap_or_else(|| target.process_deletions());
    if deletions {
      if report.tasks_succeeded() {
        execute_deletions(&ctx, &mut report).await;
      } else {
        warn!("tasks did not all succeed, skipping deletions");
        report
          .warnings
          .push("deletions skipped: not every task succeeded".to_string());
      }
    }

    if report.is_success() {
      report.finish = match target.finish(&tasks, &self.config).await {
        Ok(()) => FinishOutcome::Done,
        Err(e) => {
          warn!(error = %e, "finish failed");
          FinishOutcome::Failed(e.to_string())
        }
      };
    }

    let summary = report.summary();
    info!(
      target = %target.kind(),
      created = summary.created,
      updated = summary.updated,
      unchanged = summary.unchanged,
      deleted = summary.deleted,
      failed = summary.failed,
      elapsed_ms = started.elapsed().as_millis() as u64,
      "reconciliation complete"
    );

    Ok(report)
  }
}

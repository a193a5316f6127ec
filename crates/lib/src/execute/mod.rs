//! Parallel task execution.
//!
//! Every task is spawned onto one [`JoinSet`] the moment all of its
//! dependencies are done; a shared semaphore caps how many of them talk to the
//! backend at once. A failed task never aborts its siblings, it only keeps its
//! own dependents from running.
//!
//! # Task lifecycle
//!
//! For each task the executor:
//! 1. Observes actual state through [`Task::find`]
//! 2. Resolves references in the desired fields against the task map
//! 3. Diffs desired against actual into a [`ChangeSet`]
//! 4. Applies the task's lifecycle policy
//! 5. Hands the result to the renderer registered for `(kind, target)`
//!
//! [`Task::find`]: crate::task::Task::find

mod cancel;
pub mod dag;
mod delete;
mod reconcile;
pub mod report;
pub mod types;

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::changes::ChangeSet;
use crate::lifecycle::{Decision, authorize};
use crate::target::{RenderRequest, RunContext, TargetKind};
use crate::task::Task;

pub use cancel::CancelToken;
pub use dag::{ExecutionPlan, TaskGraph, deletion_waves};
pub(crate) use delete::execute_deletions;
pub use reconcile::Reconciler;
pub use report::{DeletionReport, FinishOutcome, RunReport, Summary, TaskAction, TaskReport, TaskState};
pub use types::{EngineError, GraphError, RunConfig, TaskError};

/// How one spawned task ended.
#[derive(Debug)]
enum Outcome {
  Done { action: TaskAction, warnings: Vec<String> },
  Failed { error: TaskError, warnings: Vec<String> },
  Cancelled,
}

/// Where a pending task stands with respect to its dependencies.
#[derive(Debug)]
enum Dependencies {
  Done,
  Waiting,
  /// A dependency ended in a state other than `Done`.
  Unfinished(String, TaskState),
}

/// Run every task in `plan` against the context's target.
///
/// The plan fixes each task's wave in the report, but a task is spawned as
/// soon as its own dependencies are done, so a slow task only holds back the
/// tasks that depend on it. Never fails as a whole: per-task outcomes land in
/// the returned report.
///
/// # Arguments
///
/// * `ctx` - Target, task map, renderers and configuration for this run
/// * `graph` - The validated dependency graph the plan was derived from
/// * `plan` - Execution waves, in order
pub async fn execute_plan(ctx: &RunContext, graph: &TaskGraph, plan: &ExecutionPlan) -> RunReport {
  let mut report = RunReport::new(ctx.target().kind());
  for (wave_idx, wave) in plan.waves().iter().enumerate() {
    for name in wave {
      report.tasks.insert(name.clone(), TaskReport::pending(wave_idx));
    }
  }

  info!(
    tasks = plan.task_count(),
    waves = plan.waves().len(),
    target = %ctx.target().kind(),
    parallelism = ctx.config().parallelism,
    "starting task execution"
  );

  let semaphore = Arc::new(Semaphore::new(ctx.config().parallelism.max(1)));
  // Plan order puts every task after its dependencies, so one sweep settles
  // a whole chain of blocked dependents.
  let order: Vec<&String> = plan.waves().iter().flatten().collect();
  let mut join_set = JoinSet::new();

  loop {
    schedule(&order, graph, ctx, &semaphore, &mut join_set, &mut report);

    match join_set.join_next().await {
      Some(Ok((name, outcome))) => record(&name, outcome, &mut report),
      Some(Err(e)) => error!(error = %e, "task worker panicked"),
      None => {
        if !fail_lost_workers(&mut report) {
          break;
        }
      }
    }
  }

  report.cancelled = report.tasks.values().any(|r| r.state == TaskState::Cancelled);

  let summary = report.summary();
  info!(
    done = summary.done,
    failed = summary.failed,
    blocked = summary.blocked,
    cancelled = summary.cancelled,
    "task execution complete"
  );

  report
}

/// Spawn every pending task whose dependencies are all done, and settle the
/// ones that can no longer run.
fn schedule(
  order: &[&String],
  graph: &TaskGraph,
  ctx: &RunContext,
  semaphore: &Arc<Semaphore>,
  join_set: &mut JoinSet<(String, Outcome)>,
  report: &mut RunReport,
) {
  for &name in order {
    if report.state(name) != Some(TaskState::Pending) {
      continue;
    }

    match dependency_status(graph, report, name) {
      Dependencies::Waiting => {}
      Dependencies::Unfinished(dep, dep_state) => {
        let state = if dep_state == TaskState::Cancelled {
          TaskState::Cancelled
        } else {
          TaskState::Blocked
        };
        warn!(task = %name, dependency = %dep, dependency_state = %dep_state, "skipping task");
        if let Some(entry) = report.tasks.get_mut(name) {
          entry.state = state;
          entry.blocked_by = Some(dep);
        }
      }
      Dependencies::Done if ctx.is_cancelled() => {
        info!(task = %name, "run cancelled, not starting task");
        if let Some(entry) = report.tasks.get_mut(name) {
          entry.state = TaskState::Cancelled;
        }
      }
      Dependencies::Done => spawn_task(name, ctx, semaphore, join_set, report),
    }
  }
}

/// Classify the dependencies of `name`. A failed or blocked dependency wins
/// over one still running, and both win over a cancelled one, so a real
/// fault is reported as the cause.
fn dependency_status(graph: &TaskGraph, report: &RunReport, name: &str) -> Dependencies {
  let mut waiting = false;
  let mut cancelled = None;
  for dep in graph.dependencies(name) {
    match report.state(&dep) {
      Some(TaskState::Done) => {}
      Some(TaskState::Pending | TaskState::Ready | TaskState::Running) => waiting = true,
      Some(TaskState::Cancelled) => {
        cancelled.get_or_insert(dep);
      }
      Some(state) => return Dependencies::Unfinished(dep, state),
      None => return Dependencies::Unfinished(dep, TaskState::Blocked),
    }
  }

  match cancelled {
    _ if waiting => Dependencies::Waiting,
    Some(dep) => Dependencies::Unfinished(dep, TaskState::Cancelled),
    None => Dependencies::Done,
  }
}

fn spawn_task(
  name: &str,
  ctx: &RunContext,
  semaphore: &Arc<Semaphore>,
  join_set: &mut JoinSet<(String, Outcome)>,
  report: &mut RunReport,
) {
  let Some(task) = ctx.tasks().get(name).cloned() else {
    return;
  };
  let Some(entry) = report.tasks.get_mut(name) else {
    return;
  };
  entry.state = TaskState::Running;
  let wave = entry.wave;

  let name = name.to_string();
  let ctx = ctx.clone();
  let semaphore = semaphore.clone();

  join_set.spawn(async move {
    // Acquire semaphore permit inside the task
    let Ok(_permit) = semaphore.acquire().await else {
      return (name, Outcome::Cancelled);
    };
    if ctx.is_cancelled() {
      return (name, Outcome::Cancelled);
    }

    debug!(task = %name, kind = task.kind(), wave, "running task");
    let outcome = match run_task(task.as_ref(), wave, &ctx).await {
      Ok((action, warnings)) => Outcome::Done { action, warnings },
      Err((error, warnings)) => Outcome::Failed { error, warnings },
    };
    (name, outcome)
  });
}

/// Fold one finished worker into `report`.
fn record(name: &str, outcome: Outcome, report: &mut RunReport) {
  let Some(entry) = report.tasks.get_mut(name) else {
    return;
  };

  match outcome {
    Outcome::Done { action, warnings } => {
      info!(task = %name, ?action, "task done");
      entry.state = TaskState::Done;
      entry.action = action;
      entry.warnings = warnings;
    }
    Outcome::Failed {
      error: error @ TaskError::Cancelled { .. },
      warnings,
    } => {
      info!(task = %name, error = %error, "task interrupted by cancellation");
      entry.state = TaskState::Cancelled;
      entry.error = Some(error);
      entry.warnings = warnings;
    }
    Outcome::Failed { error, warnings } => {
      error!(task = %name, error = %error, "task failed");
      entry.state = TaskState::Failed;
      entry.error = Some(error);
      entry.warnings = warnings;
    }
    Outcome::Cancelled => {
      info!(task = %name, "task cancelled before start");
      entry.state = TaskState::Cancelled;
    }
  }
}

/// A worker that panicked never reported back; fail whatever is still
/// marked running. Returns whether anything changed.
fn fail_lost_workers(report: &mut RunReport) -> bool {
  let mut changed = false;
  for (name, entry) in report.tasks.iter_mut() {
    if entry.state == TaskState::Running {
      entry.state = TaskState::Failed;
      entry.error = Some(TaskError::Panicked { task: name.clone() });
      changed = true;
    }
  }
  changed
}

/// Observe, diff, gate and render a single task.
///
/// # Returns
///
/// The render action and any warnings, or the error with the warnings
/// collected before it.
async fn run_task(
  task: &dyn Task,
  wave: usize,
  ctx: &RunContext,
) -> Result<(TaskAction, Vec<String>), (TaskError, Vec<String>)> {
  let name = task.name();
  let lifecycle = task.lifecycle();
  let target = ctx.target().kind();
  let mut warnings = Vec::new();

  let actual = match task.find(ctx).await {
    Ok(actual) => actual,
    Err(TaskError::AccessDenied { message, .. }) if lifecycle.tolerates_access_denied() => {
      warn!(task = name, %message, "insufficient access, skipping");
      warnings.push(format!("insufficient access: {message}"));
      return Ok((TaskAction::None, warnings));
    }
    Err(e) => return Err((e, warnings)),
  };

  let resolved = match ctx.tasks().resolve_fields(task.desired()) {
    Ok(resolved) => resolved,
    Err(dangling) => {
      let error = TaskError::structural(name, format!("unresolved reference {dangling}"));
      return Err((error, warnings));
    }
  };
  let changes = ChangeSet::compute(&resolved, actual.as_ref());

  // Export still emits read-only objects (as data sources), so only a
  // rejection stops it there.
  let renders_regardless = target == TargetKind::CodeExport;

  if ctx.target().observes() {
    match authorize(lifecycle, actual.is_some(), &changes) {
      Decision::Render => {}
      Decision::Unchanged => {
        if !renders_regardless {
          debug!(task = name, %lifecycle, "validated");
          return Ok((TaskAction::None, warnings));
        }
      }
      Decision::Warn(message) => {
        warn!(task = name, %lifecycle, %message, "observed state differs");
        warnings.push(message);
        if !renders_regardless {
          return Ok((TaskAction::None, warnings));
        }
      }
      Decision::Reject(message) => {
        let error = TaskError::LifecycleViolation {
          task: name.to_string(),
          lifecycle,
          message,
        };
        return Err((error, warnings));
      }
    }
  } else if !lifecycle.permits_mutation() && !renders_regardless {
    warnings.push(format!("{lifecycle} not checked: target has no state source"));
    return Ok((TaskAction::None, warnings));
  }

  let Some(renderer) = ctx.renderers().lookup(task.kind(), target) else {
    let error = TaskError::structural(name, format!("no renderer for kind {} on {target}", task.kind()));
    return Err((error, warnings));
  };

  let request = RenderRequest {
    task,
    actual: actual.as_ref(),
    resolved: &resolved,
    changes: &changes,
    wave,
  };

  match renderer.render(request, ctx).await {
    Ok(action) => Ok((action, warnings)),
    Err(TaskError::AccessDenied { message, .. }) if lifecycle.tolerates_access_denied() => {
      warn!(task = name, %message, "insufficient access, skipping");
      warnings.push(format!("insufficient access: {message}"));
      Ok((TaskAction::None, warnings))
    }
    Err(e) => Err((e, warnings)),
  }
}

//! Removal of owned objects that are no longer declared.
//!
//! Orphans are deleted in reverse dependency order: an object goes only after
//! every orphan that depends on it is gone.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::dag::deletion_waves;
use super::report::{DeletionReport, RunReport, TaskState};
use super::types::TaskError;
use crate::cloud::{CloudResource, ResourceId};
use crate::retry::with_retry;
use crate::target::RunContext;

/// Find owned-but-undeclared objects and delete them through the target.
///
/// Refuses to prune when there is no state source or no owner tags, since
/// ownership could not be established.
pub(crate) async fn execute_deletions(ctx: &RunContext, report: &mut RunReport) {
  let Some(cloud) = ctx.cloud() else {
    warn!("no state source, skipping deletions");
    report.warnings.push("deletions skipped: target has no state source".to_string());
    return;
  };
  let owner_tags = &ctx.config().owner_tags;
  if owner_tags.is_empty() {
    warn!("no owner tags configured, refusing to delete");
    report.warnings.push("deletions skipped: no owner tags configured".to_string());
    return;
  }

  let owned = match with_retry(&ctx.config().retry, "deletion scan", || cloud.list_owned(owner_tags)).await {
    Ok(owned) => owned,
    Err(e) => {
      error!(error = %e, "listing owned objects failed");
      report.deletion_error = Some(e.to_string());
      return;
    }
  };

  let declared: HashSet<ResourceId> = ctx
    .tasks()
    .iter()
    .map(|(name, task)| ResourceId::new(task.kind(), task.cloud_key().unwrap_or(name)))
    .collect();
  let orphans: Vec<CloudResource> = owned.into_iter().filter(|r| !declared.contains(&r.id())).collect();
  if orphans.is_empty() {
    debug!("no orphaned objects");
    return;
  }

  let orphan_ids: HashSet<ResourceId> = orphans.iter().map(CloudResource::id).collect();
  let mut dependents: HashMap<ResourceId, Vec<ResourceId>> = HashMap::new();
  for orphan in &orphans {
    for dep in orphan.depends_on.iter().filter(|d| orphan_ids.contains(d)) {
      dependents.entry(dep.clone()).or_default().push(orphan.id());
    }
  }

  let waves = deletion_waves(&orphans);
  info!(orphans = orphans.len(), waves = waves.len(), "deleting orphaned objects");

  for (wave_idx, wave) in waves.iter().enumerate() {
    for orphan in wave {
      report.deletions.insert(
        orphan.id().to_string(),
        DeletionReport {
          kind: orphan.kind.clone(),
          key: orphan.key.clone(),
          state: TaskState::Pending,
          wave: wave_idx,
          error: None,
          blocked_by: None,
        },
      );
    }
  }

  let semaphore = Arc::new(Semaphore::new(ctx.config().parallelism.max(1)));

  for (wave_idx, wave) in waves.into_iter().enumerate() {
    let mut join_set = JoinSet::new();

    for orphan in wave {
      let id = orphan.id().to_string();

      if ctx.is_cancelled() {
        set_state(report, &id, TaskState::Cancelled, None, None);
        continue;
      }

      let blocker = dependents.get(&orphan.id()).and_then(|ds| {
        ds.iter()
          .map(ToString::to_string)
          .find(|d| report.deletions.get(d).is_none_or(|r| r.state != TaskState::Done))
      });
      if let Some(blocker) = blocker {
        warn!(resource = %id, dependent = %blocker, "not deleting, dependent still present");
        set_state(report, &id, TaskState::Blocked, None, Some(blocker));
        continue;
      }

      set_state(report, &id, TaskState::Running, None, None);
      let ctx = ctx.clone();
      let semaphore = semaphore.clone();
      join_set.spawn(async move {
        let Ok(_permit) = semaphore.acquire().await else {
          return (id, None);
        };
        if ctx.is_cancelled() {
          return (id, None);
        }
        let result = ctx.target().delete(&orphan, wave_idx, &ctx).await;
        (id, Some(result))
      });
    }

    while let Some(joined) = join_set.join_next().await {
      let (id, result) = match joined {
        Ok(done) => done,
        Err(e) => {
          error!(error = %e, "deletion worker panicked");
          continue;
        }
      };
      match result {
        Some(Ok(())) => {
          info!(resource = %id, "deleted");
          report.deletion_order.push(id.clone());
          set_state(report, &id, TaskState::Done, None, None);
        }
        Some(Err(e)) => {
          error!(resource = %id, error = %e, "deletion failed");
          set_state(report, &id, TaskState::Failed, Some(e), None);
        }
        None => set_state(report, &id, TaskState::Cancelled, None, None),
      }
    }

    let stuck: Vec<String> = report
      .deletions
      .iter()
      .filter(|(_, d)| d.wave == wave_idx && d.state == TaskState::Running)
      .map(|(id, _)| id.clone())
      .collect();
    for id in stuck {
      let error = TaskError::Panicked { task: id.clone() };
      set_state(report, &id, TaskState::Failed, Some(error), None);
    }
  }

  if report.deletions.values().any(|d| d.state == TaskState::Cancelled) {
    report.cancelled = true;
  }
}

fn set_state(report: &mut RunReport, id: &str, state: TaskState, error: Option<TaskError>, blocked_by: Option<String>) {
  if let Some(entry) = report.deletions.get_mut(id) {
    entry.state = state;
    entry.error = error;
    entry.blocked_by = blocked_by;
  }
}

//! Live apply against a cloud API.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{Render, RenderRequest, RunContext, TargetError};
use crate::cloud::{Cloud, CloudError, CloudResource, Tags};
use crate::execute::{RunConfig, TaskAction, TaskError};
use crate::retry::with_retry;
use crate::task::{Readiness, Task, TaskMap, Value};

/// Applies tasks by calling the cloud for real.
#[derive(Debug, Clone)]
pub struct LiveTarget {
  cloud: Arc<dyn Cloud>,
}

impl LiveTarget {
  pub fn new(cloud: Arc<dyn Cloud>) -> Self {
    Self { cloud }
  }

  pub fn cloud(&self) -> &Arc<dyn Cloud> {
    &self.cloud
  }

  pub(super) async fn delete(&self, orphan: &CloudResource, ctx: &RunContext) -> Result<(), TaskError> {
    let label = orphan.id().to_string();
    let result = with_retry(&ctx.config().retry, &label, || self.cloud.delete(&orphan.kind, &orphan.key)).await;

    match result {
      Ok(()) => {
        info!(resource = %label, "deleted");
        Ok(())
      }
      // Already gone; somebody else got there first.
      Err(TaskError::Cloud {
        source: CloudError::NotFound { .. },
        ..
      }) => {
        debug!(resource = %label, "already deleted");
        Ok(())
      }
      Err(e) => Err(e),
    }
  }

  /// Make sure every declared object carries the ownership tags.
  ///
  /// Reads the tags already present and only adds the ones that are missing
  /// or differ, so an already-tagged cluster causes no writes.
  pub(super) async fn finish(&self, tasks: &TaskMap, config: &RunConfig) -> Result<(), TargetError> {
    if config.owner_tags.is_empty() {
      return Ok(());
    }

    for (name, task) in tasks.iter() {
      if !task.lifecycle().permits_mutation() {
        continue;
      }
      let key = task.cloud_key().unwrap_or(name);

      let existing = match with_retry(&config.retry, name, || self.cloud.tags(task.kind(), key)).await {
        Ok(tags) => tags,
        Err(TaskError::Cloud {
          source: CloudError::NotFound { .. },
          ..
        }) => {
          warn!(task = name, key, "object not found while tagging");
          continue;
        }
        Err(e) => return Err(e.into()),
      };

      let missing: Tags = config
        .owner_tags
        .iter()
        .filter(|(k, v)| existing.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
      if missing.is_empty() {
        continue;
      }

      debug!(task = name, key, tags = missing.len(), "adding ownership tags");
      with_retry(&config.retry, name, || self.cloud.add_tags(task.kind(), key, &missing)).await?;
    }

    Ok(())
  }
}

/// Stock live renderer: create when absent, update changed fields, else nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveRender;

#[async_trait]
impl Render for LiveRender {
  async fn render(&self, req: RenderRequest<'_>, ctx: &RunContext) -> Result<TaskAction, TaskError> {
    let task = req.task;
    let Some(cloud) = ctx.cloud() else {
      return Err(TaskError::structural(task.name(), "live render without a cloud"));
    };
    let key = task.cloud_key().unwrap_or(task.name());
    let retry = &ctx.config().retry;

    if req.actual.is_none() {
      let mut resource =
        CloudResource::new(task.kind(), key, req.resolved.clone()).with_tags(ctx.config().owner_tags.clone());
      for dep in task.dependencies() {
        let id = ctx
          .resource_id(dep)
          .ok_or_else(|| TaskError::structural(task.name(), format!("missing dependency {}", dep)))?;
        resource = resource.with_dependency(id);
      }

      with_retry(retry, task.name(), || cloud.create(resource.clone())).await?;
      info!(task = task.name(), kind = task.kind(), key, "created");

      if let Some(readiness) = task.readiness() {
        wait_ready(task, key, readiness, cloud, ctx).await?;
      }
      return Ok(TaskAction::Create);
    }

    if req.changes.is_empty() {
      debug!(task = task.name(), "up to date");
      return Ok(TaskAction::None);
    }

    let fields = req.changes.desired_values();
    with_retry(retry, task.name(), || cloud.update(task.kind(), key, &fields)).await?;
    info!(task = task.name(), kind = task.kind(), key, fields = ?req.changes.field_names(), "updated");
    Ok(TaskAction::Update)
  }
}

async fn wait_ready(
  task: &dyn Task,
  key: &str,
  readiness: &Readiness,
  cloud: &Arc<dyn Cloud>,
  ctx: &RunContext,
) -> Result<Value, TaskError> {
  let label = format!("{} {}", task.kind(), key);
  let retry = &ctx.config().retry;

  ctx
    .poller()
    .wait_for(
      &label,
      || async move {
        let found = with_retry(retry, task.name(), || cloud.describe(task.kind(), key)).await?;
        Ok(found.and_then(|r| r.fields.get(&readiness.field).cloned()))
      },
      |value| value == &readiness.value,
    )
    .await
}

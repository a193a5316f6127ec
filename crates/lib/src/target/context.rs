use std::sync::Arc;

use crate::cloud::{Cloud, ResourceId};
use crate::execute::{CancelToken, RunConfig};
use crate::task::{TaskMap, TaskRef};

use super::{Poller, RenderTable, Target};

/// Per-run state handed to every `find` and render call.
///
/// Replaces ambient globals: the target, the task map, the renderer table,
/// configuration and the cancellation signal all travel through here.
#[derive(Debug, Clone)]
pub struct RunContext {
  target: Target,
  tasks: Arc<TaskMap>,
  renderers: Arc<RenderTable>,
  config: Arc<RunConfig>,
  cancel: CancelToken,
}

impl RunContext {
  pub fn new(
    target: Target,
    tasks: Arc<TaskMap>,
    renderers: Arc<RenderTable>,
    config: Arc<RunConfig>,
    cancel: CancelToken,
  ) -> Self {
    Self {
      target,
      tasks,
      renderers,
      config,
      cancel,
    }
  }

  pub fn target(&self) -> &Target {
    &self.target
  }

  pub fn tasks(&self) -> &TaskMap {
    &self.tasks
  }

  pub fn renderers(&self) -> &RenderTable {
    &self.renderers
  }

  pub fn config(&self) -> &RunConfig {
    &self.config
  }

  pub fn cancel(&self) -> &CancelToken {
    &self.cancel
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }

  pub fn cloud(&self) -> Option<&Arc<dyn Cloud>> {
    self.target.cloud()
  }

  /// Cloud key of the task `reference` points at.
  pub fn resolve(&self, reference: &TaskRef) -> Option<String> {
    self.tasks.resolve(reference)
  }

  /// Cloud identity (kind and key) of the task `reference` points at.
  pub fn resource_id(&self, reference: &TaskRef) -> Option<ResourceId> {
    let task = self.tasks.get(reference.name())?;
    let key = task.cloud_key().unwrap_or(task.name());
    Some(ResourceId::new(task.kind(), key))
  }

  pub fn poller(&self) -> Poller {
    Poller::new(self.config.poll.clone()).with_cancel(self.cancel.clone())
  }
}

//! The stock [`Task`] implementation for a single cloud object.

use std::collections::BTreeSet;

use async_trait::async_trait;

use super::{Fields, Readiness, Task, TaskRef, Value, collect_references};
use crate::execute::TaskError;
use crate::lifecycle::Lifecycle;
use crate::retry::with_retry;
use crate::target::RunContext;

/// A declared cloud object: kind, identity, desired fields and policy.
///
/// Dependencies are derived from `fields` when the resource is constructed.
#[derive(Debug, Clone)]
pub struct Resource {
  kind: String,
  name: String,
  key: String,
  fields: Fields,
  lifecycle: Lifecycle,
  dependencies: BTreeSet<TaskRef>,
  readiness: Option<Readiness>,
}

impl Resource {
  /// Create a resource whose cloud key defaults to its task name.
  pub fn new(kind: impl Into<String>, name: impl Into<String>, fields: Fields) -> Self {
    let name = name.into();
    let dependencies = collect_references(&fields);
    Self {
      kind: kind.into(),
      key: name.clone(),
      name,
      fields,
      lifecycle: Lifecycle::Sync,
      dependencies,
      readiness: None,
    }
  }

  pub fn with_key(mut self, key: impl Into<String>) -> Self {
    self.key = key.into();
    self
  }

  pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
    self.lifecycle = lifecycle;
    self
  }

  /// After creation, a live backend waits until `field` reports `value`.
  pub fn ready_when(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
    self.readiness = Some(Readiness {
      field: field.into(),
      value: value.into(),
    });
    self
  }
}

#[async_trait]
impl Task for Resource {
  fn name(&self) -> &str {
    &self.name
  }

  fn kind(&self) -> &str {
    &self.kind
  }

  fn lifecycle(&self) -> Lifecycle {
    self.lifecycle
  }

  fn cloud_key(&self) -> Option<&str> {
    Some(&self.key)
  }

  fn desired(&self) -> &Fields {
    &self.fields
  }

  fn dependencies(&self) -> &BTreeSet<TaskRef> {
    &self.dependencies
  }

  fn readiness(&self) -> Option<&Readiness> {
    self.readiness.as_ref()
  }

  async fn find(&self, ctx: &RunContext) -> Result<Option<Fields>, TaskError> {
    // Export without a state source renders everything as new.
    let Some(cloud) = ctx.cloud() else {
      return Ok(None);
    };

    let found = with_retry(&ctx.config().retry, &self.name, || cloud.describe(&self.kind, &self.key)).await?;
    Ok(found.map(|resource| resource.fields))
  }
}

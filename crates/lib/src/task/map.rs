//! Name-keyed registry of tasks for one run.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use super::{Fields, Task, TaskRef, Value};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskMapError {
  /// A second task was registered under a name already in use.
  #[error("duplicate task name: {0}")]
  Duplicate(String),
}

/// All tasks of a run, keyed by unique name.
///
/// The map is built up-front and handed to the reconciler; it is never
/// mutated while a run is in progress.
#[derive(Debug, Default, Clone)]
pub struct TaskMap {
  tasks: BTreeMap<String, Arc<dyn Task>>,
}

impl TaskMap {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a task. Fails if a task with the same name already exists.
  pub fn insert<T: Task + 'static>(&mut self, task: T) -> Result<(), TaskMapError> {
    self.insert_arc(Arc::new(task))
  }

  pub fn insert_arc(&mut self, task: Arc<dyn Task>) -> Result<(), TaskMapError> {
    let name = task.name().to_string();
    if self.tasks.contains_key(&name) {
      return Err(TaskMapError::Duplicate(name));
    }
    self.tasks.insert(name, task);
    Ok(())
  }

  pub fn get(&self, name: &str) -> Option<&Arc<dyn Task>> {
    self.tasks.get(name)
  }

  pub fn contains(&self, name: &str) -> bool {
    self.tasks.contains_key(name)
  }

  /// Tasks in name order.
  pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Task>)> {
    self.tasks.iter().map(|(k, v)| (k.as_str(), v))
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.tasks.keys().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.tasks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tasks.is_empty()
  }

  /// Cloud identity of the task a reference points at.
  ///
  /// A task without an explicit key is identified by its name.
  pub fn resolve(&self, reference: &TaskRef) -> Option<String> {
    self
      .tasks
      .get(reference.name())
      .map(|task| task.cloud_key().unwrap_or(task.name()).to_string())
  }

  /// Replace every reference in a payload with the referenced object's cloud key.
  ///
  /// Returns the first reference that does not name a task in this map.
  pub fn resolve_fields(&self, fields: &Fields) -> Result<Fields, TaskRef> {
    fields
      .iter()
      .map(|(k, v)| Ok((k.clone(), self.resolve_value(v)?)))
      .collect()
  }

  fn resolve_value(&self, value: &Value) -> Result<Value, TaskRef> {
    match value {
      Value::Ref(r) => self.resolve(r).map(Value::String).ok_or_else(|| r.clone()),
      Value::Array(items) => items
        .iter()
        .map(|v| self.resolve_value(v))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array),
      Value::Table(map) => map
        .iter()
        .map(|(k, v)| Ok((k.clone(), self.resolve_value(v)?)))
        .collect::<Result<BTreeMap<_, _>, _>>()
        .map(Value::Table),
      other => Ok(other.clone()),
    }
  }
}

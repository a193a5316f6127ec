//! Task model.
//!
//! A task is the declared desired state of one infrastructure object. Its
//! payload is a tree of [`Value`]s, and any [`Value::Ref`] found anywhere in
//! that tree names another task of the same [`TaskMap`]. Those references are
//! the only source of ordering: a task that holds a reference to another one
//! is run after it, without anyone registering the edge by hand.

mod map;
mod resource;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::execute::TaskError;
use crate::lifecycle::Lifecycle;
use crate::target::RunContext;

pub use map::{TaskMap, TaskMapError};
pub use resource::Resource;

/// Desired or observed attributes of an object, keyed by field name.
pub type Fields = BTreeMap<String, Value>;

/// A reference from one task's payload to another task, by name.
///
/// Serialized as `{"$ref": "<task name>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskRef {
  #[serde(rename = "$ref")]
  name: String,
}

impl TaskRef {
  pub fn new(name: impl Into<String>) -> Self {
    Self { name: name.into() }
  }

  pub fn name(&self) -> &str {
    &self.name
  }
}

impl fmt::Display for TaskRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.name)
  }
}

/// A single value of a task payload.
///
/// Observed state reported by a cloud never contains [`Value::Ref`]; references
/// are resolved to the referenced object's cloud key before they reach a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
  Bool(bool),
  Number(f64),
  String(String),
  Array(Vec<Value>),
  Ref(TaskRef),
  Table(BTreeMap<String, Value>),
}

impl Value {
  pub fn reference(name: impl Into<String>) -> Self {
    Value::Ref(TaskRef::new(name))
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::String(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_task_ref(&self) -> Option<&TaskRef> {
    match self {
      Value::Ref(r) => Some(r),
      _ => None,
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Bool(b) => write!(f, "{}", b),
      Value::Number(n) => write!(f, "{}", n),
      Value::String(s) => write!(f, "{:?}", s),
      Value::Ref(r) => write!(f, "ref({})", r),
      Value::Array(items) => {
        write!(f, "[")?;
        for (i, item) in items.iter().enumerate() {
          if i > 0 {
            write!(f, ", ")?;
          }
          write!(f, "{}", item)?;
        }
        write!(f, "]")
      }
      Value::Table(map) => {
        write!(f, "{{")?;
        for (i, (k, v)) in map.iter().enumerate() {
          if i > 0 {
            write!(f, ", ")?;
          }
          write!(f, "{} = {}", k, v)?;
        }
        write!(f, "}}")
      }
    }
  }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self {
    Value::String(s.to_string())
  }
}

impl From<String> for Value {
  fn from(s: String) -> Self {
    Value::String(s)
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self {
    Value::Bool(b)
  }
}

impl From<f64> for Value {
  fn from(n: f64) -> Self {
    Value::Number(n)
  }
}

impl From<TaskRef> for Value {
  fn from(r: TaskRef) -> Self {
    Value::Ref(r)
  }
}

/// A field a live backend waits on after creating an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Readiness {
  pub field: String,
  pub value: Value,
}

/// A unit of desired state for one infrastructure object.
///
/// `find` reports the observed state of the object through the backend the
/// run context carries; `Ok(None)` means the object does not exist yet and is
/// not an error. Rendering is not a method here: it is dispatched through the
/// run's [`RenderTable`](crate::target::RenderTable) by task kind and target kind.
#[async_trait]
pub trait Task: Send + Sync + fmt::Debug {
  /// Unique name of the task within its [`TaskMap`].
  fn name(&self) -> &str;

  /// Resource kind, used to pick a renderer (e.g. `network`, `subnet`).
  fn kind(&self) -> &str;

  fn lifecycle(&self) -> Lifecycle {
    Lifecycle::Sync
  }

  /// Identity of the object in the cloud. Two tasks of the same kind must never
  /// share a key.
  fn cloud_key(&self) -> Option<&str> {
    None
  }

  /// The declared payload, references unresolved.
  fn desired(&self) -> &Fields;

  /// Tasks this task must run after. Computed once, from the payload.
  fn dependencies(&self) -> &BTreeSet<TaskRef>;

  fn readiness(&self) -> Option<&Readiness> {
    None
  }

  async fn find(&self, ctx: &RunContext) -> Result<Option<Fields>, TaskError>;
}

/// Collect every task reference held anywhere in a payload.
pub fn collect_references(fields: &Fields) -> BTreeSet<TaskRef> {
  let mut refs = BTreeSet::new();
  for value in fields.values() {
    collect_value(value, &mut refs);
  }
  refs
}

fn collect_value(value: &Value, refs: &mut BTreeSet<TaskRef>) {
  match value {
    Value::Ref(r) => {
      refs.insert(r.clone());
    }
    Value::Table(map) => {
      for v in map.values() {
        collect_value(v, refs);
      }
    }
    Value::Array(items) => {
      for v in items {
        collect_value(v, refs);
      }
    }
    Value::String(_) | Value::Number(_) | Value::Bool(_) => {}
  }
}

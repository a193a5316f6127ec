//! In-memory cloud backend.
//!
//! Keeps every object in a map, counts calls per operation, and can be told
//! to fail specific calls or to report a field in a transitional state for a
//! while after creation. Used as the test double for all engine tests and as
//! the store behind [`LocalCloud`](super::LocalCloud).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{Cloud, CloudError, CloudResource, ResourceId, Tags};
use crate::task::{Fields, Value};

const MUTATING_OPS: [&str; 4] = ["create", "update", "delete", "add_tags"];

#[derive(Debug)]
struct Fault {
  op: String,
  key: String,
  error: CloudError,
  remaining: u32,
}

#[derive(Debug)]
struct Transition {
  kind: String,
  field: String,
  initial: Value,
  eventual: Value,
  after_describes: u32,
}

#[derive(Debug)]
struct Pending {
  field: String,
  eventual: Value,
  remaining: u32,
}

#[derive(Debug, Default)]
struct State {
  resources: BTreeMap<ResourceId, CloudResource>,
  calls: HashMap<String, u32>,
  faults: Vec<Fault>,
  transitions: Vec<Transition>,
  pending: HashMap<ResourceId, Pending>,
  deleted: Vec<ResourceId>,
}

impl State {
  fn record(&mut self, op: &str, key: &str) -> Result<(), CloudError> {
    *self.calls.entry(op.to_string()).or_default() += 1;

    let fault = self
      .faults
      .iter_mut()
      .find(|f| f.op == op && (f.key == key || f.key == "*") && f.remaining > 0);
    match fault {
      Some(f) => {
        f.remaining = f.remaining.saturating_sub(1);
        Err(f.error.clone())
      }
      None => Ok(()),
    }
  }
}

/// A cloud that lives in process memory. Clones share the same state.
#[derive(Debug, Clone)]
pub struct MemoryCloud {
  provider: String,
  state: Arc<Mutex<State>>,
}

impl Default for MemoryCloud {
  fn default() -> Self {
    Self::new()
  }
}

impl MemoryCloud {
  pub fn new() -> Self {
    Self::with_provider("memory")
  }

  pub fn with_provider(provider: impl Into<String>) -> Self {
    Self {
      provider: provider.into(),
      state: Arc::new(Mutex::new(State::default())),
    }
  }

  fn lock(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Seed an object directly, bypassing call counters.
  pub fn insert(&self, resource: CloudResource) {
    self.lock().resources.insert(resource.id(), resource);
  }

  pub fn get(&self, kind: &str, key: &str) -> Option<CloudResource> {
    self.lock().resources.get(&ResourceId::new(kind, key)).cloned()
  }

  /// Every stored object, ordered by kind then key.
  pub fn resources(&self) -> Vec<CloudResource> {
    self.lock().resources.values().cloned().collect()
  }

  /// Make the next `times` calls of `op` on `key` fail with `error`.
  ///
  /// A key of `*` matches every key.
  pub fn fail_next(&self, op: &str, key: &str, error: CloudError, times: u32) {
    self.lock().faults.push(Fault {
      op: op.to_string(),
      key: key.to_string(),
      error,
      remaining: times,
    });
  }

  pub fn fail_always(&self, op: &str, key: &str, error: CloudError) {
    self.fail_next(op, key, error, u32::MAX);
  }

  /// Objects of `kind` report `field = initial` after creation, and switch to
  /// `eventual` once they have been described `after_describes` times.
  pub fn with_transition(
    self,
    kind: &str,
    field: &str,
    initial: impl Into<Value>,
    eventual: impl Into<Value>,
    after_describes: u32,
  ) -> Self {
    self.lock().transitions.push(Transition {
      kind: kind.to_string(),
      field: field.to_string(),
      initial: initial.into(),
      eventual: eventual.into(),
      after_describes,
    });
    self
  }

  /// Number of calls made to `op`, failed ones included.
  pub fn calls(&self, op: &str) -> u32 {
    self.lock().calls.get(op).copied().unwrap_or(0)
  }

  /// Total calls to operations that change backend state.
  pub fn mutations(&self) -> u32 {
    let state = self.lock();
    MUTATING_OPS.iter().filter_map(|op| state.calls.get(*op)).sum()
  }

  pub fn reset_calls(&self) {
    self.lock().calls.clear();
  }

  /// Objects deleted so far, in deletion order.
  pub fn deleted(&self) -> Vec<ResourceId> {
    self.lock().deleted.clone()
  }
}

#[async_trait]
impl Cloud for MemoryCloud {
  fn provider(&self) -> &str {
    &self.provider
  }

  async fn describe(&self, kind: &str, key: &str) -> Result<Option<CloudResource>, CloudError> {
    let mut state = self.lock();
    state.record("describe", key)?;

    let id = ResourceId::new(kind, key);
    let mut settled = None;
    if let Some(pending) = state.pending.get_mut(&id) {
      pending.remaining = pending.remaining.saturating_sub(1);
      if pending.remaining == 0 {
        settled = Some((pending.field.clone(), pending.eventual.clone()));
      }
    }
    if let Some((field, value)) = settled {
      state.pending.remove(&id);
      if let Some(resource) = state.resources.get_mut(&id) {
        resource.fields.insert(field, value);
      }
    }

    Ok(state.resources.get(&id).cloned())
  }

  async fn create(&self, mut resource: CloudResource) -> Result<(), CloudError> {
    let mut state = self.lock();
    state.record("create", &resource.key)?;

    let id = resource.id();
    if state.resources.contains_key(&id) {
      return Err(CloudError::Other(format!("{} already exists", id)));
    }

    let transition = state.transitions.iter().find(|t| t.kind == resource.kind);
    let pending = transition.map(|t| {
      resource.fields.insert(t.field.clone(), t.initial.clone());
      Pending {
        field: t.field.clone(),
        eventual: t.eventual.clone(),
        remaining: t.after_describes,
      }
    });
    if let Some(p) = pending {
      state.pending.insert(id.clone(), p);
    }

    state.resources.insert(id, resource);
    Ok(())
  }

  async fn update(&self, kind: &str, key: &str, fields: &Fields) -> Result<(), CloudError> {
    let mut state = self.lock();
    state.record("update", key)?;

    let resource = state
      .resources
      .get_mut(&ResourceId::new(kind, key))
      .ok_or_else(|| CloudError::not_found(kind, key))?;
    for (k, v) in fields {
      resource.fields.insert(k.clone(), v.clone());
    }
    Ok(())
  }

  async fn delete(&self, kind: &str, key: &str) -> Result<(), CloudError> {
    let mut state = self.lock();
    state.record("delete", key)?;

    let id = ResourceId::new(kind, key);
    if state.resources.remove(&id).is_none() {
      return Err(CloudError::not_found(kind, key));
    }
    state.pending.remove(&id);
    state.deleted.push(id);
    Ok(())
  }

  async fn list_owned(&self, owner: &Tags) -> Result<Vec<CloudResource>, CloudError> {
    let mut state = self.lock();
    state.record("list_owned", "*")?;

    Ok(state.resources.values().filter(|r| r.is_owned_by(owner)).cloned().collect())
  }

  async fn tags(&self, kind: &str, key: &str) -> Result<Tags, CloudError> {
    let mut state = self.lock();
    state.record("tags", key)?;

    state
      .resources
      .get(&ResourceId::new(kind, key))
      .map(|r| r.tags.clone())
      .ok_or_else(|| CloudError::not_found(kind, key))
  }

  async fn add_tags(&self, kind: &str, key: &str, tags: &Tags) -> Result<(), CloudError> {
    let mut state = self.lock();
    state.record("add_tags", key)?;

    let resource = state
      .resources
      .get_mut(&ResourceId::new(kind, key))
      .ok_or_else(|| CloudError::not_found(kind, key))?;
    resource.tags.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
    Ok(())
  }
}

//! Cloud backend contract.
//!
//! The engine itself never calls a cloud. Tasks call it from `find`, renderers
//! from their render step, and the live target from its finish and deletion
//! steps. Real provider SDK wrappers (AWS, GCE, bare metal, vSphere) implement
//! [`Cloud`]; this crate ships an in-memory backend and a file-backed one.

mod local;
mod memory;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::Fields;

pub use local::LocalCloud;
pub use memory::MemoryCloud;

/// Key/value tags attached to a cloud object.
pub type Tags = BTreeMap<String, String>;

/// Identity of a cloud object: its kind plus its key within that kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
  pub kind: String,
  pub key: String,
}

impl ResourceId {
  pub fn new(kind: impl Into<String>, key: impl Into<String>) -> Self {
    Self {
      kind: kind.into(),
      key: key.into(),
    }
  }
}

impl fmt::Display for ResourceId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.kind, self.key)
  }
}

/// An object as a backend stores and reports it.
///
/// `depends_on` records the objects it referenced when it was created, so an
/// orphan can still be deleted before the things it depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudResource {
  pub kind: String,
  pub key: String,
  #[serde(default)]
  pub fields: Fields,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub tags: Tags,
  #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
  pub depends_on: BTreeSet<ResourceId>,
}

impl CloudResource {
  pub fn new(kind: impl Into<String>, key: impl Into<String>, fields: Fields) -> Self {
    Self {
      kind: kind.into(),
      key: key.into(),
      fields,
      tags: Tags::new(),
      depends_on: BTreeSet::new(),
    }
  }

  pub fn with_tags(mut self, tags: Tags) -> Self {
    self.tags = tags;
    self
  }

  pub fn with_dependency(mut self, id: ResourceId) -> Self {
    self.depends_on.insert(id);
    self
  }

  pub fn id(&self) -> ResourceId {
    ResourceId::new(&self.kind, &self.key)
  }

  /// Whether every tag in `owner` is present with the same value.
  pub fn is_owned_by(&self, owner: &Tags) -> bool {
    owner.iter().all(|(k, v)| self.tags.get(k) == Some(v))
  }
}

/// Errors reported by a cloud backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CloudError {
  #[error("{kind} {key} not found")]
  NotFound { kind: String, key: String },

  /// Rate limited or eventually consistent; safe to retry.
  #[error("throttled: {0}")]
  Throttled(String),

  #[error("access denied: {0}")]
  AccessDenied(String),

  #[error("{0}")]
  Other(String),
}

impl CloudError {
  pub fn not_found(kind: &str, key: &str) -> Self {
    CloudError::NotFound {
      kind: kind.to_string(),
      key: key.to_string(),
    }
  }

  pub fn is_transient(&self) -> bool {
    matches!(self, CloudError::Throttled(_))
  }
}

/// A provider API as seen by tasks and targets.
///
/// `describe` returning `Ok(None)` means the object does not exist; that is
/// not an error.
#[async_trait]
pub trait Cloud: Send + Sync + fmt::Debug {
  /// Provider name, e.g. `aws`, `gce`, `baremetal`, `vsphere`.
  fn provider(&self) -> &str;

  async fn describe(&self, kind: &str, key: &str) -> Result<Option<CloudResource>, CloudError>;

  async fn create(&self, resource: CloudResource) -> Result<(), CloudError>;

  /// Overwrite the given fields of an existing object.
  async fn update(&self, kind: &str, key: &str, fields: &Fields) -> Result<(), CloudError>;

  async fn delete(&self, kind: &str, key: &str) -> Result<(), CloudError>;

  /// All objects carrying every tag in `owner`.
  async fn list_owned(&self, owner: &Tags) -> Result<Vec<CloudResource>, CloudError>;

  async fn tags(&self, kind: &str, key: &str) -> Result<Tags, CloudError>;

  /// Add or overwrite tags; tags not named are left alone.
  async fn add_tags(&self, kind: &str, key: &str, tags: &Tags) -> Result<(), CloudError>;
}

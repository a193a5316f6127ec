//! Declarative task file.
//!
//! A manifest is the on-disk form of a task map: the cluster it belongs to,
//! the tags that mark objects as owned by it, and one entry per task.
//!
//! # Example
//!
//! ```json
//! {
//!   "cluster": "prod.example.com",
//!   "tasks": [
//!     { "name": "network", "kind": "network", "fields": { "cidr": "10.0.0.0/16" } },
//!     { "name": "subnet", "kind": "subnet",
//!       "fields": { "network": { "$ref": "network" }, "cidr": "10.0.1.0/24" } }
//!   ]
//! }
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ManifestError;
use crate::cloud::Tags;
use crate::execute::RunConfig;
use crate::lifecycle::Lifecycle;
use crate::task::{Fields, Resource, TaskMap, Value};

/// A readiness rule as written in a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyWhen {
  pub field: String,
  pub value: Value,
}

/// One task entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskEntry {
  pub name: String,
  pub kind: String,
  /// Cloud identifier; defaults to `name`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub key: Option<String>,
  #[serde(default)]
  pub lifecycle: Lifecycle,
  #[serde(default)]
  pub fields: Fields,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ready_when: Option<ReadyWhen>,
}

impl TaskEntry {
  pub fn to_resource(&self) -> Resource {
    let mut resource = Resource::new(&self.kind, &self.name, self.fields.clone()).with_lifecycle(self.lifecycle);
    if let Some(key) = &self.key {
      resource = resource.with_key(key);
    }
    if let Some(ready) = &self.ready_when {
      resource = resource.ready_when(&ready.field, ready.value.clone());
    }
    resource
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
  pub cluster: String,
  /// Extra ownership tags on top of the cluster tag.
  #[serde(default, skip_serializing_if = "Tags::is_empty")]
  pub tags: Tags,
  #[serde(default)]
  pub tasks: Vec<TaskEntry>,
}

impl Manifest {
  /// Read a manifest from a JSON file.
  ///
  /// # Errors
  ///
  /// Returns [`ManifestError::Io`] if the file cannot be read and
  /// [`ManifestError::Parse`] if it is not a valid manifest.
  pub fn load(path: &Path) -> Result<Self, ManifestError> {
    let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json(&content).map_err(|source| ManifestError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(content)
  }

  /// Tags every object this manifest owns carries.
  pub fn owner_tags(&self) -> Tags {
    let mut tags = RunConfig::cluster_tags(&self.cluster);
    tags.extend(self.tags.iter().map(|(k, v)| (k.clone(), v.clone())));
    tags
  }

  /// Distinct task kinds, sorted.
  pub fn kinds(&self) -> BTreeSet<&str> {
    self.tasks.iter().map(|t| t.kind.as_str()).collect()
  }

  /// Build the task map.
  ///
  /// # Errors
  ///
  /// Returns [`ManifestError::Duplicate`] if two entries share a name.
  pub fn to_task_map(&self) -> Result<TaskMap, ManifestError> {
    let mut tasks = TaskMap::new();
    for entry in &self.tasks {
      tasks.insert(entry.to_resource()).map_err(ManifestError::Duplicate)?;
    }
    Ok(tasks)
  }
}

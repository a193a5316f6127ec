//! Per-task mutation policy.
//!
//! Before a task renders, its [`Lifecycle`] is consulted with the diff between
//! desired and observed state. Deletion of undeclared objects is not governed
//! here; it is a separate pass gated by the target.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::changes::ChangeSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
  /// Create and update freely.
  #[default]
  Sync,
  /// The object must already exist and match; any divergence is an error.
  ExistsAndValidates,
  /// The object should exist and match; divergence is reported as a warning.
  ExistsAndWarnIfChanges,
  /// Like `Sync`, but a backend refusing access downgrades to a warning.
  WarnIfInsufficientAccess,
}

impl Lifecycle {
  /// Whether this lifecycle allows the engine to mutate the object.
  pub fn permits_mutation(self) -> bool {
    matches!(self, Lifecycle::Sync | Lifecycle::WarnIfInsufficientAccess)
  }

  pub fn tolerates_access_denied(self) -> bool {
    self == Lifecycle::WarnIfInsufficientAccess
  }
}

impl fmt::Display for Lifecycle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Lifecycle::Sync => "sync",
      Lifecycle::ExistsAndValidates => "exists_and_validates",
      Lifecycle::ExistsAndWarnIfChanges => "exists_and_warn_if_changes",
      Lifecycle::WarnIfInsufficientAccess => "warn_if_insufficient_access",
    };
    f.write_str(s)
  }
}

/// Outcome of consulting a lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
  /// Go ahead and render.
  Render,
  /// Nothing to do; the object exists and matches.
  Unchanged,
  /// Skip rendering and record a warning.
  Warn(String),
  /// Skip rendering and fail the task.
  Reject(String),
}

/// Authorize the operation implied by a diff.
///
/// `exists` is whether `find` observed the object. For the read-only
/// lifecycles an absent object counts as divergence.
pub fn authorize(lifecycle: Lifecycle, exists: bool, changes: &ChangeSet) -> Decision {
  if lifecycle.permits_mutation() {
    return Decision::Render;
  }

  let divergence = if !exists {
    Some("object does not exist".to_string())
  } else if !changes.is_empty() {
    Some(format!("fields differ: {}", changes.field_names().join(", ")))
  } else {
    None
  };

  match (lifecycle, divergence) {
    (_, None) => Decision::Unchanged,
    (Lifecycle::ExistsAndValidates, Some(msg)) => Decision::Reject(msg),
    (_, Some(msg)) => Decision::Warn(msg),
  }
}

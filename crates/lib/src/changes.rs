//! Diff computation between desired and observed object state.
//!
//! A [`ChangeSet`] is transient: it is computed right before a task renders,
//! handed to the renderer, and dropped afterwards.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::task::{Fields, Value};

/// How a single declared field differs from what the backend reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum FieldChange {
  /// Not reported by the backend (or the object does not exist).
  Added { value: Value },
  /// Reported with a different value.
  Changed { from: Value, to: Value },
}

impl FieldChange {
  /// The value the field should end up with.
  pub fn desired(&self) -> &Value {
    match self {
      FieldChange::Added { value } => value,
      FieldChange::Changed { to, .. } => to,
    }
  }
}

/// Fields of one task whose desired value differs from the observed one.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ChangeSet {
  fields: BTreeMap<String, FieldChange>,
}

impl ChangeSet {
  /// Compute the diff between resolved desired fields and observed state.
  ///
  /// # Arguments
  ///
  /// * `desired` - Desired fields with references already resolved to cloud keys
  /// * `observed` - What `find` reported, or `None` if the object does not exist
  ///
  /// # Diff Logic
  ///
  /// - Declared field absent from the observed state → `Added`
  /// - Declared field present with another value → `Changed`
  /// - Observed field that is not declared → ignored (computed by the backend)
  pub fn compute(desired: &Fields, observed: Option<&Fields>) -> Self {
    let mut fields = BTreeMap::new();

    for (name, want) in desired {
      match observed.and_then(|o| o.get(name)) {
        None => {
          fields.insert(name.clone(), FieldChange::Added { value: want.clone() });
        }
        Some(have) if have != want => {
          fields.insert(
            name.clone(),
            FieldChange::Changed {
              from: have.clone(),
              to: want.clone(),
            },
          );
        }
        Some(_) => {}
      }
    }

    Self { fields }
  }

  /// Returns true if there is nothing to converge.
  pub fn is_empty(&self) -> bool {
    self.fields.is_empty()
  }

  pub fn len(&self) -> usize {
    self.fields.len()
  }

  pub fn get(&self, field: &str) -> Option<&FieldChange> {
    self.fields.get(field)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldChange)> {
    self.fields.iter().map(|(k, v)| (k.as_str(), v))
  }

  pub fn field_names(&self) -> Vec<&str> {
    self.fields.keys().map(String::as_str).collect()
  }

  /// The target values of every changed field, suitable for an update call.
  pub fn desired_values(&self) -> Fields {
    self
      .fields
      .iter()
      .map(|(k, change)| (k.clone(), change.desired().clone()))
      .collect()
  }
}

//! Task manifests.
//!
//! Manifests are the JSON form of a task map, read by the CLI and turned into
//! [`Resource`](crate::task::Resource) tasks.

mod types;

use std::path::PathBuf;

use thiserror::Error;

use crate::task::TaskMapError;

pub use types::*;

#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("failed to read manifest {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid manifest {}: {source}", path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error(transparent)]
  Duplicate(#[from] TaskMapError),
}

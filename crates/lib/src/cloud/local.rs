//! File-backed cloud state for local runs.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{Cloud, CloudError, CloudResource, MemoryCloud, Tags};
use crate::task::Fields;

/// A [`MemoryCloud`] loaded from and saved to a JSON file.
///
/// The file holds a list of [`CloudResource`]s. A missing file is an empty
/// cloud. Changes are only written back by [`LocalCloud::save`].
#[derive(Debug, Clone)]
pub struct LocalCloud {
  path: PathBuf,
  inner: MemoryCloud,
}

impl LocalCloud {
  pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
    let path = path.as_ref().to_path_buf();
    let inner = MemoryCloud::with_provider("local");

    if path.exists() {
      let content = std::fs::read_to_string(&path)?;
      let resources: Vec<CloudResource> =
        serde_json::from_str(&content).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
      debug!(path = %path.display(), count = resources.len(), "loaded local cloud state");
      for resource in resources {
        inner.insert(resource);
      }
    }

    Ok(Self { path, inner })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// The backing in-memory cloud, sharing state with this one.
  pub fn memory(&self) -> &MemoryCloud {
    &self.inner
  }

  /// Write the current state back to the file.
  pub fn save(&self) -> std::io::Result<()> {
    let resources = self.inner.resources();
    let content = serde_json::to_string_pretty(&resources).map_err(std::io::Error::other)?;
    if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&self.path, content)?;
    debug!(path = %self.path.display(), count = resources.len(), "saved local cloud state");
    Ok(())
  }
}

#[async_trait]
impl Cloud for LocalCloud {
  fn provider(&self) -> &str {
    self.inner.provider()
  }

  async fn describe(&self, kind: &str, key: &str) -> Result<Option<CloudResource>, CloudError> {
    self.inner.describe(kind, key).await
  }

  async fn create(&self, resource: CloudResource) -> Result<(), CloudError> {
    self.inner.create(resource).await
  }

  async fn update(&self, kind: &str, key: &str, fields: &Fields) -> Result<(), CloudError> {
    self.inner.update(kind, key, fields).await
  }

  async fn delete(&self, kind: &str, key: &str) -> Result<(), CloudError> {
    self.inner.delete(kind, key).await
  }

  async fn list_owned(&self, owner: &Tags) -> Result<Vec<CloudResource>, CloudError> {
    self.inner.list_owned(owner).await
  }

  async fn tags(&self, kind: &str, key: &str) -> Result<Tags, CloudError> {
    self.inner.tags(kind, key).await
  }

  async fn add_tags(&self, kind: &str, key: &str, tags: &Tags) -> Result<(), CloudError> {
    self.inner.add_tags(kind, key, tags).await
  }
}

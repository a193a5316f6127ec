//! Infrastructure-as-code export.
//!
//! Each task renders to a Terraform JSON fragment instead of an API call.
//! Fragments are collected with their wave index and written as one document
//! by `finish`, ordered by wave then name so that the file lists objects in
//! the order a live run would create them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value as Json, json};
use tracing::{debug, info};

use super::{Render, RenderRequest, RunContext, TargetError};
use crate::cloud::{Cloud, CloudResource, ResourceId};
use crate::execute::{GraphError, TaskAction, TaskError};
use crate::lifecycle::Lifecycle;
use crate::task::{Task, TaskMap, Value};

/// Whether a fragment manages the object or only looks it up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Block {
  Resource,
  Data,
}

impl Block {
  fn for_lifecycle(lifecycle: Lifecycle) -> Self {
    if lifecycle.permits_mutation() {
      Block::Resource
    } else {
      Block::Data
    }
  }
}

#[derive(Debug, Clone)]
struct Fragment {
  wave: usize,
  block: Block,
  kind: String,
  name: String,
  body: Json,
}

#[derive(Debug, Default)]
struct Collected {
  fragments: Vec<Fragment>,
  deletions: Vec<(usize, ResourceId)>,
}

#[derive(Debug)]
struct ExportState {
  cluster: String,
  out_dir: PathBuf,
  cloud: Option<Arc<dyn Cloud>>,
  include_deletions: bool,
  collected: Mutex<Collected>,
}

/// Emits `<cluster>.tf.json` into an output directory.
#[derive(Debug, Clone)]
pub struct ExportTarget {
  state: Arc<ExportState>,
}

impl ExportTarget {
  pub fn new(cluster: impl Into<String>, out_dir: impl Into<PathBuf>) -> Self {
    Self {
      state: Arc::new(ExportState {
        cluster: cluster.into(),
        out_dir: out_dir.into(),
        cloud: None,
        include_deletions: false,
        collected: Mutex::default(),
      }),
    }
  }

  /// Observe actual state through `cloud`, so reports say what would change.
  pub fn with_cloud(self, cloud: Arc<dyn Cloud>) -> Self {
    let include = self.state.include_deletions;
    self.rebuild(Some(cloud), include)
  }

  /// Also record orphaned objects, written to `<cluster>.deletions.json`.
  pub fn with_deletions(self, include: bool) -> Self {
    let cloud = self.state.cloud.clone();
    self.rebuild(cloud, include)
  }

  fn rebuild(self, cloud: Option<Arc<dyn Cloud>>, include_deletions: bool) -> Self {
    Self {
      state: Arc::new(ExportState {
        cluster: self.state.cluster.clone(),
        out_dir: self.state.out_dir.clone(),
        cloud,
        include_deletions,
        collected: Mutex::default(),
      }),
    }
  }

  pub fn cloud(&self) -> Option<&Arc<dyn Cloud>> {
    self.state.cloud.as_ref()
  }

  pub fn includes_deletions(&self) -> bool {
    self.state.include_deletions
  }

  /// Path of the main document `finish` writes.
  pub fn output_path(&self) -> PathBuf {
    self.state.out_dir.join(format!("{}.tf.json", self.state.cluster))
  }

  pub fn deletions_path(&self) -> PathBuf {
    self.state.out_dir.join(format!("{}.deletions.json", self.state.cluster))
  }

  fn collected(&self) -> MutexGuard<'_, Collected> {
    self.state.collected.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn push(&self, fragment: Fragment) {
    debug!(kind = %fragment.kind, name = %fragment.name, wave = fragment.wave, "exported fragment");
    self.collected().fragments.push(fragment);
  }

  pub(super) fn record_deletion(&self, orphan: &CloudResource, wave: usize) {
    self.collected().deletions.push((wave, orphan.id()));
  }

  /// The document as it would be written now.
  pub fn document(&self) -> Json {
    let mut fragments = self.collected().fragments.clone();
    fragments.sort_by(|a, b| (a.wave, &a.name, &a.kind).cmp(&(b.wave, &b.name, &b.kind)));

    let mut resources = Vec::new();
    let mut data = Vec::new();
    for f in fragments {
      let mut named = Map::new();
      named.insert(f.name, f.body);
      let mut entry = Map::new();
      entry.insert(f.kind, Json::Object(named));
      let entry = Json::Object(entry);
      match f.block {
        Block::Resource => resources.push(entry),
        Block::Data => data.push(entry),
      }
    }

    let mut doc = Map::new();
    doc.insert("resource".to_string(), Json::Array(resources));
    if !data.is_empty() {
      doc.insert("data".to_string(), Json::Array(data));
    }
    Json::Object(doc)
  }

  pub(super) fn finish(&self) -> Result<(), TargetError> {
    let dir = &self.state.out_dir;
    std::fs::create_dir_all(dir).map_err(|source| io_error(dir, source))?;

    let path = self.output_path();
    let content = serde_json::to_string_pretty(&self.document())?;
    std::fs::write(&path, content).map_err(|source| io_error(&path, source))?;
    info!(path = %path.display(), "wrote export");

    if self.state.include_deletions {
      let mut deletions = self.collected().deletions.clone();
      deletions.sort();
      let ids: Vec<_> = deletions.into_iter().map(|(_, id)| id).collect();
      let path = self.deletions_path();
      let content = serde_json::to_string_pretty(&ids)?;
      std::fs::write(&path, content).map_err(|source| io_error(&path, source))?;
      info!(path = %path.display(), count = ids.len(), "wrote export deletions");
    }

    Ok(())
  }
}

fn io_error(path: &Path, source: std::io::Error) -> TargetError {
  TargetError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// Terraform resource names allow letters, digits, `_` and `-`, and cannot
/// start with a digit.
pub(crate) fn tf_name(name: &str) -> String {
  let mut out: String = name
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
    .collect();
  if out.chars().next().is_none_or(|c| c.is_ascii_digit()) {
    out.insert(0, '_');
  }
  out
}

fn to_json(value: &Value, tasks: &TaskMap) -> Json {
  match value {
    Value::Bool(b) => Json::Bool(*b),
    Value::Number(n) => serde_json::Number::from_f64(*n).map_or(Json::Null, Json::Number),
    Value::String(s) => Json::String(s.clone()),
    Value::Array(items) => Json::Array(items.iter().map(|v| to_json(v, tasks)).collect()),
    Value::Table(map) => Json::Object(map.iter().map(|(k, v)| (k.clone(), to_json(v, tasks))).collect()),
    Value::Ref(r) => match tasks.get(r.name()) {
      Some(task) => Json::String(interpolation(task.as_ref())),
      None => Json::Null,
    },
  }
}

/// `<kind>.<name>`, or `data.<kind>.<name>` for looked-up objects.
fn address(task: &dyn Task) -> String {
  let prefix = match Block::for_lifecycle(task.lifecycle()) {
    Block::Resource => "",
    Block::Data => "data.",
  };
  format!("{}{}.{}", prefix, tf_name(task.kind()), tf_name(task.name()))
}

fn interpolation(task: &dyn Task) -> String {
  format!("${{{}.id}}", address(task))
}

/// Fail if two tasks would land on the same address once their kinds and
/// names are sanitized.
///
/// # Errors
///
/// Returns [`GraphError::AddressCollision`] for the first shared address, in
/// address order, listing the tasks in name order.
pub(crate) fn check_addresses(tasks: &TaskMap) -> Result<(), GraphError> {
  let mut addresses: BTreeMap<String, Vec<String>> = BTreeMap::new();
  for (name, task) in tasks.iter() {
    addresses.entry(address(task.as_ref())).or_default().push(name.to_string());
  }

  match addresses.into_iter().find(|(_, names)| names.len() > 1) {
    Some((address, tasks)) => Err(GraphError::AddressCollision { address, tasks }),
    None => Ok(()),
  }
}

/// Stock export renderer: emit the task as a fragment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExportRender;

#[async_trait]
impl Render for ExportRender {
  async fn render(&self, req: RenderRequest<'_>, ctx: &RunContext) -> Result<TaskAction, TaskError> {
    let task = req.task;
    let Some(target) = ctx.target().as_export() else {
      return Err(TaskError::structural(task.name(), "export renderer used outside an export"));
    };

    let mut body: Map<String, Json> = task
      .desired()
      .iter()
      .map(|(k, v)| (k.clone(), to_json(v, ctx.tasks())))
      .collect();

    let block = Block::for_lifecycle(task.lifecycle());
    let owner_tags = &ctx.config().owner_tags;
    if block == Block::Resource && !owner_tags.is_empty() && !body.contains_key("tags") {
      body.insert("tags".to_string(), json!(owner_tags));
    }

    target.push(Fragment {
      wave: req.wave,
      block,
      kind: tf_name(task.kind()),
      name: tf_name(task.name()),
      body: Json::Object(body),
    });

    Ok(match req.actual {
      None => TaskAction::Create,
      Some(_) if req.changes.is_empty() => TaskAction::None,
      Some(_) => TaskAction::Update,
    })
  }
}

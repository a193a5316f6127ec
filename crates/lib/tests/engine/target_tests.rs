use std::sync::Arc;

use convoy_lib::cloud::{Cloud, LocalCloud, MemoryCloud};
use convoy_lib::execute::{GraphError, Reconciler, TaskAction};
use convoy_lib::lifecycle::Lifecycle;
use convoy_lib::target::{ExportTarget, Target};
use convoy_lib::task::TaskMap;
use serde_json::Value as Json;
use tempfile::TempDir;

use super::common::{CLUSTER, config, resource, stack};

#[tokio::test]
async fn dry_run_plan_lists_creates_in_wave_order() {
  let cloud = MemoryCloud::new();
  let target = Target::dry_run(Some(Arc::new(cloud.clone())));

  let report = Reconciler::new(config()).run(stack(), target.clone()).await.unwrap();

  assert!(report.is_success());
  assert_eq!(cloud.mutations(), 0);
  let plan = target.as_dry_run().unwrap().plan();
  let order: Vec<_> = plan.changes.iter().map(|c| (c.task.as_str(), c.action)).collect();
  assert_eq!(
    order,
    vec![
      ("network", TaskAction::Create),
      ("subnet", TaskAction::Create),
      ("instance", TaskAction::Create),
    ]
  );
}

#[tokio::test]
async fn export_writes_document_in_dependency_order() {
  let dir = TempDir::new().unwrap();
  let target = Target::export(CLUSTER, dir.path());

  let mut tasks = stack();
  tasks
    .insert(resource("dns_zone", "shared-zone", &[]).with_lifecycle(Lifecycle::ExistsAndValidates))
    .unwrap();

  Reconciler::new(config())
    .run(tasks, target.clone())
    .await
    .unwrap()
    .into_result()
    .unwrap();

  let path = target.as_export().unwrap().output_path();
  assert_eq!(path, dir.path().join("prod.example.com.tf.json"));
  let doc: Json = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();

  let kinds: Vec<_> = doc["resource"]
    .as_array()
    .unwrap()
    .iter()
    .map(|entry| entry.as_object().unwrap().keys().next().unwrap().clone())
    .collect();
  assert_eq!(kinds, vec!["network", "subnet", "instance"]);
  assert_eq!(doc["resource"][1]["subnet"]["subnet"]["network_id"], "${network.network.id}");
  assert!(doc["data"][0]["dns_zone"]["shared-zone"].is_object());
}

#[tokio::test]
async fn export_can_record_deletions() {
  let dir = TempDir::new().unwrap();
  let cloud = MemoryCloud::new();
  cloud.insert(
    convoy_lib::cloud::CloudResource::new("network", "legacy", Default::default())
      .with_tags(convoy_lib::execute::RunConfig::cluster_tags(CLUSTER)),
  );
  let export = ExportTarget::new(CLUSTER, dir.path())
    .with_cloud(Arc::new(cloud.clone()))
    .with_deletions(true);

  Reconciler::new(config())
    .run(TaskMap::new(), Target::CodeExport(export.clone()))
    .await
    .unwrap()
    .into_result()
    .unwrap();

  let deletions: Json = serde_json::from_str(&std::fs::read_to_string(export.deletions_path()).unwrap()).unwrap();
  assert_eq!(deletions[0]["kind"], "network");
  assert_eq!(deletions[0]["key"], "legacy");
  assert!(cloud.get("network", "legacy").is_some());
}

#[tokio::test]
async fn local_cloud_persists_between_runs() {
  let dir = TempDir::new().unwrap();
  let state = dir.path().join("state.json");

  let cloud = LocalCloud::open(&state).unwrap();
  Reconciler::new(config())
    .run(stack(), Target::live(cloud.clone()))
    .await
    .unwrap();
  cloud.save().unwrap();

  let reopened = LocalCloud::open(&state).unwrap();
  assert_eq!(reopened.provider(), "local");
  assert_eq!(reopened.memory().resources().len(), 3);

  let report = Reconciler::new(config())
    .run(stack(), Target::live(reopened.clone()))
    .await
    .unwrap();
  assert_eq!(report.summary().unchanged, 3);
  assert_eq!(reopened.memory().mutations(), 0);
}

#[tokio::test]
async fn export_refuses_colliding_addresses() {
  let dir = TempDir::new().unwrap();
  let target = Target::export(CLUSTER, dir.path());

  let mut tasks = TaskMap::new();
  tasks.insert(resource("network", "a.b", &[])).unwrap();
  tasks.insert(resource("network", "a_b", &[])).unwrap();

  let err = Reconciler::new(config()).run(tasks, target.clone()).await.unwrap_err();

  assert_eq!(
    err,
    GraphError::AddressCollision {
      address: "network.a_b".to_string(),
      tasks: vec!["a.b".to_string(), "a_b".to_string()],
    }
  );
  assert!(!target.as_export().unwrap().output_path().exists());
}

#[tokio::test]
async fn colliding_export_names_are_fine_on_a_live_run() {
  let cloud = MemoryCloud::new();
  let mut tasks = TaskMap::new();
  tasks.insert(resource("network", "a.b", &[])).unwrap();
  tasks.insert(resource("network", "a_b", &[])).unwrap();

  let report = Reconciler::new(config()).run(tasks, Target::live(cloud.clone())).await.unwrap();

  assert!(report.is_success());
  assert!(cloud.get("network", "a.b").is_some());
  assert!(cloud.get("network", "a_b").is_some());
}

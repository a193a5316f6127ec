use std::sync::Arc;

use convoy_lib::cloud::{CloudError, CloudResource, MemoryCloud, ResourceId};
use convoy_lib::execute::{EngineError, Reconciler, RunConfig, TaskState};
use convoy_lib::target::Target;
use convoy_lib::task::{Fields, TaskMap};

use super::common::{CLUSTER, config, resource, stack};

fn owned(kind: &str, key: &str, deps: &[(&str, &str)]) -> CloudResource {
  let mut r = CloudResource::new(kind, key, Fields::new()).with_tags(RunConfig::cluster_tags(CLUSTER));
  for (k, d) in deps {
    r = r.with_dependency(ResourceId::new(*k, *d));
  }
  r
}

/// A previously applied stack that is no longer declared.
fn seed_retired_stack(cloud: &MemoryCloud) {
  cloud.insert(owned("network", "legacy-net", &[]));
  cloud.insert(owned("subnet", "legacy-sub", &[("network", "legacy-net")]));
  cloud.insert(owned("instance", "legacy-vm", &[("subnet", "legacy-sub")]));
}

#[tokio::test]
async fn removes_orphans_in_reverse_creation_order() {
  let cloud = MemoryCloud::new();
  seed_retired_stack(&cloud);

  let report = Reconciler::new(config())
    .run(stack(), Target::live(cloud.clone()))
    .await
    .unwrap()
    .into_result()
    .unwrap();

  assert_eq!(
    cloud.deleted(),
    vec![
      ResourceId::new("instance", "legacy-vm"),
      ResourceId::new("subnet", "legacy-sub"),
      ResourceId::new("network", "legacy-net"),
    ]
  );
  assert_eq!(report.summary().deleted, 3);
  assert_eq!(report.deletions["network/legacy-net"].wave, 2);
}

#[tokio::test]
async fn declared_objects_survive_the_deletion_pass() {
  let cloud = MemoryCloud::new();
  seed_retired_stack(&cloud);

  let mut tasks = TaskMap::new();
  tasks.insert(resource("network", "legacy-net", &[])).unwrap();

  let report = Reconciler::new(config())
    .run(tasks, Target::live(cloud.clone()))
    .await
    .unwrap();

  assert!(cloud.get("network", "legacy-net").is_some());
  assert!(cloud.get("subnet", "legacy-sub").is_none());
  assert_eq!(report.deletion_order, vec!["instance/legacy-vm", "subnet/legacy-sub"]);
}

#[tokio::test]
async fn failed_delete_reports_and_keeps_dependencies() {
  let cloud = MemoryCloud::new();
  seed_retired_stack(&cloud);
  cloud.fail_always("delete", "legacy-vm", CloudError::Other("termination protection".to_string()));

  let report = Reconciler::new(config())
    .run(stack(), Target::live(cloud.clone()))
    .await
    .unwrap();

  assert!(report.tasks_succeeded());
  assert_eq!(report.deletions["instance/legacy-vm"].state, TaskState::Failed);
  assert_eq!(report.deletions["subnet/legacy-sub"].state, TaskState::Blocked);
  assert_eq!(report.deletions["network/legacy-net"].state, TaskState::Blocked);
  assert!(cloud.deleted().is_empty());
  assert!(matches!(
    report.into_result(),
    Err(EngineError::DeletionFailed { .. })
  ));
}

#[tokio::test]
async fn dry_run_plans_deletions_without_deleting() {
  let cloud = MemoryCloud::new();
  seed_retired_stack(&cloud);
  let target = Target::dry_run(Some(Arc::new(cloud.clone())));

  Reconciler::new(config())
    .run(stack(), target.clone())
    .await
    .unwrap()
    .into_result()
    .unwrap();

  assert_eq!(cloud.mutations(), 0);
  let plan = target.as_dry_run().unwrap().plan();
  let planned: Vec<_> = plan.deletions.iter().map(|d| (d.wave, d.key.as_str())).collect();
  assert_eq!(planned, vec![(0, "legacy-vm"), (1, "legacy-sub"), (2, "legacy-net")]);
  assert_eq!(plan.mutations().count(), 3);
}

use std::sync::Arc;
use std::time::{Duration, Instant};

use convoy_lib::cloud::{CloudError, CloudResource, MemoryCloud};
use convoy_lib::execute::{
  CancelToken, EngineError, FinishOutcome, GraphError, Reconciler, RunConfig, TaskAction, TaskError, TaskState,
};
use convoy_lib::target::{PollConfig, RenderTable, Target, TargetKind};
use convoy_lib::task::{Fields, Resource, TaskMap};

use super::common::{CLUSTER, CancelAfterRender, ProbeRender, TimelineRender, config, resource, stack};

#[test]
fn waves_follow_dependencies() {
  let plan = Reconciler::new(config()).plan(&stack()).unwrap();
  assert_eq!(
    plan.waves(),
    &[vec!["network".to_string()], vec!["subnet".to_string()], vec!["instance".to_string()]]
  );
}

#[tokio::test]
async fn creates_stack_with_ownership_tags() {
  let cloud = MemoryCloud::new();

  let report = Reconciler::new(config())
    .run(stack(), Target::live(cloud.clone()))
    .await
    .unwrap()
    .into_result()
    .unwrap();

  assert_eq!(report.summary().created, 3);
  assert_eq!(report.finish, FinishOutcome::Done);
  for (kind, key) in [("network", "network"), ("subnet", "subnet"), ("instance", "instance")] {
    assert_eq!(cloud.get(kind, key).unwrap().tags["KubernetesCluster"], CLUSTER);
  }
  assert_eq!(cloud.get("subnet", "subnet").unwrap().fields["network_id"], "network".into());
}

#[tokio::test]
async fn failure_blocks_downstream_and_skips_finish() {
  let cloud = MemoryCloud::new();
  cloud.fail_always("create", "network", CloudError::Other("vpc limit exceeded".to_string()));

  let report = Reconciler::new(config())
    .run(stack(), Target::live(cloud.clone()))
    .await
    .unwrap();

  assert_eq!(report.state("network"), Some(TaskState::Failed));
  assert_eq!(report.state("subnet"), Some(TaskState::Blocked));
  assert_eq!(report.state("instance"), Some(TaskState::Blocked));
  assert_eq!(report.finish, FinishOutcome::Skipped);
  assert_eq!(cloud.calls("create"), 1);

  match report.into_result().unwrap_err() {
    EngineError::TasksFailed { failed, blocked } => {
      assert_eq!(failed, vec!["network"]);
      assert_eq!(blocked, vec!["instance", "subnet"]);
    }
    other => panic!("unexpected error: {other}"),
  }
}

#[tokio::test]
async fn converged_state_needs_no_mutations() {
  let cloud = MemoryCloud::new();
  Reconciler::new(config())
    .run(stack(), Target::live(cloud.clone()))
    .await
    .unwrap();

  cloud.reset_calls();
  let report = Reconciler::new(config())
    .run(stack(), Target::live(cloud.clone()))
    .await
    .unwrap();
  assert!(report.is_success());
  assert_eq!(report.summary().unchanged, 3);
  assert_eq!(cloud.mutations(), 0);

  let target = Target::dry_run(Some(Arc::new(cloud.clone())));
  Reconciler::new(config()).run(stack(), target.clone()).await.unwrap();
  assert!(target.as_dry_run().unwrap().plan().is_empty());
}

#[tokio::test]
async fn drift_is_updated_in_place() {
  let cloud = MemoryCloud::new();
  Reconciler::new(config())
    .run(stack(), Target::live(cloud.clone()))
    .await
    .unwrap();

  let mut drifted = cloud.get("subnet", "subnet").unwrap();
  drifted.fields.insert("name".to_string(), "renamed".into());
  cloud.insert(drifted);
  cloud.reset_calls();

  let report = Reconciler::new(config())
    .run(stack(), Target::live(cloud.clone()))
    .await
    .unwrap();

  assert_eq!(report.tasks["subnet"].action, TaskAction::Update);
  assert_eq!(cloud.calls("update"), 1);
  assert_eq!(cloud.get("subnet", "subnet").unwrap().fields["name"], "subnet".into());
}

#[tokio::test]
async fn parallelism_caps_concurrent_renders() {
  let probe = ProbeRender::new(Duration::from_millis(20));
  let mut renderers = RenderTable::new();
  renderers.register("probe", TargetKind::LiveApply, probe.clone());

  let mut tasks = TaskMap::new();
  for i in 0..5 {
    tasks.insert(resource("probe", &format!("probe-{i}"), &[])).unwrap();
  }

  let report = Reconciler::new(RunConfig {
    parallelism: 2,
    owner_tags: Default::default(),
    ..config()
  })
  .with_renderers(renderers)
  .run(tasks, Target::live(MemoryCloud::new()))
  .await
  .unwrap();

  assert!(report.tasks_succeeded());
  assert_eq!(probe.peak(), 2);
}

#[tokio::test]
async fn slow_task_does_not_hold_back_unrelated_branch() {
  let timeline = TimelineRender::new(&[("slow", 300), ("fast", 5), ("fast-child", 5)]);
  let mut renderers = RenderTable::new();
  renderers.register("probe", TargetKind::LiveApply, timeline.clone());

  let mut tasks = TaskMap::new();
  tasks.insert(resource("probe", "slow", &[])).unwrap();
  tasks.insert(resource("probe", "fast", &[])).unwrap();
  tasks.insert(resource("probe", "fast-child", &["fast"])).unwrap();

  let report = Reconciler::new(RunConfig {
    parallelism: 4,
    owner_tags: Default::default(),
    ..config()
  })
  .with_renderers(renderers)
  .run(tasks, Target::live(MemoryCloud::new()))
  .await
  .unwrap();

  assert!(report.tasks_succeeded());
  assert_eq!(report.tasks["slow"].wave, 0);
  assert_eq!(report.tasks["fast-child"].wave, 1);
  assert!(timeline.position("end fast") < timeline.position("start fast-child"));
  assert!(timeline.position("start fast-child") < timeline.position("end slow"));
}

#[tokio::test]
async fn readiness_polls_exactly_the_configured_attempts() {
  let mut tasks = TaskMap::new();
  tasks
    .insert(Resource::new("instance", "master", Fields::new()).ready_when("state", "running"))
    .unwrap();
  let tasks = Arc::new(tasks);
  let mut cfg = config();
  cfg.poll.max_attempts = 3;

  // Settles on the third probe.
  let cloud = MemoryCloud::new().with_transition("instance", "state", "pending", "running", 3);
  let report = Reconciler::new(cfg.clone())
    .run(tasks.clone(), Target::live(cloud.clone()))
    .await
    .unwrap();
  assert!(report.is_success());
  // One describe from find, three from the readiness wait.
  assert_eq!(cloud.calls("describe"), 4);

  // Needs a fourth probe it never gets.
  let cloud = MemoryCloud::new().with_transition("instance", "state", "pending", "running", 4);
  let report = Reconciler::new(cfg)
    .run(tasks, Target::live(cloud.clone()))
    .await
    .unwrap();
  assert_eq!(cloud.calls("describe"), 4);
  match &report.tasks["master"].error {
    Some(TaskError::Timeout {
      resource, attempts, ..
    }) => {
      assert_eq!(resource, "instance master");
      assert_eq!(*attempts, 3);
    }
    other => panic!("unexpected error: {other:?}"),
  }
}

#[tokio::test]
async fn cycle_fails_before_any_backend_call() {
  let cloud = MemoryCloud::new();
  let mut tasks = TaskMap::new();
  tasks.insert(resource("network", "a", &["c"])).unwrap();
  tasks.insert(resource("network", "b", &["a"])).unwrap();
  tasks.insert(resource("network", "c", &["b"])).unwrap();

  let err = Reconciler::new(config())
    .run(tasks, Target::live(cloud.clone()))
    .await
    .unwrap_err();

  assert_eq!(
    err,
    GraphError::Cycle {
      tasks: vec!["a".to_string(), "b".to_string(), "c".to_string()]
    }
  );
  assert_eq!(cloud.calls("describe"), 0);
  assert_eq!(cloud.mutations(), 0);
}

#[tokio::test]
async fn cancellation_leaves_unfinished_tasks_cancelled() {
  let cloud = MemoryCloud::new();
  let mut renderers = RenderTable::standard(["subnet", "instance"]);
  renderers.register("network", TargetKind::LiveApply, Arc::new(CancelAfterRender));
  let cancel = CancelToken::new();

  let report = Reconciler::new(config())
    .with_renderers(renderers)
    .with_cancel(cancel.clone())
    .run(stack(), Target::live(cloud.clone()))
    .await
    .unwrap();

  assert!(cancel.is_cancelled());
  assert_eq!(report.state("network"), Some(TaskState::Done));
  assert_eq!(report.state("subnet"), Some(TaskState::Cancelled));
  assert_eq!(report.state("instance"), Some(TaskState::Cancelled));
  assert!(cloud.get("subnet", "subnet").is_none());
  assert!(matches!(
    report.into_result(),
    Err(EngineError::Cancelled { unfinished: 2 })
  ));
}

#[tokio::test]
async fn cancellation_interrupts_readiness_wait() {
  let cloud = MemoryCloud::new().with_transition("instance", "state", "pending", "running", 1000);
  let mut tasks = TaskMap::new();
  tasks
    .insert(Resource::new("instance", "master", Fields::new()).ready_when("state", "running"))
    .unwrap();
  tasks.insert(resource("subnet", "after-master", &["master"])).unwrap();

  let mut cfg = config();
  cfg.poll = PollConfig {
    interval_ms: 50,
    max_attempts: 20,
  };
  let cancel = CancelToken::new();
  let trigger = cancel.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(30)).await;
    trigger.cancel();
  });

  let started = Instant::now();
  let report = Reconciler::new(cfg)
    .with_cancel(cancel)
    .run(tasks, Target::live(cloud.clone()))
    .await
    .unwrap();

  assert!(started.elapsed() < Duration::from_millis(500));
  assert!(cloud.calls("describe") <= 3);
  assert_eq!(report.state("master"), Some(TaskState::Cancelled));
  assert!(matches!(
    report.tasks["master"].error,
    Some(TaskError::Cancelled { .. })
  ));
  assert_eq!(report.state("after-master"), Some(TaskState::Cancelled));
  assert!(cloud.get("subnet", "after-master").is_none());
  assert!(matches!(
    report.into_result(),
    Err(EngineError::Cancelled { unfinished: 2 })
  ));
}

#[tokio::test]
async fn foreign_objects_are_never_deleted() {
  let cloud = MemoryCloud::new();
  cloud.insert(CloudResource::new("network", "someone-elses", Fields::new()));

  let report = Reconciler::new(config())
    .run(stack(), Target::live(cloud.clone()))
    .await
    .unwrap();

  assert!(report.is_success());
  assert!(cloud.get("network", "someone-elses").is_some());
}

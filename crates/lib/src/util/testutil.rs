//! Fixtures shared by unit tests.

use std::sync::Arc;

use crate::execute::{CancelToken, RunConfig};
use crate::retry::{Backoff, RetryPolicy};
use crate::target::{PollConfig, RenderTable, RunContext, Target};
use crate::task::{Fields, Resource, TaskMap, Value};

/// A config that polls and retries in milliseconds instead of seconds.
pub fn fast_config() -> RunConfig {
  RunConfig {
    poll: PollConfig {
      interval_ms: 1,
      max_attempts: 30,
    },
    retry: RetryPolicy::new(3, Backoff::Fixed, 1),
    ..RunConfig::default()
  }
}

/// A context over an empty task map.
pub fn context(target: Target) -> RunContext {
  context_with(target, Arc::new(TaskMap::new()), |_| {})
}

/// A context with stock renderers for every kind in `tasks`, plus the kinds
/// `network_stack` uses.
pub fn context_with(target: Target, tasks: Arc<TaskMap>, configure: impl FnOnce(&mut RunConfig)) -> RunContext {
  let mut config = fast_config();
  configure(&mut config);

  let kinds: Vec<String> = tasks.iter().map(|(_, t)| t.kind().to_string()).collect();
  let renderers = RenderTable::standard(
    ["network", "subnet", "instance"]
      .into_iter()
      .chain(kinds.iter().map(String::as_str)),
  );

  RunContext::new(
    target,
    tasks,
    Arc::new(renderers),
    Arc::new(config),
    CancelToken::new(),
  )
}

/// network ← subnet ← instance.
pub fn network_stack() -> Arc<TaskMap> {
  let mut tasks = TaskMap::new();

  let mut network = Fields::new();
  network.insert("cidr".to_string(), Value::from("10.0.0.0/16"));
  tasks.insert(Resource::new("network", "network", network)).unwrap();

  let mut subnet = Fields::new();
  subnet.insert("network".to_string(), Value::reference("network"));
  subnet.insert("cidr".to_string(), Value::from("10.0.1.0/24"));
  tasks.insert(Resource::new("subnet", "subnet", subnet)).unwrap();

  let mut instance = Fields::new();
  instance.insert("subnet".to_string(), Value::reference("subnet"));
  instance.insert("size".to_string(), Value::from("m5.large"));
  tasks.insert(Resource::new("instance", "instance", instance)).unwrap();

  Arc::new(tasks)
}

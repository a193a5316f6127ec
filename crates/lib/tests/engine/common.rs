use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use convoy_lib::execute::{RunConfig, TaskAction, TaskError};
use convoy_lib::retry::{Backoff, RetryPolicy};
use convoy_lib::target::{LiveRender, PollConfig, Render, RenderRequest, RunContext};
use convoy_lib::task::{Fields, Resource, TaskMap, Value};

pub const CLUSTER: &str = "prod.example.com";

/// Millisecond polling and retries, owned by `CLUSTER`.
pub fn config() -> RunConfig {
  RunConfig {
    poll: PollConfig {
      interval_ms: 1,
      max_attempts: 30,
    },
    retry: RetryPolicy::new(3, Backoff::Fixed, 1),
    owner_tags: RunConfig::cluster_tags(CLUSTER),
    ..RunConfig::default()
  }
}

/// A resource whose fields reference each task in `refs`.
pub fn resource(kind: &str, name: &str, refs: &[&str]) -> Resource {
  let mut fields = Fields::new();
  fields.insert("name".to_string(), Value::from(name));
  for r in refs {
    fields.insert(format!("{r}_id"), Value::reference(*r));
  }
  Resource::new(kind, name, fields)
}

/// network ← subnet ← instance.
pub fn stack() -> TaskMap {
  let mut tasks = TaskMap::new();
  tasks.insert(resource("network", "network", &[])).unwrap();
  tasks.insert(resource("subnet", "subnet", &["network"])).unwrap();
  tasks.insert(resource("instance", "instance", &["subnet"])).unwrap();
  tasks
}

/// Render that sleeps while recording how many renders overlap.
#[derive(Debug, Default)]
pub struct ProbeRender {
  pub current: AtomicUsize,
  pub peak: AtomicUsize,
  pub delay: Duration,
}

impl ProbeRender {
  pub fn new(delay: Duration) -> Arc<Self> {
    Arc::new(Self {
      delay,
      ..Self::default()
    })
  }

  pub fn peak(&self) -> usize {
    self.peak.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Render for ProbeRender {
  async fn render(&self, _req: RenderRequest<'_>, _ctx: &RunContext) -> Result<TaskAction, TaskError> {
    let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
    self.peak.fetch_max(now, Ordering::SeqCst);
    tokio::time::sleep(self.delay).await;
    self.current.fetch_sub(1, Ordering::SeqCst);
    Ok(TaskAction::Create)
  }
}

/// Render that sleeps for a per-task delay and records when each render
/// starts and ends, as `"start <task>"` and `"end <task>"`.
#[derive(Debug, Default)]
pub struct TimelineRender {
  delays: HashMap<String, Duration>,
  events: Mutex<Vec<String>>,
}

impl TimelineRender {
  pub fn new(delays: &[(&str, u64)]) -> Arc<Self> {
    Arc::new(Self {
      delays: delays
        .iter()
        .map(|(name, ms)| (name.to_string(), Duration::from_millis(*ms)))
        .collect(),
      events: Mutex::default(),
    })
  }

  /// Index of `event` in the recorded timeline.
  pub fn position(&self, event: &str) -> usize {
    let events = self.events.lock().unwrap();
    events
      .iter()
      .position(|e| e == event)
      .unwrap_or_else(|| panic!("{event} not recorded in {events:?}"))
  }
}

#[async_trait]
impl Render for TimelineRender {
  async fn render(&self, req: RenderRequest<'_>, _ctx: &RunContext) -> Result<TaskAction, TaskError> {
    let name = req.task.name().to_string();
    let delay = self.delays.get(&name).copied().unwrap_or_default();
    self.events.lock().unwrap().push(format!("start {name}"));
    tokio::time::sleep(delay).await;
    self.events.lock().unwrap().push(format!("end {name}"));
    Ok(TaskAction::Create)
  }
}

/// Live render that cancels the run once it has created its object.
#[derive(Debug, Default)]
pub struct CancelAfterRender;

#[async_trait]
impl Render for CancelAfterRender {
  async fn render(&self, req: RenderRequest<'_>, ctx: &RunContext) -> Result<TaskAction, TaskError> {
    let action = LiveRender.render(req, ctx).await?;
    ctx.cancel().cancel();
    Ok(action)
  }
}

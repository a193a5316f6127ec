mod apply;
mod export;
mod graph;
mod plan;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Args;
use tracing::warn;

use convoy_lib::execute::{CancelToken, Reconciler, RunConfig, RunReport};
use convoy_lib::manifest::Manifest;
use convoy_lib::target::Target;
use convoy_lib::task::TaskMap;

use crate::output::OutputFormat;

pub use apply::cmd_apply;
pub use export::cmd_export;
pub use graph::cmd_graph;
pub use plan::cmd_plan;

/// Flags shared by every command that runs the reconciler.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
  /// Path to the task manifest
  #[arg(default_value = "convoy.json")]
  pub manifest: PathBuf,

  /// Local cloud state file
  #[arg(long, default_value = "convoy-state.json")]
  pub state: PathBuf,

  /// Run configuration file (JSON); flags override its values
  #[arg(long)]
  pub config: Option<PathBuf>,

  /// Maximum number of tasks running at once
  #[arg(short = 'j', long)]
  pub parallelism: Option<usize>,

  /// Time between readiness probes (e.g., "10s", "500ms")
  #[arg(long, value_parser = humantime::parse_duration)]
  pub poll_interval: Option<Duration>,

  /// Readiness probes before giving up
  #[arg(long)]
  pub poll_attempts: Option<u32>,

  /// Delete owned objects that are no longer declared
  #[arg(long)]
  pub prune: bool,

  /// Output format
  #[arg(short = 'o', long, value_enum, default_value = "text")]
  pub output: OutputFormat,
}

/// Everything a command needs before it picks a target.
pub struct Loaded {
  pub manifest: Manifest,
  pub tasks: TaskMap,
  pub config: RunConfig,
}

pub fn load_manifest(path: &Path) -> Result<(Manifest, TaskMap)> {
  let manifest = Manifest::load(path)?;
  let tasks = manifest
    .to_task_map()
    .with_context(|| format!("Invalid manifest: {}", path.display()))?;
  Ok((manifest, tasks))
}

impl RunArgs {
  pub fn load(&self) -> Result<Loaded> {
    let (manifest, tasks) = load_manifest(&self.manifest)?;

    let mut config = match &self.config {
      Some(path) => {
        let content =
          std::fs::read_to_string(path).with_context(|| format!("Failed to read config: {}", path.display()))?;
        serde_json::from_str::<RunConfig>(&content)
          .with_context(|| format!("Invalid config: {}", path.display()))?
      }
      None => RunConfig::default(),
    };

    if let Some(parallelism) = self.parallelism {
      config.parallelism = parallelism;
    }
    if let Some(interval) = self.poll_interval {
      config.poll.interval_ms = interval.as_millis() as u64;
    }
    if let Some(attempts) = self.poll_attempts {
      config.poll.max_attempts = attempts;
    }
    config.owner_tags.extend(manifest.owner_tags());
    config.process_deletions = if self.prune {
      Some(true)
    } else {
      config.process_deletions.or(Some(false))
    };

    Ok(Loaded {
      manifest,
      tasks,
      config,
    })
  }
}

/// Run the reconciler on a fresh runtime, cancelling on Ctrl-C.
pub fn reconcile(config: RunConfig, tasks: TaskMap, target: Target) -> Result<(RunReport, Duration)> {
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let cancel = CancelToken::new();
  let reconciler = Reconciler::new(config).with_cancel(cancel.clone());
  let started = Instant::now();

  let report = rt.block_on(async {
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupted, waiting for running tasks");
        cancel.cancel();
      }
    });
    reconciler.run(tasks, target).await
  });

  let report = report.context("Invalid task graph")?;
  Ok((report, started.elapsed()))
}

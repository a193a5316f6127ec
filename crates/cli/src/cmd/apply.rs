//! Implementation of the `convoy apply` command.
//!
//! Reconciles the local state file with the manifest. The state file is
//! written back even when some tasks fail, so partial progress is kept.

use anyhow::{Context, Result};
use tracing::info;

use convoy_lib::cloud::LocalCloud;
use convoy_lib::target::Target;

use super::RunArgs;
use crate::output::{print_json, print_report, print_success};

pub fn cmd_apply(args: &RunArgs, verbose: bool) -> Result<()> {
  let loaded = args.load()?;
  let cloud = LocalCloud::open(&args.state)
    .with_context(|| format!("Failed to open state file: {}", args.state.display()))?;

  let (report, elapsed) = super::reconcile(loaded.config, loaded.tasks, Target::live(cloud.clone()))?;

  cloud
    .save()
    .with_context(|| format!("Failed to write state file: {}", args.state.display()))?;
  info!(path = %args.state.display(), "state saved");

  if args.output.is_json() {
    print_json(&report)?;
  } else {
    print_report(&report, elapsed, verbose);
  }

  report.into_result().context("Apply failed")?;
  if !args.output.is_json() {
    print_success(&format!("Cluster {} is up to date", loaded.manifest.cluster));
  }
  Ok(())
}

//! Implementation of the `convoy export` command.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use convoy_lib::cloud::LocalCloud;
use convoy_lib::target::{ExportTarget, Target};

use super::RunArgs;
use crate::output::{print_json, print_stat, print_success};

pub fn cmd_export(args: &RunArgs, out: &Path) -> Result<()> {
  let loaded = args.load()?;

  let mut export = ExportTarget::new(&loaded.manifest.cluster, out).with_deletions(args.prune);
  // Without a state file everything is exported as new.
  if args.state.exists() {
    let cloud = LocalCloud::open(&args.state)
      .with_context(|| format!("Failed to open state file: {}", args.state.display()))?;
    export = export.with_cloud(Arc::new(cloud));
  }

  let (report, _) = super::reconcile(loaded.config, loaded.tasks, Target::CodeExport(export.clone()))?;
  let report = report.into_result().context("Export failed")?;

  if args.output.is_json() {
    print_json(&export.document())?;
  } else {
    print_success(&format!("Exported {} task(s)", report.total()));
    print_stat("Definitions", &export.output_path().display().to_string());
    if export.includes_deletions() {
      print_stat("Deletions", &export.deletions_path().display().to_string());
    }
  }
  Ok(())
}

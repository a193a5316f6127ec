//! Implementation of the `convoy plan` command.
//!
//! Runs the manifest against a dry-run target observing the local state file
//! and prints what a live run would create, update and delete.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use convoy_lib::cloud::LocalCloud;
use convoy_lib::execute::RunReport;
use convoy_lib::target::{Plan, Target};

use super::RunArgs;
use crate::output::{format_duration, print_info, print_json, print_plan, print_warning};

#[derive(Serialize)]
struct PlanOutput<'a> {
  plan: &'a Plan,
  report: &'a RunReport,
}

pub fn cmd_plan(args: &RunArgs, verbose: bool) -> Result<()> {
  let loaded = args.load()?;
  let cloud = LocalCloud::open(&args.state)
    .with_context(|| format!("Failed to open state file: {}", args.state.display()))?;

  let target = Target::dry_run(Some(Arc::new(cloud)));
  let (report, elapsed) = super::reconcile(loaded.config, loaded.tasks, target.clone())?;
  let plan = target.as_dry_run().map(|t| t.plan()).unwrap_or_default();

  if args.output.is_json() {
    print_json(&PlanOutput {
      plan: &plan,
      report: &report,
    })?;
  } else {
    if plan.is_empty() {
      print_info("No changes. Infrastructure matches the manifest.");
    } else {
      print_plan(&plan, verbose);
      println!();
      print_info(&format!(
        "Plan: {} to change, {} to delete ({})",
        plan.mutations().count(),
        plan.deletions.len(),
        format_duration(elapsed)
      ));
    }
    for (name, task) in &report.tasks {
      for warning in &task.warnings {
        print_warning(&format!("{name}: {warning}"));
      }
    }
  }

  report.into_result().context("Plan failed")?;
  Ok(())
}

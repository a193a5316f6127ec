//! Implementation of the `convoy graph` command.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use convoy_lib::execute::{Reconciler, RunConfig};

use crate::output::{OutputFormat, print_json};

#[derive(Serialize)]
struct GraphOutput<'a> {
  waves: &'a [Vec<String>],
}

pub fn cmd_graph(manifest: &Path, output: OutputFormat) -> Result<()> {
  let (_, tasks) = super::load_manifest(manifest)?;
  let plan = Reconciler::new(RunConfig::default())
    .plan(&tasks)
    .context("Invalid task graph")?;

  if output.is_json() {
    return print_json(&GraphOutput { waves: plan.waves() });
  }

  for (idx, wave) in plan.waves().iter().enumerate() {
    println!("wave {}: {}", idx, wave.join(", "));
  }
  Ok(())
}

mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::RunArgs;
use output::{OutputFormat, print_error};

/// convoy - reconcile declared infrastructure with what actually exists
#[derive(Parser)]
#[command(name = "convoy")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Increase log verbosity (-v for info, -vv for debug)
  #[arg(short, long, global = true, action = ArgAction::Count)]
  verbose: u8,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Show what apply would change, without changing anything
  Plan {
    #[command(flatten)]
    run: RunArgs,
  },

  /// Reconcile the state file with the manifest
  Apply {
    #[command(flatten)]
    run: RunArgs,
  },

  /// Write the manifest as infrastructure-as-code definitions
  Export {
    #[command(flatten)]
    run: RunArgs,

    /// Directory the definitions are written to
    #[arg(long, default_value = "out")]
    out: PathBuf,
  },

  /// Print the execution waves of a manifest
  Graph {
    /// Path to the task manifest
    #[arg(default_value = "convoy.json")]
    manifest: PathBuf,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },
}

fn init_logging(verbose: u8) {
  let default = match verbose {
    0 => "warn",
    1 => "info",
    _ => "debug",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn main() {
  let cli = Cli::parse();
  init_logging(cli.verbose);

  let verbose = cli.verbose > 0;
  let result: Result<()> = match &cli.command {
    Commands::Plan { run } => cmd::cmd_plan(run, verbose),
    Commands::Apply { run } => cmd::cmd_apply(run, verbose),
    Commands::Export { run, out } => cmd::cmd_export(run, out),
    Commands::Graph { manifest, output } => cmd::cmd_graph(manifest, *output),
  };

  if let Err(e) = result {
    print_error(&format!("{:#}", e));
    std::process::exit(1);
  }
}

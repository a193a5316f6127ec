//! CLI output formatting utilities.
//!
//! Provides consistent formatting for terminal output including colored status
//! messages, run reports, dry-run plans, and human-readable durations.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use convoy_lib::execute::{FinishOutcome, RunReport, TaskAction, TaskState};
use convoy_lib::target::Plan;
use owo_colors::{OwoColorize, Stream};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ADD: &str = "+";
  pub const MODIFY: &str = "~";
  pub const REMOVE: &str = "-";
}

/// Millisecond precision is plenty for a run summary.
pub fn format_duration(duration: Duration) -> String {
  let millis = Duration::from_millis(duration.as_millis() as u64);
  humantime::format_duration(millis).to_string()
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

fn print_line(symbol: &str, color: fn(&str) -> String, subject: &str, detail: &str) {
  if detail.is_empty() {
    println!("  {} {}", color(symbol), subject);
  } else {
    println!(
      "  {} {} {}",
      color(symbol),
      subject,
      detail.if_supports_color(Stream::Stdout, |s| s.dimmed())
    );
  }
}

fn green(s: &str) -> String {
  s.if_supports_color(Stream::Stdout, |s| s.green()).to_string()
}

fn yellow(s: &str) -> String {
  s.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string()
}

fn red(s: &str) -> String {
  s.if_supports_color(Stream::Stdout, |s| s.red()).to_string()
}

fn plain(s: &str) -> String {
  s.if_supports_color(Stream::Stdout, |s| s.dimmed()).to_string()
}

/// Print the intended changes of a dry run, in execution order.
pub fn print_plan(plan: &Plan, verbose: bool) {
  for change in &plan.changes {
    let subject = format!("{}/{}", change.kind, change.key);
    match change.action {
      TaskAction::Create => print_line(symbols::ADD, green, &subject, &format!("(create {})", change.task)),
      TaskAction::Update => {
        let fields = change.changes.field_names().join(", ");
        print_line(symbols::MODIFY, yellow, &subject, &format!("(update {fields})"));
      }
      TaskAction::None | TaskAction::Delete => {
        if verbose {
          print_line(symbols::INFO, plain, &subject, "(unchanged)");
        }
      }
    }

    if verbose && change.action != TaskAction::None {
      for (field, diff) in change.changes.iter() {
        println!("      {} = {}", field, diff.desired());
      }
    }
  }

  for deletion in &plan.deletions {
    print_line(
      symbols::REMOVE,
      red,
      &format!("{}/{}", deletion.kind, deletion.key),
      "(delete)",
    );
  }
}

/// Print per-task outcomes followed by a summary.
pub fn print_report(report: &RunReport, elapsed: Duration, verbose: bool) {
  for (name, task) in &report.tasks {
    match (task.state, task.action) {
      (TaskState::Done, TaskAction::Create) => print_line(symbols::ADD, green, name, "created"),
      (TaskState::Done, TaskAction::Update) => print_line(symbols::MODIFY, yellow, name, "updated"),
      (TaskState::Done, _) => {
        if verbose {
          print_line(symbols::SUCCESS, plain, name, "unchanged");
        }
      }
      (TaskState::Failed, _) => {
        let error = task.error.as_ref().map(ToString::to_string).unwrap_or_default();
        print_line(symbols::ERROR, red, name, &error);
      }
      (TaskState::Blocked, _) => {
        let detail = format!("blocked by {}", task.blocked_by.as_deref().unwrap_or("?"));
        print_line(symbols::WARNING, yellow, name, &detail);
      }
      (state, _) => print_line(symbols::INFO, plain, name, &state.to_string()),
    }

    for warning in &task.warnings {
      print_warning(&format!("{name}: {warning}"));
    }
  }

  for id in &report.deletion_order {
    print_line(symbols::REMOVE, red, id, "deleted");
  }
  for (id, deletion) in &report.deletions {
    if deletion.state != TaskState::Done {
      let detail = match (&deletion.error, &deletion.blocked_by) {
        (Some(e), _) => e.to_string(),
        (None, Some(b)) => format!("blocked by {b}"),
        (None, None) => deletion.state.to_string(),
      };
      print_line(symbols::ERROR, red, id, &detail);
    }
  }

  for warning in &report.warnings {
    print_warning(warning);
  }
  if let Some(error) = &report.deletion_error {
    print_error(&format!("deletion pass failed: {error}"));
  }
  if let FinishOutcome::Failed(message) = &report.finish {
    print_error(&format!("finish failed: {message}"));
  }

  let s = report.summary();
  println!();
  print_stat("Created", &s.created.to_string());
  print_stat("Updated", &s.updated.to_string());
  print_stat("Unchanged", &s.unchanged.to_string());
  if s.deleted > 0 {
    print_stat("Deleted", &s.deleted.to_string());
  }
  if s.failed + s.blocked + s.cancelled > 0 {
    print_stat("Failed", &s.failed.to_string());
    print_stat("Blocked", &s.blocked.to_string());
    print_stat("Cancelled", &s.cancelled.to_string());
  }
  print_stat("Elapsed", &format_duration(elapsed));
}

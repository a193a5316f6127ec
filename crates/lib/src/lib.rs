//! convoy-lib: task-graph reconciliation engine
//!
//! This crate drives a set of declared infrastructure objects to their desired
//! state:
//! - `Task`: one declared object, with desired fields, a lifecycle policy and
//!   references to the tasks it depends on
//! - `TaskGraph`: validated dependency graph, scheduled in parallel waves
//! - `Target`: where rendered changes go (live cloud, dry-run plan, or exported
//!   definitions)
//! - `Reconciler`: runs the graph against a target and reports per-task outcomes

pub mod changes;
pub mod cloud;
pub mod execute;
pub mod lifecycle;
pub mod manifest;
pub mod retry;
pub mod target;
pub mod task;

#[cfg(test)]
mod util;

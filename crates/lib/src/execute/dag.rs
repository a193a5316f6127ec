//! Task dependency graph.
//!
//! Edges are not declared. They are read from each task's
//! [`dependencies`](crate::task::Task::dependencies), which a task computes
//! from the references held in its payload. The graph is validated once, up
//! front: every check here fails before any task has run.

use std::collections::{BTreeMap, HashMap};

use petgraph::Direction;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};

use crate::cloud::{CloudResource, ResourceId};
use crate::task::TaskMap;

use super::types::GraphError;

/// A DAG of task names, with an edge from each dependency to its dependent.
#[derive(Debug)]
pub struct TaskGraph {
  graph: DiGraph<String, ()>,
  nodes: HashMap<String, NodeIndex>,
}

impl TaskGraph {
  /// Build and validate the graph of a task map.
  ///
  /// # Errors
  ///
  /// In the order checked:
  /// - `AmbiguousOwnership` if two tasks of one kind share a cloud key
  /// - `SelfReference` if a task references itself
  /// - `DanglingReference` if a task references a name not in the map
  /// - `Cycle` naming the tasks of a dependency cycle
  pub fn build(tasks: &TaskMap) -> Result<Self, GraphError> {
    check_ownership(tasks)?;

    let mut graph = DiGraph::new();
    let mut nodes = HashMap::new();

    for name in tasks.names() {
      let idx = graph.add_node(name.to_string());
      nodes.insert(name.to_string(), idx);
    }

    for (name, task) in tasks.iter() {
      let dependent_idx = nodes[name];
      for dep in task.dependencies() {
        if dep.name() == name {
          return Err(GraphError::SelfReference { task: name.to_string() });
        }
        let Some(&dep_idx) = nodes.get(dep.name()) else {
          return Err(GraphError::DanglingReference {
            task: name.to_string(),
            reference: dep.name().to_string(),
          });
        };
        graph.add_edge(dep_idx, dependent_idx, ());
      }
    }

    let dag = Self { graph, nodes };
    dag.verify_acyclic()?;
    Ok(dag)
  }

  fn verify_acyclic(&self) -> Result<(), GraphError> {
    if toposort(&self.graph, None).is_ok() {
      return Ok(());
    }

    let cycle = tarjan_scc(&self.graph)
      .into_iter()
      .find(|component| component.len() > 1)
      .unwrap_or_default();
    let mut tasks: Vec<String> = cycle.into_iter().map(|idx| self.graph[idx].clone()).collect();
    tasks.sort();
    Err(GraphError::Cycle { tasks })
  }

  /// Group tasks into waves: every task sits in a wave strictly after the
  /// waves of all its dependencies. Names are sorted within a wave.
  pub fn plan(&self) -> ExecutionPlan {
    let waves = kahn_levels(&self.graph)
      .into_iter()
      .map(|level| {
        let mut names: Vec<String> = level.into_iter().map(|idx| self.graph[idx].clone()).collect();
        names.sort();
        names
      })
      .collect();
    ExecutionPlan::new(waves)
  }

  /// Direct dependencies of a task, sorted.
  pub fn dependencies(&self, name: &str) -> Vec<String> {
    self.neighbors(name, Direction::Incoming)
  }

  /// Tasks that directly depend on a task, sorted.
  pub fn dependents(&self, name: &str) -> Vec<String> {
    self.neighbors(name, Direction::Outgoing)
  }

  fn neighbors(&self, name: &str, direction: Direction) -> Vec<String> {
    let Some(&idx) = self.nodes.get(name) else {
      return Vec::new();
    };
    let mut names: Vec<String> = self
      .graph
      .neighbors_directed(idx, direction)
      .map(|n| self.graph[n].clone())
      .collect();
    names.sort();
    names.dedup();
    names
  }

  pub fn len(&self) -> usize {
    self.graph.node_count()
  }

  pub fn is_empty(&self) -> bool {
    self.graph.node_count() == 0
  }
}

fn check_ownership(tasks: &TaskMap) -> Result<(), GraphError> {
  let mut owners: BTreeMap<ResourceId, Vec<String>> = BTreeMap::new();
  for (name, task) in tasks.iter() {
    let key = task.cloud_key().unwrap_or(name);
    owners
      .entry(ResourceId::new(task.kind(), key))
      .or_default()
      .push(name.to_string());
  }

  match owners.into_iter().find(|(_, names)| names.len() > 1) {
    Some((id, tasks)) => Err(GraphError::AmbiguousOwnership {
      kind: id.kind,
      key: id.key,
      tasks,
    }),
    None => Ok(()),
  }
}

/// Kahn's algorithm, level by level. Nodes left over by a cycle end up in one
/// final level.
fn kahn_levels<N>(graph: &DiGraph<N, ()>) -> Vec<Vec<NodeIndex>> {
  let mut in_degree: HashMap<NodeIndex, usize> = graph
    .node_indices()
    .map(|idx| (idx, graph.neighbors_directed(idx, Direction::Incoming).count()))
    .collect();
  let mut remaining: Vec<NodeIndex> = graph.node_indices().collect();
  let mut levels = Vec::new();

  while !remaining.is_empty() {
    let (ready, rest): (Vec<_>, Vec<_>) = remaining.into_iter().partition(|idx| in_degree[idx] == 0);
    if ready.is_empty() {
      levels.push(rest);
      break;
    }

    for &idx in &ready {
      for neighbor in graph.neighbors_directed(idx, Direction::Outgoing) {
        if let Some(deg) = in_degree.get_mut(&neighbor) {
          *deg = deg.saturating_sub(1);
        }
      }
    }

    levels.push(ready);
    remaining = rest;
  }

  levels
}

/// Ordered waves of task names for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
  waves: Vec<Vec<String>>,
  index: HashMap<String, usize>,
}

impl ExecutionPlan {
  pub fn new(waves: Vec<Vec<String>>) -> Self {
    let index = waves
      .iter()
      .enumerate()
      .flat_map(|(i, wave)| wave.iter().map(move |name| (name.clone(), i)))
      .collect();
    Self { waves, index }
  }

  pub fn waves(&self) -> &[Vec<String>] {
    &self.waves
  }

  pub fn wave_of(&self, task: &str) -> Option<usize> {
    self.index.get(task).copied()
  }

  pub fn task_count(&self) -> usize {
    self.index.len()
  }
}

/// Order orphaned objects for deletion: the reverse of the waves they would
/// have been created in, so dependents go before what they depend on.
///
/// Only dependencies among the orphans themselves matter; objects within a
/// wave are sorted by identity.
pub fn deletion_waves(orphans: &[CloudResource]) -> Vec<Vec<CloudResource>> {
  let mut graph: DiGraph<usize, ()> = DiGraph::new();
  let mut nodes = HashMap::new();
  for (i, orphan) in orphans.iter().enumerate() {
    nodes.insert(orphan.id(), graph.add_node(i));
  }

  for orphan in orphans {
    let dependent = nodes[&orphan.id()];
    for dep in &orphan.depends_on {
      if let Some(&dep_idx) = nodes.get(dep)
        && dep_idx != dependent
      {
        graph.add_edge(dep_idx, dependent, ());
      }
    }
  }

  let mut waves: Vec<Vec<CloudResource>> = kahn_levels(&graph)
    .into_iter()
    .map(|level| {
      let mut wave: Vec<CloudResource> = level.into_iter().map(|idx| orphans[graph[idx]].clone()).collect();
      wave.sort_by_key(|r| r.id());
      wave
    })
    .collect();
  waves.reverse();
  waves
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::lifecycle::Lifecycle;
  use crate::task::{Fields, Resource, Value};

  fn refs(names: &[&str]) -> Fields {
    names
      .iter()
      .enumerate()
      .map(|(i, n)| (format!("ref{}", i), Value::reference(*n)))
      .collect()
  }

  fn map(tasks: Vec<Resource>) -> TaskMap {
    let mut map = TaskMap::new();
    for t in tasks {
      map.insert(t).unwrap();
    }
    map
  }

  #[test]
  fn empty_map() {
    let graph = TaskGraph::build(&TaskMap::new()).unwrap();
    assert!(graph.is_empty());
    assert!(graph.plan().waves().is_empty());
  }

  #[test]
  fn linear_chain_is_one_task_per_wave() {
    let tasks = map(vec![
      Resource::new("instance", "i", refs(&["s"])),
      Resource::new("network", "n", Fields::new()),
      Resource::new("subnet", "s", refs(&["n"])),
    ]);
    let plan = TaskGraph::build(&tasks).unwrap().plan();

    assert_eq!(plan.waves(), &[vec!["n"], vec!["s"], vec!["i"]]);
    assert_eq!(plan.wave_of("i"), Some(2));
  }

  #[test]
  fn diamond_dependency() {
    let tasks = map(vec![
      Resource::new("network", "n", Fields::new()),
      Resource::new("subnet", "a", refs(&["n"])),
      Resource::new("subnet", "b", refs(&["n"])),
      Resource::new("lb", "lb", refs(&["a", "b"])),
    ]);
    let graph = TaskGraph::build(&tasks).unwrap();
    let plan = graph.plan();

    assert_eq!(plan.waves(), &[vec!["n"], vec!["a", "b"], vec!["lb"]]);
    assert_eq!(graph.dependencies("lb"), vec!["a", "b"]);
    assert_eq!(graph.dependents("n"), vec!["a", "b"]);
  }

  #[test]
  fn every_task_after_its_dependencies() {
    let tasks = map(vec![
      Resource::new("network", "n", Fields::new()),
      Resource::new("sg", "sg", refs(&["n"])),
      Resource::new("subnet", "s", refs(&["n"])),
      Resource::new("instance", "i", refs(&["s", "sg", "role"])),
      Resource::new("iam_role", "role", Fields::new()),
      Resource::new("dns", "api", refs(&["i"])),
    ]);
    let graph = TaskGraph::build(&tasks).unwrap();
    let plan = graph.plan();

    assert_eq!(plan.task_count(), tasks.len());
    for name in tasks.names() {
      for dep in graph.dependencies(name) {
        assert!(plan.wave_of(&dep).unwrap() < plan.wave_of(name).unwrap(), "{dep} before {name}");
      }
    }
  }

  #[test]
  fn cycle_names_its_tasks() {
    let tasks = map(vec![
      Resource::new("a", "a", refs(&["c"])),
      Resource::new("b", "b", refs(&["a"])),
      Resource::new("c", "c", refs(&["b"])),
      Resource::new("d", "d", Fields::new()),
    ]);

    assert_eq!(
      TaskGraph::build(&tasks).unwrap_err(),
      GraphError::Cycle {
        tasks: vec!["a".to_string(), "b".to_string(), "c".to_string()],
      }
    );
  }

  #[test]
  fn self_reference_rejected() {
    let tasks = map(vec![Resource::new("network", "n", refs(&["n"]))]);
    assert_eq!(
      TaskGraph::build(&tasks).unwrap_err(),
      GraphError::SelfReference { task: "n".to_string() }
    );
  }

  #[test]
  fn dangling_reference_rejected() {
    let tasks = map(vec![Resource::new("subnet", "s", refs(&["ghost"]))]);
    assert_eq!(
      TaskGraph::build(&tasks).unwrap_err(),
      GraphError::DanglingReference {
        task: "s".to_string(),
        reference: "ghost".to_string(),
      }
    );
  }

  #[test]
  fn shared_cloud_key_is_ambiguous() {
    let tasks = map(vec![
      Resource::new("subnet", "subnet-a", Fields::new()).with_key("subnet-0123"),
      Resource::new("subnet", "subnet-b", Fields::new()).with_key("subnet-0123"),
      Resource::new("network", "vpc", Fields::new()).with_key("subnet-0123"),
    ]);

    assert_eq!(
      TaskGraph::build(&tasks).unwrap_err(),
      GraphError::AmbiguousOwnership {
        kind: "subnet".to_string(),
        key: "subnet-0123".to_string(),
        tasks: vec!["subnet-a".to_string(), "subnet-b".to_string()],
      }
    );
  }

  #[test]
  fn lifecycle_does_not_change_ordering() {
    let tasks = map(vec![
      Resource::new("network", "n", Fields::new()).with_lifecycle(Lifecycle::ExistsAndValidates),
      Resource::new("subnet", "s", refs(&["n"])),
    ]);
    assert_eq!(TaskGraph::build(&tasks).unwrap().plan().waves(), &[vec!["n"], vec!["s"]]);
  }

  #[test]
  fn deletion_is_reverse_creation_order() {
    let network = CloudResource::new("network", "vpc-1", Fields::new());
    let subnet = CloudResource::new("subnet", "subnet-1", Fields::new()).with_dependency(network.id());
    let instance = CloudResource::new("instance", "i-1", Fields::new()).with_dependency(subnet.id());
    let stray = CloudResource::new("dns", "old", Fields::new()).with_dependency(ResourceId::new("network", "kept"));

    let waves = deletion_waves(&[network.clone(), stray.clone(), instance.clone(), subnet.clone()]);
    let ids: Vec<Vec<String>> = waves
      .iter()
      .map(|w| w.iter().map(|r| r.id().to_string()).collect())
      .collect();

    assert_eq!(
      ids,
      vec![
        vec!["instance/i-1".to_string()],
        vec!["subnet/subnet-1".to_string()],
        vec!["dns/old".to_string(), "network/vpc-1".to_string()],
      ]
    );
  }
}

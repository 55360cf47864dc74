use std::collections::HashMap;
use std::path::Path;

use kiln_graph::{DAG, Node};

use crate::error::GraphError;
use crate::task::TaskSpec;

/// Identifier of a task within a [`BuildGraph`] and its [`FrozenGraph`].
#[derive(Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Hash, Debug)]
pub struct TaskId(usize);

/// Mutable collection of task specifications, prior to freezing.
///
/// Tasks are registered by name; producer-consumer edges are not declared but inferred at
/// [`BuildGraph::freeze`] time from the intersection of declared output and input paths.
#[derive(Default)]
pub struct BuildGraph {
  specs: Vec<TaskSpec>,
  by_name: HashMap<String, TaskId>,
}

impl BuildGraph {
  /// Creates an empty graph.
  #[inline]
  pub fn new() -> Self { Default::default() }

  /// Registers `spec`, failing with [`GraphError::DuplicateTask`] if a task with the same name is
  /// already registered, or [`GraphError::OutputConflict`] if another task already owns one of its
  /// declared output paths.
  pub fn add_task(&mut self, spec: TaskSpec) -> Result<TaskId, GraphError> {
    if self.by_name.contains_key(spec.name()) {
      return Err(GraphError::DuplicateTask(spec.name().to_string()));
    }
    for output in spec.outputs() {
      for existing in &self.specs {
        if existing.outputs().iter().any(|o| o == output) {
          return Err(GraphError::OutputConflict {
            first: existing.name().to_string(),
            second: spec.name().to_string(),
            path: output.clone(),
          });
        }
      }
    }
    let id = TaskId(self.specs.len());
    self.by_name.insert(spec.name().to_string(), id);
    self.specs.push(spec);
    Ok(id)
  }

  /// Returns the id of the task named `name`, if registered.
  #[inline]
  pub fn get(&self, name: &str) -> Option<TaskId> {
    self.by_name.get(name).copied()
  }

  /// Infers producer-consumer edges and validates acyclicity, yielding an immutable
  /// [`FrozenGraph`]. Fails with [`GraphError::Cycle`] naming the tasks on the edge that closed
  /// the cycle; this is fatal and aborts the build before any execution.
  pub fn freeze(self) -> Result<FrozenGraph, GraphError> {
    let mut dag = DAG::new();
    let nodes: Vec<Node> = (0..self.specs.len()).map(|i| dag.add_node(TaskId(i))).collect();
    for (consumer_index, consumer) in self.specs.iter().enumerate() {
      for (producer_index, producer) in self.specs.iter().enumerate() {
        if consumer_index == producer_index {
          continue;
        }
        let connected = producer.outputs().iter().any(|output| {
          consumer.inputs().iter().filter_map(|input| input.path()).any(|input| paths_overlap(output, input))
        });
        if connected {
          // Edge from depender (consumer) to dependee (producer).
          if let Err(kiln_graph::Error::CycleDetected) = dag.add_edge(nodes[consumer_index], nodes[producer_index]) {
            return Err(GraphError::Cycle {
              depender: consumer.name().to_string(),
              dependee: producer.name().to_string(),
            });
          }
        }
      }
    }
    let order = dag.topological_order().iter().map(|node| *dag.get_node_data(node).unwrap()).collect();
    Ok(FrozenGraph { specs: self.specs, dag, nodes, order })
  }
}

/// Returns `true` when `a` and `b` denote the same path or one contains the other, so that a file
/// input under a produced output directory (or the reverse) still orders the two tasks.
fn paths_overlap(a: &Path, b: &Path) -> bool {
  a == b || a.starts_with(b) || b.starts_with(a)
}

/// Immutable task graph with inferred edges and a deterministic topological order.
#[derive(Debug)]
pub struct FrozenGraph {
  specs: Vec<TaskSpec>,
  dag: DAG<TaskId>,
  nodes: Vec<Node>,
  order: Vec<TaskId>,
}

impl FrozenGraph {
  /// Returns the number of tasks in the graph.
  #[inline]
  pub fn len(&self) -> usize { self.specs.len() }

  /// Returns `true` if the graph has no tasks.
  #[inline]
  pub fn is_empty(&self) -> bool { self.specs.is_empty() }

  /// Returns the specification of `task`.
  #[inline]
  pub fn spec(&self, task: TaskId) -> &TaskSpec { &self.specs[task.0] }

  /// Returns the id of the task named `name`, if registered.
  pub fn get(&self, name: &str) -> Option<TaskId> {
    self.specs.iter().position(|s| s.name() == name).map(TaskId)
  }

  /// Returns all tasks in topological order: producers before consumers, registration order as the
  /// tiebreak among unrelated tasks.
  #[inline]
  pub fn topological_order(&self) -> &[TaskId] { &self.order }

  /// Returns the direct producers `task` consumes from.
  pub fn producers(&self, task: TaskId) -> impl Iterator<Item=TaskId> + '_ {
    self.dag.get_outgoing_edge_nodes(self.nodes[task.0]).map(move |node| *self.dag.get_node_data(node).unwrap())
  }

  /// Returns the direct consumers of `task`'s outputs.
  pub fn consumers(&self, task: TaskId) -> impl Iterator<Item=TaskId> + '_ {
    self.dag.get_incoming_edge_nodes(self.nodes[task.0]).map(move |node| *self.dag.get_node_data(node).unwrap())
  }

  /// Returns `task` plus all its transitive producers, the set that must be considered to bring
  /// `task` up to date.
  pub fn with_transitive_producers(&self, task: TaskId) -> Vec<TaskId> {
    let mut result = vec![task];
    result.extend(self.dag.descendants(self.nodes[task.0]).into_iter().map(|node| *self.dag.get_node_data(node).unwrap()));
    result
  }
}


#[cfg(test)]
mod test {
  use assert_matches::assert_matches;

  use crate::error::ActionError;
  use crate::task::{ActionContext, TaskSpec};

  use super::*;

  fn noop(_: &mut ActionContext) -> Result<(), ActionError> { Ok(()) }

  fn task(name: &str, inputs: &[&str], outputs: &[&str]) -> TaskSpec {
    let mut builder = TaskSpec::builder(name);
    for input in inputs {
      builder = builder.input_file(*input);
    }
    for output in outputs {
      builder = builder.output(*output);
    }
    builder.action(noop)
  }

  #[test]
  fn duplicate_task_name_is_rejected() {
    let mut graph = BuildGraph::new();
    graph.add_task(task("compile", &[], &["a.o"])).unwrap();
    let result = graph.add_task(task("compile", &[], &["b.o"]));
    assert_matches!(result, Err(GraphError::DuplicateTask(name)) if name == "compile");
  }

  #[test]
  fn output_conflict_is_rejected() {
    let mut graph = BuildGraph::new();
    graph.add_task(task("compile_debug", &[], &["out/classes"])).unwrap();
    let result = graph.add_task(task("compile_release", &[], &["out/classes"]));
    assert_matches!(result, Err(GraphError::OutputConflict { first, second, .. }) => {
      assert_eq!(first, "compile_debug");
      assert_eq!(second, "compile_release");
    });
  }

  #[test]
  fn edges_are_inferred_from_path_intersection() {
    let mut graph = BuildGraph::new();
    let compile = graph.add_task(task("compile", &["a.src"], &["a.o"])).unwrap();
    let link = graph.add_task(task("link", &["a.o"], &["a.bin"])).unwrap();
    let unrelated = graph.add_task(task("docs", &["a.md"], &["a.html"])).unwrap();
    let frozen = graph.freeze().unwrap();

    assert_eq!(frozen.producers(link).collect::<Vec<_>>(), vec![compile]);
    assert_eq!(frozen.consumers(compile).collect::<Vec<_>>(), vec![link]);
    assert!(frozen.producers(unrelated).next().is_none());
    assert_eq!(frozen.with_transitive_producers(link), vec![link, compile]);
  }

  #[test]
  fn nested_output_paths_are_connected() {
    let mut graph = BuildGraph::new();
    let gen = graph.add_task(task("generate", &[], &["gen"])).unwrap();
    // Consumes a file inside the produced directory.
    let use_gen = graph.add_task(task("use", &["gen/model.rs"], &["use.o"])).unwrap();
    let frozen = graph.freeze().unwrap();
    assert_eq!(frozen.producers(use_gen).collect::<Vec<_>>(), vec![gen]);
  }

  #[test]
  fn topological_order_is_deterministic() {
    let mut graph = BuildGraph::new();
    let merge = graph.add_task(task("merge", &["a.o", "b.o"], &["merged"])).unwrap();
    let a = graph.add_task(task("a", &["a.src"], &["a.o"])).unwrap();
    let b = graph.add_task(task("b", &["b.src"], &["b.o"])).unwrap();
    let frozen = graph.freeze().unwrap();
    // Producers first; among unrelated tasks, registration order.
    assert_eq!(frozen.topological_order(), &[a, b, merge]);
  }

  #[test]
  fn cycle_is_fatal() {
    let mut graph = BuildGraph::new();
    graph.add_task(task("a", &["b.out"], &["a.out"])).unwrap();
    graph.add_task(task("b", &["a.out"], &["b.out"])).unwrap();
    assert_matches!(graph.freeze(), Err(GraphError::Cycle { .. }));
  }
}

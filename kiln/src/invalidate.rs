use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

use crate::fingerprint::{Fingerprint, has_changed};
use crate::fs::metadata;
use crate::graph::{FrozenGraph, TaskId};
use crate::ledger::Ledger;

/// Why a task was marked dirty. Exposed for diagnostics and test assertions.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum DirtyReason {
  /// The task has no ledger record: it never completed successfully before.
  NeverBuilt,
  /// The fingerprint of the named input changed since the last successful completion.
  InputChanged(String),
  /// A declared output is missing on disk.
  OutputMissing(PathBuf),
  /// A transitive producer is dirty, so this task's inputs will change.
  DependencyDirty(String),
}

impl Display for DirtyReason {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match self {
      DirtyReason::NeverBuilt => f.write_str("never built"),
      DirtyReason::InputChanged(key) => write!(f, "input `{}` changed", key),
      DirtyReason::OutputMissing(path) => write!(f, "output `{}` is missing", path.display()),
      DirtyReason::DependencyDirty(name) => write!(f, "producer task `{}` is dirty", name),
    }
  }
}

/// Computes the minimal set of tasks requiring re-execution, with the reason per task.
///
/// A task is dirty iff it was never built, any declared input's fingerprint changed, any declared
/// output is missing on disk, or any upstream producer is dirty (transitive propagation). Tasks in
/// `scope` with none of these conditions are up to date and must never be invoked.
///
/// `current` holds the freshly computed input fingerprints per task, keyed by
/// [`Input::ledger_key`](crate::Input::ledger_key); `scope` restricts the computation to the
/// requested tasks and their transitive producers.
pub fn compute_dirty_set(
  graph: &FrozenGraph,
  scope: &HashSet<TaskId>,
  ledger: &Ledger,
  current: &HashMap<TaskId, BTreeMap<String, Fingerprint>>,
) -> HashMap<TaskId, DirtyReason> {
  let mut dirty = HashMap::new();
  for &task in graph.topological_order() {
    if !scope.contains(&task) {
      continue;
    }
    if let Some(reason) = dirty_reason(graph, task, ledger, current, &dirty) {
      dirty.insert(task, reason);
    }
  }
  dirty
}

fn dirty_reason(
  graph: &FrozenGraph,
  task: TaskId,
  ledger: &Ledger,
  current: &HashMap<TaskId, BTreeMap<String, Fingerprint>>,
  dirty: &HashMap<TaskId, DirtyReason>,
) -> Option<DirtyReason> {
  let spec = graph.spec(task);
  // Producers precede consumers in the traversal, so their dirtiness is already known.
  for producer in graph.producers(task) {
    if dirty.contains_key(&producer) {
      return Some(DirtyReason::DependencyDirty(graph.spec(producer).name().to_string()));
    }
  }
  let Some(record) = ledger.get(spec.name()) else {
    return Some(DirtyReason::NeverBuilt);
  };
  let current = &current[&task];
  for (key, fingerprint) in current {
    match record.inputs.get(key) {
      None => return Some(DirtyReason::InputChanged(key.clone())),
      Some(previous) if has_changed(previous, fingerprint) => {
        return Some(DirtyReason::InputChanged(key.clone()));
      }
      Some(_) => {}
    }
  }
  // An input declared before but not now also dirties the task.
  if let Some(key) = record.inputs.keys().find(|key| !current.contains_key(*key)) {
    return Some(DirtyReason::InputChanged(key.clone()));
  }
  for output in spec.outputs() {
    match metadata(output) {
      Ok(Some(_)) => {}
      // Missing or unreadable both force re-execution.
      Ok(None) | Err(_) => return Some(DirtyReason::OutputMissing(output.clone())),
    }
  }
  None
}


#[cfg(test)]
mod test {
  use std::fs;
  use std::path::Path;

  use assert_matches::assert_matches;
  use dev_shared::fs::create_temp_dir;

  use crate::error::ActionError;
  use crate::graph::BuildGraph;
  use crate::ledger::TaskRecord;
  use crate::task::{ActionContext, TaskSpec};

  use super::*;

  fn noop(_: &mut ActionContext) -> Result<(), ActionError> { Ok(()) }

  fn task(dir: &Path, name: &str, inputs: &[&str], outputs: &[&str]) -> TaskSpec {
    let mut builder = TaskSpec::builder(name);
    for input in inputs {
      builder = builder.input_file(dir.join(input));
    }
    for output in outputs {
      builder = builder.output(dir.join(output));
    }
    builder.action(noop)
  }

  struct Fixture {
    graph: FrozenGraph,
    compile: TaskId,
    link: TaskId,
    docs: TaskId,
  }

  /// compile: a.src -> a.o; link: a.o -> a.bin; docs: a.md -> a.html (unrelated).
  fn fixture(dir: &Path) -> Fixture {
    fs::write(dir.join("a.src"), "source").unwrap();
    fs::write(dir.join("a.md"), "docs").unwrap();
    let mut graph = BuildGraph::new();
    let compile = graph.add_task(task(dir, "compile", &["a.src"], &["a.o"])).unwrap();
    let link = graph.add_task(task(dir, "link", &["a.o"], &["a.bin"])).unwrap();
    let docs = graph.add_task(task(dir, "docs", &["a.md"], &["a.html"])).unwrap();
    let graph = graph.freeze().unwrap();
    Fixture { graph, compile, link, docs }
  }

  fn fingerprints(graph: &FrozenGraph) -> HashMap<TaskId, BTreeMap<String, Fingerprint>> {
    graph.topological_order().iter().map(|&task| {
      let map = graph.spec(task).inputs().iter()
        .map(|input| (input.ledger_key(), input.fingerprint().unwrap()))
        .collect();
      (task, map)
    }).collect()
  }

  fn scope(graph: &FrozenGraph) -> HashSet<TaskId> {
    graph.topological_order().iter().copied().collect()
  }

  fn record_for(graph: &FrozenGraph, task: TaskId, current: &HashMap<TaskId, BTreeMap<String, Fingerprint>>) -> TaskRecord {
    TaskRecord { inputs: current[&task].clone(), ..TaskRecord::default() }
  }

  /// Simulates a completed build: all outputs on disk, all fingerprints recorded.
  fn completed_build(dir: &Path, fixture: &Fixture) -> (Ledger, HashMap<TaskId, BTreeMap<String, Fingerprint>>) {
    for output in ["a.o", "a.bin", "a.html"] {
      fs::write(dir.join(output), output).unwrap();
    }
    let current = fingerprints(&fixture.graph);
    let mut ledger = Ledger::new();
    for &task in fixture.graph.topological_order() {
      ledger.record(fixture.graph.spec(task).name(), record_for(&fixture.graph, task, &current));
    }
    (ledger, current)
  }

  #[test]
  fn never_built_tasks_are_dirty() {
    let temp_dir = create_temp_dir();
    let fixture = fixture(temp_dir.path());
    let current = fingerprints(&fixture.graph);
    let dirty = compute_dirty_set(&fixture.graph, &scope(&fixture.graph), &Ledger::new(), &current);
    assert_eq!(dirty.len(), 3);
    assert_matches!(dirty.get(&fixture.compile), Some(DirtyReason::NeverBuilt));
  }

  #[test]
  fn null_build_is_fully_up_to_date() {
    let temp_dir = create_temp_dir();
    let fixture = fixture(temp_dir.path());
    let (ledger, current) = completed_build(temp_dir.path(), &fixture);
    let dirty = compute_dirty_set(&fixture.graph, &scope(&fixture.graph), &ledger, &current);
    assert!(dirty.is_empty());
  }

  #[test]
  fn changed_input_dirties_task_and_consumers_only() {
    let temp_dir = create_temp_dir();
    let fixture = fixture(temp_dir.path());
    let (ledger, _) = completed_build(temp_dir.path(), &fixture);

    fs::write(temp_dir.path().join("a.src"), "changed source").unwrap();
    let current = fingerprints(&fixture.graph);
    let dirty = compute_dirty_set(&fixture.graph, &scope(&fixture.graph), &ledger, &current);

    assert_matches!(dirty.get(&fixture.compile), Some(DirtyReason::InputChanged(key)) if key.contains("a.src"));
    assert_matches!(dirty.get(&fixture.link), Some(DirtyReason::DependencyDirty(name)) if name == "compile");
    assert!(!dirty.contains_key(&fixture.docs), "unrelated task must stay clean");
  }

  #[test]
  fn missing_output_dirties_only_its_task_and_consumers() {
    let temp_dir = create_temp_dir();
    let fixture = fixture(temp_dir.path());
    let (ledger, current) = completed_build(temp_dir.path(), &fixture);

    fs::remove_file(temp_dir.path().join("a.o")).unwrap();
    let dirty = compute_dirty_set(&fixture.graph, &scope(&fixture.graph), &ledger, &current);

    assert_matches!(dirty.get(&fixture.compile), Some(DirtyReason::OutputMissing(path)) if path.ends_with("a.o"));
    assert_matches!(dirty.get(&fixture.link), Some(DirtyReason::DependencyDirty(_)));
    assert!(!dirty.contains_key(&fixture.docs));
  }

  #[test]
  fn scope_restricts_computation() {
    let temp_dir = create_temp_dir();
    let fixture = fixture(temp_dir.path());
    let current = fingerprints(&fixture.graph);
    let scope: HashSet<TaskId> = fixture.graph.with_transitive_producers(fixture.docs).into_iter().collect();
    let dirty = compute_dirty_set(&fixture.graph, &scope, &Ledger::new(), &current);
    assert_eq!(dirty.len(), 1);
    assert!(dirty.contains_key(&fixture.docs));
  }
}

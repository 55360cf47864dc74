use std::collections::BTreeMap;
use std::fmt::{self, Debug, Formatter};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::ActionError;
use crate::fingerprint::Input;

/// Status of a task for the most recent build invocation. Reset to [`TaskStatus::Pending`] at the
/// start of every invocation.
#[derive(Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Hash, Debug)]
pub enum TaskStatus {
  /// Not (yet) considered: either never scheduled, or skipped because an upstream producer failed.
  Pending,
  /// No dirtying condition applied: inputs unchanged, outputs present, producers clean. Never
  /// invoked, outputs left byte-for-byte untouched.
  UpToDate,
  /// The task's action ran and produced its outputs.
  Executed,
  /// The task's outputs were copied out of the artifact cache instead of being rebuilt.
  FromCache,
  /// The task's action failed.
  Failed,
}

impl TaskStatus {
  /// Returns `true` for statuses where the build produced (or reproduced) this task's outputs.
  #[inline]
  pub fn did_produce_outputs(self) -> bool {
    matches!(self, TaskStatus::Executed | TaskStatus::FromCache)
  }
}

/// The work of a task: an external build step invoked as a black box.
///
/// Implementations must be [`Send`] and [`Sync`]: actions of unrelated tasks run concurrently on
/// the worker pool. An action reads its declared inputs, writes exactly its declared outputs, and
/// reports progress or diagnostics through the captured streams on [`ActionContext`].
pub trait Action: Send + Sync {
  /// Runs the build step. All declared outputs must exist when this returns `Ok`.
  fn run(&self, context: &mut ActionContext) -> Result<(), ActionError>;
}

impl<F: Fn(&mut ActionContext) -> Result<(), ActionError> + Send + Sync> Action for F {
  #[inline]
  fn run(&self, context: &mut ActionContext) -> Result<(), ActionError> { self(context) }
}

/// Per-invocation state passed down to an [`Action`]: the task's identity, its resolved scalar
/// inputs, its declared outputs, and captured output streams.
pub struct ActionContext {
  name: String,
  values: BTreeMap<String, String>,
  outputs: Vec<PathBuf>,
  stdout: Vec<u8>,
  stderr: Vec<u8>,
}

impl ActionContext {
  pub(crate) fn new(name: String, values: BTreeMap<String, String>, outputs: Vec<PathBuf>) -> Self {
    Self { name, values, outputs, stdout: Vec::new(), stderr: Vec::new() }
  }

  /// Returns the name of the executing task.
  #[inline]
  pub fn task_name(&self) -> &str { &self.name }

  /// Returns the value of the declared scalar input `key`, after overrides were applied.
  #[inline]
  pub fn value(&self, key: &str) -> Option<&str> {
    self.values.get(key).map(String::as_str)
  }

  /// Returns the task's declared output paths, in declaration order.
  #[inline]
  pub fn outputs(&self) -> &[PathBuf] { &self.outputs }

  /// Returns a writer for the task's captured standard output.
  #[inline]
  pub fn stdout(&mut self) -> &mut impl Write { &mut self.stdout }

  /// Returns a writer for the task's captured standard error.
  #[inline]
  pub fn stderr(&mut self) -> &mut impl Write { &mut self.stderr }

  pub(crate) fn into_captured(self) -> CapturedOutput {
    CapturedOutput {
      stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
      stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
    }
  }
}

/// Captured stdout/stderr text of one task execution, kept for failure diagnostics.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct CapturedOutput {
  /// Captured standard output text.
  pub stdout: String,
  /// Captured standard error text.
  pub stderr: String,
}

/// Immutable description of a unit of build work: a name, declared inputs, declared output paths,
/// and the action that produces the outputs.
///
/// Built with [`TaskSpec::builder`] before the graph is frozen; never mutated afterwards.
#[derive(Clone)]
pub struct TaskSpec {
  name: String,
  inputs: Vec<Input>,
  outputs: Vec<PathBuf>,
  action: Arc<dyn Action>,
}

impl TaskSpec {
  /// Starts building a task specification named `name`.
  pub fn builder(name: impl Into<String>) -> TaskSpecBuilder {
    TaskSpecBuilder {
      name: name.into(),
      inputs: Vec::new(),
      outputs: Vec::new(),
    }
  }

  /// Returns the task's name.
  #[inline]
  pub fn name(&self) -> &str { &self.name }

  /// Returns the declared inputs, in declaration order.
  #[inline]
  pub fn inputs(&self) -> &[Input] { &self.inputs }

  /// Returns the declared output paths, in declaration order.
  #[inline]
  pub fn outputs(&self) -> &[PathBuf] { &self.outputs }

  /// Returns the action that produces the outputs.
  #[inline]
  pub fn action(&self) -> &dyn Action { self.action.as_ref() }

  /// Returns the declared inputs with value overrides applied: a `Value` input whose key appears in
  /// `overrides` is replaced by one carrying the overridden value.
  pub fn resolved_inputs(&self, overrides: &BTreeMap<String, String>) -> Vec<Input> {
    self.inputs.iter().map(|input| match input {
      Input::Value { key, .. } if overrides.contains_key(key) => Input::Value {
        key: key.clone(),
        value: overrides[key].clone(),
      },
      other => other.clone(),
    }).collect()
  }
}

impl Debug for TaskSpec {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskSpec")
      .field("name", &self.name)
      .field("inputs", &self.inputs)
      .field("outputs", &self.outputs)
      .finish_non_exhaustive()
  }
}

/// Builder for [`TaskSpec`].
pub struct TaskSpecBuilder {
  name: String,
  inputs: Vec<Input>,
  outputs: Vec<PathBuf>,
}

impl TaskSpecBuilder {
  /// Declares a single-file input.
  pub fn input_file(mut self, path: impl Into<PathBuf>) -> Self {
    self.inputs.push(Input::File(path.into()));
    self
  }

  /// Declares a directory-tree input: any change under the tree dirties this task.
  pub fn input_tree(mut self, path: impl Into<PathBuf>) -> Self {
    self.inputs.push(Input::Tree(path.into()));
    self
  }

  /// Declares a scalar input, such as a build-tool version.
  pub fn input_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.inputs.push(Input::Value { key: key.into(), value: value.into() });
    self
  }

  /// Declares an output path. Output paths are owned exclusively by the producing task.
  pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
    self.outputs.push(path.into());
    self
  }

  /// Finishes the specification with the action that produces the declared outputs.
  pub fn action(self, action: impl Action + 'static) -> TaskSpec {
    TaskSpec {
      name: self.name,
      inputs: self.inputs,
      outputs: self.outputs,
      action: Arc::new(action),
    }
  }
}


#[cfg(test)]
mod test {
  use super::*;

  fn noop(_: &mut ActionContext) -> Result<(), ActionError> { Ok(()) }

  #[test]
  fn builder_collects_declarations_in_order() {
    let spec = TaskSpec::builder("compile")
      .input_file("src/a.rs")
      .input_tree("res")
      .input_value("tools", "28.0.3")
      .output("out/a.o")
      .action(noop);
    assert_eq!(spec.name(), "compile");
    assert_eq!(spec.inputs().len(), 3);
    assert_eq!(spec.outputs(), &[PathBuf::from("out/a.o")]);
  }

  #[test]
  fn resolved_inputs_apply_value_overrides() {
    let spec = TaskSpec::builder("dex")
      .input_value("tools", "28.0.3")
      .input_file("in.jar")
      .action(noop);
    let mut overrides = BTreeMap::new();
    overrides.insert("tools".to_string(), "29.0.2".to_string());
    let resolved = spec.resolved_inputs(&overrides);
    assert_eq!(resolved[0], Input::Value { key: "tools".into(), value: "29.0.2".into() });
    assert_eq!(resolved[1], Input::File("in.jar".into()));
  }

  #[test]
  fn action_context_captures_streams() {
    let mut context = ActionContext::new("t".into(), BTreeMap::new(), Vec::new());
    writeln!(context.stdout(), "building").unwrap();
    writeln!(context.stderr(), "warning: slow").unwrap();
    let captured = context.into_captured();
    assert_eq!(captured.stdout, "building\n");
    assert_eq!(captured.stderr, "warning: slow\n");
  }
}

use std::collections::BTreeMap;

use crate::invalidate::DirtyReason;
use crate::task::{CapturedOutput, TaskStatus};

/// Outcome of one build invocation: per-task statuses, captured output, and failure diagnostics.
///
/// Valid for the most recent invocation only; a new build starts from a fresh report. Task names
/// iterate in lexicographic order, so accessors return deterministic slices for assertions.
#[derive(Default, Clone, Debug)]
pub struct BuildReport {
  statuses: BTreeMap<String, TaskStatus>,
  reasons: BTreeMap<String, DirtyReason>,
  captured: BTreeMap<String, CapturedOutput>,
  failure: Option<Failure>,
}

#[derive(Clone, Debug)]
struct Failure {
  task: String,
  message: String,
}

impl BuildReport {
  pub(crate) fn record_status(&mut self, task: &str, status: TaskStatus) {
    self.statuses.insert(task.to_string(), status);
  }

  pub(crate) fn record_reason(&mut self, task: &str, reason: DirtyReason) {
    self.reasons.insert(task.to_string(), reason);
  }

  pub(crate) fn record_captured(&mut self, task: &str, captured: CapturedOutput) {
    self.captured.insert(task.to_string(), captured);
  }

  pub(crate) fn record_failure(&mut self, task: &str, message: String) {
    // Keep the first failure: it is the one that aborted the build.
    if self.failure.is_none() {
      self.failure = Some(Failure { task: task.to_string(), message });
    }
  }

  /// Returns the status of the task named `name` in this build, if it was in scope.
  pub fn status(&self, name: &str) -> Option<TaskStatus> {
    self.statuses.get(name).copied()
  }

  /// Returns why the task named `name` was re-executed, if it was dirty.
  pub fn dirty_reason(&self, name: &str) -> Option<&DirtyReason> {
    self.reasons.get(name)
  }

  fn tasks_with(&self, status: TaskStatus) -> Vec<&str> {
    self.statuses.iter().filter(|(_, s)| **s == status).map(|(name, _)| name.as_str()).collect()
  }

  /// Tasks skipped because no dirtying condition applied.
  pub fn up_to_date_tasks(&self) -> Vec<&str> {
    self.tasks_with(TaskStatus::UpToDate)
  }

  /// Tasks whose action actually ran.
  pub fn did_work_tasks(&self) -> Vec<&str> {
    self.tasks_with(TaskStatus::Executed)
  }

  /// Tasks whose outputs were copied out of the artifact cache.
  pub fn from_cache_tasks(&self) -> Vec<&str> {
    self.tasks_with(TaskStatus::FromCache)
  }

  /// Tasks that failed.
  pub fn failed_tasks(&self) -> Vec<&str> {
    self.tasks_with(TaskStatus::Failed)
  }

  /// Tasks never reached because an upstream producer failed.
  pub fn skipped_tasks(&self) -> Vec<&str> {
    self.tasks_with(TaskStatus::Pending)
  }

  /// Returns `true` if every task in scope completed without failure.
  pub fn success(&self) -> bool {
    self.failure.is_none() && !self.statuses.values().any(|s| matches!(s, TaskStatus::Failed | TaskStatus::Pending))
  }

  /// Returns the captured output of the task named `name`, if it executed.
  pub fn captured(&self, name: &str) -> Option<&CapturedOutput> {
    self.captured.get(name)
  }

  /// Returns the concatenated captured standard output of all executed tasks, in task name order.
  pub fn stdout(&self) -> String {
    self.captured.values().map(|c| c.stdout.as_str()).collect()
  }

  /// Returns the concatenated captured standard error of all executed tasks, in task name order.
  pub fn stderr(&self) -> String {
    self.captured.values().map(|c| c.stderr.as_str()).collect()
  }

  /// Returns a human-readable description of the first failure, including the failing task's name,
  /// its error, and its captured standard error.
  pub fn failure_message(&self) -> Option<String> {
    let failure = self.failure.as_ref()?;
    let mut message = format!("task `{}` failed: {}", failure.task, failure.message);
    if let Some(captured) = self.captured.get(&failure.task) {
      if !captured.stderr.is_empty() {
        message.push('\n');
        message.push_str(&captured.stderr);
      }
    }
    Some(message)
  }
}

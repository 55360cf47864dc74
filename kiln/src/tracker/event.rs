use crate::fingerprint::Fingerprint;
use crate::invalidate::DirtyReason;
use crate::report::BuildReport;
use crate::task::TaskStatus;
use crate::tracker::Tracker;

/// A recorded build event.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Event {
  /// A build invocation started.
  BuildStart,
  /// A build invocation ended.
  BuildEnd,
  /// Consistency checking of the named task started.
  CheckStart(String),
  /// Consistency checking of the named task ended; dirty reason if it must re-execute.
  CheckEnd(String, Option<DirtyReason>),
  /// The named task was skipped as up-to-date.
  UpToDate(String),
  /// The named task was satisfied from the cache under the given key.
  CacheHit(String, Fingerprint),
  /// Execution of the named task started.
  ExecuteStart(String),
  /// Execution of the named task ended with the given status.
  ExecuteEnd(String, TaskStatus),
  /// The named task failed with the given message.
  TaskFailed(String, String),
}

/// A [`Tracker`] that records all build events for later inspection, mainly for testing.
#[derive(Default, Clone, Debug)]
pub struct EventTracker {
  events: Vec<Event>,
}

impl EventTracker {
  /// Creates an empty event tracker.
  pub fn new() -> Self { Default::default() }

  /// Returns all recorded events in order.
  #[inline]
  pub fn slice(&self) -> &[Event] { &self.events }

  /// Removes all recorded events.
  #[inline]
  pub fn clear(&mut self) { self.events.clear(); }

  /// Returns the index of the first `ExecuteStart` event of `task`, if any.
  pub fn index_execute_start(&self, task: &str) -> Option<usize> {
    self.events.iter().position(|e| matches!(e, Event::ExecuteStart(name) if name == task))
  }

  /// Returns the index of the first `ExecuteEnd` event of `task`, if any.
  pub fn index_execute_end(&self, task: &str) -> Option<usize> {
    self.events.iter().position(|e| matches!(e, Event::ExecuteEnd(name, _) if name == task))
  }

  /// Returns `true` if `task` started executing.
  pub fn executed(&self, task: &str) -> bool {
    self.index_execute_start(task).is_some()
  }

  /// Returns the number of `ExecuteStart` events, over all tasks.
  pub fn execution_count(&self) -> usize {
    self.events.iter().filter(|e| matches!(e, Event::ExecuteStart(_))).count()
  }

  /// Returns `true` if no task started executing.
  pub fn no_executions(&self) -> bool {
    self.execution_count() == 0
  }

  /// Returns `true` if `task` was reported up-to-date.
  pub fn was_up_to_date(&self, task: &str) -> bool {
    self.events.iter().any(|e| matches!(e, Event::UpToDate(name) if name == task))
  }

  /// Returns `true` if `task` was satisfied from the cache.
  pub fn was_cache_hit(&self, task: &str) -> bool {
    self.events.iter().any(|e| matches!(e, Event::CacheHit(name, _) if name == task))
  }

  /// Returns the dirty reason recorded for `task` by its check, if it was checked and dirty.
  pub fn dirty_reason(&self, task: &str) -> Option<&DirtyReason> {
    self.events.iter().find_map(|e| match e {
      Event::CheckEnd(name, reason) if name == task => reason.as_ref(),
      _ => None,
    })
  }
}

impl Tracker for EventTracker {
  #[inline]
  fn build_start(&mut self) {
    self.events.push(Event::BuildStart);
  }
  #[inline]
  fn build_end(&mut self, _report: &BuildReport) {
    self.events.push(Event::BuildEnd);
  }
  #[inline]
  fn check_start(&mut self, task: &str) {
    self.events.push(Event::CheckStart(task.to_string()));
  }
  #[inline]
  fn check_end(&mut self, task: &str, dirty: Option<&DirtyReason>) {
    self.events.push(Event::CheckEnd(task.to_string(), dirty.cloned()));
  }
  #[inline]
  fn up_to_date(&mut self, task: &str) {
    self.events.push(Event::UpToDate(task.to_string()));
  }
  #[inline]
  fn cache_hit(&mut self, task: &str, key: &Fingerprint) {
    self.events.push(Event::CacheHit(task.to_string(), *key));
  }
  #[inline]
  fn execute_start(&mut self, task: &str) {
    self.events.push(Event::ExecuteStart(task.to_string()));
  }
  #[inline]
  fn execute_end(&mut self, task: &str, status: TaskStatus) {
    self.events.push(Event::ExecuteEnd(task.to_string(), status));
  }
  #[inline]
  fn task_failed(&mut self, task: &str, message: &str) {
    self.events.push(Event::TaskFailed(task.to_string(), message.to_string()));
  }
}

use crate::fingerprint::Fingerprint;
use crate::invalidate::DirtyReason;
use crate::report::BuildReport;
use crate::task::TaskStatus;

pub mod event;
pub mod logging;

/// Build event tracker. Can be used to implement logging, event tracing, progress reporting, or
/// metrics. All events fire on the coordinating build thread, in deterministic order per wave.
#[allow(unused_variables)]
pub trait Tracker {
  /// Start: a new build invocation.
  #[inline]
  fn build_start(&mut self) {}
  /// End: completed build invocation, with the final `report`.
  #[inline]
  fn build_end(&mut self, report: &BuildReport) {}

  /// Start: checking whether `task` must be re-executed.
  #[inline]
  fn check_start(&mut self, task: &str) {}
  /// End: checked `task`; `dirty` holds the reason when it must be re-executed.
  #[inline]
  fn check_end(&mut self, task: &str, dirty: Option<&DirtyReason>) {}

  /// `task` was skipped: no dirtying condition applied.
  #[inline]
  fn up_to_date(&mut self, task: &str) {}
  /// `task`'s outputs were satisfied from the artifact cache under `key`.
  #[inline]
  fn cache_hit(&mut self, task: &str, key: &Fingerprint) {}

  /// Start: executing `task`.
  #[inline]
  fn execute_start(&mut self, task: &str) {}
  /// End: finished `task` with `status`.
  #[inline]
  fn execute_end(&mut self, task: &str, status: TaskStatus) {}

  /// `task` failed with `message`.
  #[inline]
  fn task_failed(&mut self, task: &str, message: &str) {}
}

/// Implement [`Tracker`] for `()` that does nothing.
impl Tracker for () {}

/// A [`Tracker`] that forwards events to two [`Tracker`]s.
#[derive(Default, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug)]
pub struct CompositeTracker<A1, A2>(pub A1, pub A2);

impl<A1, A2> CompositeTracker<A1, A2> {
  /// Creates a composite over `tracker_1` and `tracker_2`.
  pub fn new(tracker_1: A1, tracker_2: A2) -> Self { Self(tracker_1, tracker_2) }
}

impl<A1: Tracker, A2: Tracker> Tracker for CompositeTracker<A1, A2> {
  #[inline]
  fn build_start(&mut self) {
    self.0.build_start();
    self.1.build_start();
  }
  #[inline]
  fn build_end(&mut self, report: &BuildReport) {
    self.0.build_end(report);
    self.1.build_end(report);
  }

  #[inline]
  fn check_start(&mut self, task: &str) {
    self.0.check_start(task);
    self.1.check_start(task);
  }
  #[inline]
  fn check_end(&mut self, task: &str, dirty: Option<&DirtyReason>) {
    self.0.check_end(task, dirty);
    self.1.check_end(task, dirty);
  }

  #[inline]
  fn up_to_date(&mut self, task: &str) {
    self.0.up_to_date(task);
    self.1.up_to_date(task);
  }
  #[inline]
  fn cache_hit(&mut self, task: &str, key: &Fingerprint) {
    self.0.cache_hit(task, key);
    self.1.cache_hit(task, key);
  }

  #[inline]
  fn execute_start(&mut self, task: &str) {
    self.0.execute_start(task);
    self.1.execute_start(task);
  }
  #[inline]
  fn execute_end(&mut self, task: &str, status: TaskStatus) {
    self.0.execute_end(task, status);
    self.1.execute_end(task, status);
  }

  #[inline]
  fn task_failed(&mut self, task: &str, message: &str) {
    self.0.task_failed(task, message);
    self.1.task_failed(task, message);
  }
}

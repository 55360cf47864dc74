use log::{debug, info, warn};

use crate::fingerprint::Fingerprint;
use crate::invalidate::DirtyReason;
use crate::report::BuildReport;
use crate::task::TaskStatus;
use crate::tracker::Tracker;

/// A [`Tracker`] that writes build events through the [`log`] facade: task lifecycle at info,
/// consistency checking at debug, failures at warn.
#[derive(Default, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug)]
pub struct LoggingTracker;

impl Tracker for LoggingTracker {
  #[inline]
  fn build_start(&mut self) {
    debug!("build start");
  }
  #[inline]
  fn build_end(&mut self, report: &BuildReport) {
    info!(
      "build end: {} executed, {} from cache, {} up-to-date, {} failed",
      report.did_work_tasks().len(),
      report.from_cache_tasks().len(),
      report.up_to_date_tasks().len(),
      report.failed_tasks().len(),
    );
  }

  #[inline]
  fn check_start(&mut self, task: &str) {
    debug!("? {}", task);
  }
  #[inline]
  fn check_end(&mut self, task: &str, dirty: Option<&DirtyReason>) {
    match dirty {
      Some(reason) => debug!("✗ {}: {}", task, reason),
      None => debug!("✓ {}", task),
    }
  }

  #[inline]
  fn up_to_date(&mut self, task: &str) {
    info!("UP-TO-DATE {}", task);
  }
  #[inline]
  fn cache_hit(&mut self, task: &str, key: &Fingerprint) {
    info!("FROM-CACHE {} ({})", task, key);
  }

  #[inline]
  fn execute_start(&mut self, task: &str) {
    info!("→ {}", task);
  }
  #[inline]
  fn execute_end(&mut self, task: &str, status: TaskStatus) {
    info!("← {} ({:?})", task, status);
  }

  #[inline]
  fn task_failed(&mut self, task: &str, message: &str) {
    warn!("FAILED {}: {}", task, message);
  }
}

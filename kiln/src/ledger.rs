use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;

const LEDGER_VERSION: u32 = 1;

/// Previous fingerprint of a file input, with the modification time observed when it was hashed.
///
/// The modification time is only a cheap pre-filter: when it is unchanged, re-hashing is skipped
/// and the stored fingerprint reused. It never participates in fingerprint equality.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct FileRecord {
  /// Modification time at hashing time; `None` if the file was absent.
  pub modified: Option<SystemTime>,
  /// Content fingerprint of the file.
  pub fingerprint: Fingerprint,
}

/// Everything remembered about one task between build invocations.
#[derive(Clone, Default, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct TaskRecord {
  /// Fingerprint per declared input, keyed by [`Input::ledger_key`](crate::Input::ledger_key).
  pub inputs: BTreeMap<String, Fingerprint>,
  /// Modification-time pre-filter records for file inputs, keyed by path.
  #[serde(default)]
  pub files: BTreeMap<String, FileRecord>,
  /// Fingerprint per produced output artifact, keyed by path. Recorded only for tasks that
  /// completed successfully.
  #[serde(default)]
  pub outputs: BTreeMap<String, Fingerprint>,
}

/// Durable per-project fingerprint store: task name to the input fingerprint set observed at the
/// task's last successful completion. Read at the start and atomically rewritten at the end of
/// every build invocation.
///
/// Fingerprints are never recorded for failed or skipped tasks, so the next build retries them
/// while unaffected siblings keep their records.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Ledger {
  version: u32,
  tasks: BTreeMap<String, TaskRecord>,
}

// Derived `Default` would zero the version, making a stored default ledger load as empty.
impl Default for Ledger {
  fn default() -> Self { Self::new() }
}

impl Ledger {
  /// Creates an empty ledger.
  pub fn new() -> Self {
    Self { version: LEDGER_VERSION, tasks: BTreeMap::new() }
  }

  /// Loads the ledger at `path`.
  ///
  /// A missing file, unreadable content, or an unknown version degrades to an empty ledger (a full
  /// rebuild), never to an error: the ledger is a cache of fingerprints, not a source of truth.
  pub fn load(path: impl AsRef<Path>) -> Self {
    let Ok(content) = fs::read_to_string(path) else {
      return Self::new();
    };
    match serde_json::from_str::<Ledger>(&content) {
      Ok(ledger) if ledger.version == LEDGER_VERSION => ledger,
      _ => Self::new(),
    }
  }

  /// Writes the ledger to `path` atomically: serialized to a temporary sibling file first, then
  /// renamed into place, so a crash mid-write never leaves a torn ledger.
  pub fn store(&self, path: impl AsRef<Path>) -> Result<(), io::Error> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path)
  }

  /// Returns the record of the task named `name`, if it completed successfully before.
  #[inline]
  pub fn get(&self, name: &str) -> Option<&TaskRecord> {
    self.tasks.get(name)
  }

  /// Records `record` for the task named `name`, replacing any previous record.
  #[inline]
  pub fn record(&mut self, name: impl Into<String>, record: TaskRecord) {
    self.tasks.insert(name.into(), record);
  }

  /// Removes the record of the task named `name`.
  #[inline]
  pub fn remove(&mut self, name: &str) -> Option<TaskRecord> {
    self.tasks.remove(name)
  }

  /// Returns the number of recorded tasks.
  #[inline]
  pub fn len(&self) -> usize { self.tasks.len() }

  /// Returns `true` if no task is recorded.
  #[inline]
  pub fn is_empty(&self) -> bool { self.tasks.is_empty() }
}


#[cfg(test)]
mod test {
  use std::fs;

  use dev_shared::fs::create_temp_dir;

  use super::*;

  fn record_with_input(key: &str, content: &str) -> TaskRecord {
    let mut record = TaskRecord::default();
    record.inputs.insert(key.to_string(), Fingerprint::of_bytes(content));
    record
  }

  #[test]
  fn round_trips_through_disk() {
    let temp_dir = create_temp_dir();
    let path = temp_dir.path().join(".kiln/ledger.json");
    let mut ledger = Ledger::new();
    ledger.record("compile", record_with_input("file:a.src", "v1"));
    ledger.store(&path).unwrap();

    let loaded = Ledger::load(&path);
    assert_eq!(loaded, ledger);
    assert!(loaded.get("compile").is_some());
    assert!(loaded.get("link").is_none());
  }

  #[test]
  fn default_ledger_carries_the_current_version() {
    let temp_dir = create_temp_dir();
    let path = temp_dir.path().join("ledger.json");
    let mut ledger = Ledger::default();
    ledger.record("compile", record_with_input("file:a.src", "v1"));
    ledger.store(&path).unwrap();
    // A default-constructed ledger must round-trip, not degrade to empty on load.
    assert_eq!(Ledger::load(&path), ledger);
    assert_eq!(Ledger::default(), Ledger::new());
  }

  #[test]
  fn missing_file_loads_empty() {
    let temp_dir = create_temp_dir();
    let ledger = Ledger::load(temp_dir.path().join("missing.json"));
    assert!(ledger.is_empty());
  }

  #[test]
  fn corrupt_file_loads_empty() {
    let temp_dir = create_temp_dir();
    let path = temp_dir.path().join("ledger.json");
    fs::write(&path, "{ not json").unwrap();
    assert!(Ledger::load(&path).is_empty());
  }

  #[test]
  fn unknown_version_loads_empty() {
    let temp_dir = create_temp_dir();
    let path = temp_dir.path().join("ledger.json");
    let mut ledger = Ledger::new();
    ledger.version = LEDGER_VERSION + 1;
    ledger.record("compile", record_with_input("file:a.src", "v1"));
    ledger.store(&path).unwrap();
    assert!(Ledger::load(&path).is_empty());
  }

  #[test]
  fn store_does_not_leave_temp_file() {
    let temp_dir = create_temp_dir();
    let path = temp_dir.path().join("ledger.json");
    Ledger::new().store(&path).unwrap();
    assert!(path.exists());
    assert!(!path.with_extension("tmp").exists());
  }
}

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Error while fingerprinting an input or output.
///
/// Absence of a file is not an error, it fingerprints to a stable absent marker; this error covers
/// genuine I/O failures such as permission problems.
#[derive(Error, Debug)]
pub enum FingerprintError {
  /// Reading `path` failed.
  #[error("failed to fingerprint `{}`", path.display())]
  Io {
    /// Path that failed to read.
    path: PathBuf,
    /// Underlying I/O error.
    #[source]
    source: io::Error,
  },
}

/// Error while registering tasks or freezing the build graph. All variants are configuration
/// errors, detected before any task executes.
#[derive(Error, Debug)]
pub enum GraphError {
  /// Two tasks were registered under the same name.
  #[error("duplicate task `{0}`")]
  DuplicateTask(String),
  /// Two tasks declared the same output path.
  #[error("tasks `{first}` and `{second}` both declare output `{}`", path.display())]
  OutputConflict {
    /// Task that declared the output first.
    first: String,
    /// Task that declared it again.
    second: String,
    /// The contested output path.
    path: PathBuf,
  },
  /// Inferred producer-consumer edges form a cycle.
  #[error("dependency cycle between `{depender}` and `{dependee}`")]
  Cycle {
    /// Task consuming the output.
    depender: String,
    /// Task producing it.
    dependee: String,
  },
}

/// Error while reading from or writing to the artifact cache.
#[derive(Error, Debug)]
pub enum CacheError {
  /// Copying payload at `path` failed.
  #[error("cache I/O failed at `{}`", path.display())]
  Io {
    /// Path involved in the failing operation.
    path: PathBuf,
    /// Underlying I/O error.
    #[source]
    source: io::Error,
  },
  /// Acquiring the per-entry lock file failed.
  #[error("failed to lock cache entry `{}`", path.display())]
  Lock {
    /// Path of the lock file.
    path: PathBuf,
    /// Underlying I/O error.
    #[source]
    source: io::Error,
  },
}

/// Error raised by a task's action. Fails the task, never the whole build invocation.
#[derive(Error, Debug)]
pub enum ActionError {
  /// The build step reported a failure of its own.
  #[error("{0}")]
  Message(String),
  /// An I/O operation of the build step failed.
  #[error(transparent)]
  Io(#[from] io::Error),
  /// The action returned `Ok` but a declared output does not exist.
  #[error("declared output `{}` was not produced", .0.display())]
  MissingOutput(PathBuf),
}

impl ActionError {
  /// Creates an [`ActionError::Message`] from anything printable.
  pub fn message(message: impl ToString) -> Self {
    ActionError::Message(message.to_string())
  }
}

/// Error while parsing build options.
#[derive(Error, Debug)]
pub enum OptionsError {
  /// The option key is not recognized.
  #[error("unrecognized option `{0}`")]
  UnrecognizedKey(String),
  /// The option value cannot be parsed for its key.
  #[error("invalid value `{value}` for option `{key}`")]
  InvalidValue {
    /// The option key.
    key: String,
    /// The rejected value.
    value: String,
  },
}

/// Error that aborts a build invocation as a whole.
///
/// Per-task failures are not represented here; they surface as failed statuses in the
/// [`BuildReport`](crate::BuildReport).
#[derive(Error, Debug)]
pub enum BuildError {
  /// The task graph is invalid.
  #[error(transparent)]
  Graph(#[from] GraphError),
  /// A requested task name is not registered.
  #[error("no task named `{0}`")]
  UnknownTask(String),
  /// Writing the fingerprint ledger failed.
  #[error("failed to write ledger `{}`", path.display())]
  Ledger {
    /// Path of the ledger file.
    path: PathBuf,
    /// Underlying I/O error.
    #[source]
    source: io::Error,
  },
}

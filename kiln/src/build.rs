use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use rayon::prelude::*;

use crate::cache::ArtifactCache;
use crate::error::{ActionError, BuildError, FingerprintError, OptionsError};
use crate::fingerprint::{Fingerprint, Input};
use crate::fs::{metadata, remove_path};
use crate::graph::{BuildGraph, FrozenGraph, TaskId};
use crate::invalidate::compute_dirty_set;
use crate::ledger::{FileRecord, Ledger, TaskRecord};
use crate::report::BuildReport;
use crate::task::{ActionContext, CapturedOutput, TaskSpec, TaskStatus};
use crate::tracker::Tracker;

/// Options of a build invocation: caching, ledger location, injected scalar overrides, and worker
/// pool size.
#[derive(Clone, Debug)]
pub struct BuildOptions {
  cache_enabled: bool,
  cache_dir: PathBuf,
  ledger_path: PathBuf,
  overrides: BTreeMap<String, String>,
  workers: Option<usize>,
}

impl Default for BuildOptions {
  fn default() -> Self {
    Self {
      cache_enabled: false,
      cache_dir: PathBuf::from(".kiln/cache"),
      ledger_path: PathBuf::from(".kiln/ledger.json"),
      overrides: BTreeMap::new(),
      workers: None,
    }
  }
}

impl BuildOptions {
  /// Creates the default options: caching disabled, ledger at `.kiln/ledger.json`, shared worker
  /// pool.
  pub fn new() -> Self { Default::default() }

  /// Enables the artifact cache, rooted at `dir`.
  pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.cache_enabled = true;
    self.cache_dir = dir.into();
    self
  }

  /// Disables the artifact cache; its root directory will not be created.
  pub fn without_cache(mut self) -> Self {
    self.cache_enabled = false;
    self
  }

  /// Sets the path of the fingerprint ledger.
  pub fn with_ledger_path(mut self, path: impl Into<PathBuf>) -> Self {
    self.ledger_path = path.into();
    self
  }

  /// Overrides the declared scalar input `key` with `value` for this invocation, e.g. an injected
  /// build-tool version.
  pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.overrides.insert(key.into(), value.into());
    self
  }

  /// Caps the worker pool at `workers` threads. Defaults to the shared global pool.
  pub fn with_workers(mut self, workers: usize) -> Self {
    self.workers = Some(workers);
    self
  }

  /// Parses options from string pairs, the form a command line hands over. Recognized keys:
  /// `cache` (`true`/`false`), `cache-dir`, `ledger`, `workers`, and `override.<key>`.
  pub fn from_map<'a>(options: impl IntoIterator<Item=(&'a str, &'a str)>) -> Result<Self, OptionsError> {
    let mut result = Self::default();
    for (key, value) in options {
      match key {
        "cache" => match value {
          "true" => result.cache_enabled = true,
          "false" => result.cache_enabled = false,
          _ => return Err(OptionsError::InvalidValue { key: key.to_string(), value: value.to_string() }),
        },
        "cache-dir" => {
          result.cache_enabled = true;
          result.cache_dir = PathBuf::from(value);
        }
        "ledger" => result.ledger_path = PathBuf::from(value),
        "workers" => {
          let workers = value.parse().map_err(|_| OptionsError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
          })?;
          result.workers = Some(workers);
        }
        _ => match key.strip_prefix("override.") {
          Some(name) => {
            result.overrides.insert(name.to_string(), value.to_string());
          }
          None => return Err(OptionsError::UnrecognizedKey(key.to_string())),
        },
      }
    }
    Ok(result)
  }
}

/// Explicit, passed-down build state: the frozen task graph, the artifact cache handle, the ledger
/// location, and the tracker. There is no ambient global state; everything a build invocation
/// touches is owned here.
pub struct BuildContext<A = ()> {
  graph: FrozenGraph,
  cache: ArtifactCache,
  ledger_path: PathBuf,
  overrides: BTreeMap<String, String>,
  pool: Option<rayon::ThreadPool>,
  tracker: A,
}

impl BuildContext<()> {
  /// Freezes `graph` and creates a context without a tracker.
  pub fn new(graph: BuildGraph, options: BuildOptions) -> Result<Self, BuildError> {
    Self::with_tracker(graph, options, ())
  }
}

impl<A: Tracker> BuildContext<A> {
  /// Freezes `graph` and creates a context that reports events to `tracker`.
  ///
  /// Freezing validates the graph: duplicate names, output conflicts, and cycles all fail here,
  /// before any execution.
  pub fn with_tracker(graph: BuildGraph, options: BuildOptions, tracker: A) -> Result<Self, BuildError> {
    let graph = graph.freeze()?;
    let cache = if options.cache_enabled {
      ArtifactCache::new(options.cache_dir)
    } else {
      ArtifactCache::disabled()
    };
    let pool = match options.workers {
      None => None,
      Some(workers) => match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => Some(pool),
        Err(e) => {
          log::warn!("failed to build worker pool, falling back to the global pool: {}", e);
          None
        }
      },
    };
    Ok(Self {
      graph,
      cache,
      ledger_path: options.ledger_path,
      overrides: options.overrides,
      pool,
      tracker,
    })
  }

  /// Returns the tracker.
  #[inline]
  pub fn tracker(&self) -> &A { &self.tracker }

  /// Returns the tracker mutably.
  #[inline]
  pub fn tracker_mut(&mut self) -> &mut A { &mut self.tracker }

  /// Returns the artifact cache handle.
  #[inline]
  pub fn cache(&self) -> &ArtifactCache { &self.cache }

  /// Runs a build invocation for `task_names` and their transitive producers; an empty slice runs
  /// every task.
  ///
  /// Statuses reset to pending, changed inputs are detected by fingerprint comparison, the minimal
  /// dirty set re-executes (cache first), and the ledger is rewritten for tasks that completed.
  /// Per-task failures are reported through the returned [`BuildReport`], not as an `Err`: only
  /// configuration and ledger I/O errors abort the invocation itself.
  pub fn run(&mut self, task_names: &[&str]) -> Result<BuildReport, BuildError> {
    let mut scope = HashSet::new();
    if task_names.is_empty() {
      scope.extend(self.graph.topological_order().iter().copied());
    } else {
      for name in task_names {
        let task = self.graph.get(name).ok_or_else(|| BuildError::UnknownTask(name.to_string()))?;
        scope.extend(self.graph.with_transitive_producers(task));
      }
    }

    let mut ledger = Ledger::load(&self.ledger_path);
    let mut report = BuildReport::default();
    self.tracker.build_start();

    // Fingerprint all inputs up front. A fingerprinting failure is fatal for the affected task
    // only: it fails without running and poisons its consumers.
    let mut current = HashMap::new();
    let mut file_records = HashMap::new();
    let mut failed = HashSet::new();
    for &task in self.graph.topological_order() {
      if !scope.contains(&task) {
        continue;
      }
      let spec = self.graph.spec(task);
      let inputs = spec.resolved_inputs(&self.overrides);
      match fingerprint_inputs(&inputs, ledger.get(spec.name())) {
        Ok(fingerprinted) => {
          current.insert(task, fingerprinted.by_key);
          file_records.insert(task, fingerprinted.files);
        }
        Err(e) => {
          failed.insert(task);
          let message = e.to_string();
          self.tracker.task_failed(spec.name(), &message);
          report.record_status(spec.name(), TaskStatus::Failed);
          report.record_failure(spec.name(), message);
        }
      }
    }

    let check_scope: HashSet<TaskId> = scope.iter().copied().filter(|t| !failed.contains(t)).collect();
    let dirty = compute_dirty_set(&self.graph, &check_scope, &ledger, &current);
    for &task in self.graph.topological_order() {
      if !check_scope.contains(&task) {
        continue;
      }
      let name = self.graph.spec(task).name();
      self.tracker.check_start(name);
      self.tracker.check_end(name, dirty.get(&task));
      match dirty.get(&task) {
        Some(reason) => {
          report.record_status(name, TaskStatus::Pending);
          report.record_reason(name, reason.clone());
        }
        None => {
          report.record_status(name, TaskStatus::UpToDate);
          self.tracker.up_to_date(name);
        }
      }
    }

    // Execute the dirty set wave by wave: a wave holds dirty tasks whose producers have all
    // completed; tasks within a wave have no edges between them and run in parallel.
    let topo_dirty: Vec<TaskId> = self.graph.topological_order().iter()
      .copied()
      .filter(|t| dirty.contains_key(t))
      .collect();
    let mut done: HashSet<TaskId> = HashSet::new();
    let mut poisoned: HashSet<TaskId> = HashSet::new();
    let mut abort = false;
    loop {
      let mut wave = Vec::new();
      for &task in &topo_dirty {
        if done.contains(&task) || failed.contains(&task) || poisoned.contains(&task) {
          continue;
        }
        let mut blocked = false;
        for producer in self.graph.producers(task) {
          if failed.contains(&producer) || poisoned.contains(&producer) {
            poisoned.insert(task);
            blocked = true;
            break;
          }
          if dirty.contains_key(&producer) && !done.contains(&producer) {
            blocked = true;
            break;
          }
        }
        if !blocked && !poisoned.contains(&task) {
          wave.push(task);
        }
      }
      if abort || wave.is_empty() {
        break;
      }

      let graph = &self.graph;
      let cache = &self.cache;
      let overrides = &self.overrides;
      let ledger_ref = &ledger;
      let execute = |&task: &TaskId| {
        let spec = graph.spec(task);
        execute_task(spec, overrides, ledger_ref.get(spec.name()), cache)
      };
      let outcomes: Vec<Outcome> = match &self.pool {
        Some(pool) => pool.install(|| wave.par_iter().map(execute).collect()),
        None => wave.par_iter().map(execute).collect(),
      };

      for (&task, outcome) in wave.iter().zip(outcomes) {
        let name = self.graph.spec(task).name();
        report.record_captured(name, outcome.captured);
        match outcome.result {
          Ok(Completion { status, key, inputs, files, outputs }) => {
            if status == TaskStatus::FromCache {
              self.tracker.cache_hit(name, &key);
            } else {
              self.tracker.execute_start(name);
            }
            self.tracker.execute_end(name, status);
            report.record_status(name, status);
            done.insert(task);
            ledger.record(name, TaskRecord { inputs, files, outputs });
          }
          Err(message) => {
            self.tracker.execute_start(name);
            self.tracker.task_failed(name, &message);
            self.tracker.execute_end(name, TaskStatus::Failed);
            report.record_status(name, TaskStatus::Failed);
            report.record_failure(name, message);
            failed.insert(task);
            // Finish reporting this wave, then stop scheduling further waves.
            abort = true;
          }
        }
      }
    }

    // Refresh the modification-time pre-filter records of up-to-date tasks, so an unchanged file
    // that was re-dated does not get re-hashed on every subsequent build.
    for &task in &check_scope {
      if dirty.contains_key(&task) {
        continue;
      }
      let name = self.graph.spec(task).name();
      if let Some(record) = ledger.get(name) {
        let mut record = record.clone();
        record.files = file_records[&task].clone();
        ledger.record(name, record);
      }
    }

    ledger.store(&self.ledger_path).map_err(|source| BuildError::Ledger {
      path: self.ledger_path.clone(),
      source,
    })?;
    self.tracker.build_end(&report);
    Ok(report)
  }
}

struct Fingerprinted {
  by_key: BTreeMap<String, Fingerprint>,
  ordered: Vec<Fingerprint>,
  files: BTreeMap<String, FileRecord>,
}

/// Fingerprints `inputs` in declaration order. For file inputs, an unchanged modification time
/// reuses the fingerprint recorded in `previous` instead of re-hashing; the modification time is
/// only this pre-filter, never part of the fingerprint itself.
fn fingerprint_inputs(inputs: &[Input], previous: Option<&TaskRecord>) -> Result<Fingerprinted, FingerprintError> {
  let mut by_key = BTreeMap::new();
  let mut ordered = Vec::with_capacity(inputs.len());
  let mut files = BTreeMap::new();
  for input in inputs {
    let fingerprint = match input {
      Input::File(path) => {
        let io_error = |source| FingerprintError::Io { path: path.clone(), source };
        let modified = match metadata(path).map_err(io_error)? {
          None => None,
          Some(m) => Some(m.modified().map_err(io_error)?),
        };
        let path_key = path.display().to_string();
        let reusable = previous
          .and_then(|record| record.files.get(&path_key))
          .filter(|record| record.modified == modified && modified.is_some());
        let fingerprint = match reusable {
          Some(record) => record.fingerprint,
          None => Fingerprint::of_file(path)?,
        };
        files.insert(path_key, FileRecord { modified, fingerprint });
        fingerprint
      }
      other => other.fingerprint()?,
    };
    by_key.insert(input.ledger_key(), fingerprint);
    ordered.push(fingerprint);
  }
  Ok(Fingerprinted { by_key, ordered, files })
}

struct Completion {
  status: TaskStatus,
  key: Fingerprint,
  inputs: BTreeMap<String, Fingerprint>,
  files: BTreeMap<String, FileRecord>,
  outputs: BTreeMap<String, Fingerprint>,
}

struct Outcome {
  result: Result<Completion, String>,
  captured: CapturedOutput,
}

/// Runs one dirty task on a worker. Inputs are fingerprinted here, not at scan time: producers in
/// earlier waves may have refreshed them, and the cache key must reflect what the action actually
/// consumes. The cache is consulted first; on a miss the action runs with stale outputs removed
/// beforehand and all declared outputs verified and stored into the cache afterwards.
fn execute_task(
  spec: &TaskSpec,
  overrides: &BTreeMap<String, String>,
  previous: Option<&TaskRecord>,
  cache: &ArtifactCache,
) -> Outcome {
  let failure = |message: String| Outcome { result: Err(message), captured: CapturedOutput::default() };
  let inputs = spec.resolved_inputs(overrides);
  let fingerprinted = match fingerprint_inputs(&inputs, previous) {
    Ok(fingerprinted) => fingerprinted,
    Err(e) => return failure(e.to_string()),
  };
  let key = Fingerprint::combine(fingerprinted.ordered.iter().copied());
  let completion = |status, outputs| Completion {
    status,
    key,
    inputs: fingerprinted.by_key.clone(),
    files: fingerprinted.files.clone(),
    outputs,
  };
  match cache.try_get(&key, spec.outputs()) {
    Err(e) => return failure(e.to_string()),
    Ok(true) => {
      return match fingerprint_outputs(spec) {
        Ok(outputs) => Outcome {
          result: Ok(completion(TaskStatus::FromCache, outputs)),
          captured: CapturedOutput::default(),
        },
        Err(e) => failure(e.to_string()),
      };
    }
    Ok(false) => {}
  }

  // Stale outputs are removed, not updated in place: a delete+add of an input must produce a
  // delete+add of the output.
  for output in spec.outputs() {
    if let Err(e) = remove_path(output) {
      return failure(ActionError::Io(e).to_string());
    }
  }

  let values = inputs.into_iter()
    .filter_map(|input| match input {
      Input::Value { key, value } => Some((key, value)),
      _ => None,
    })
    .collect();
  let mut context = ActionContext::new(spec.name().to_string(), values, spec.outputs().to_vec());
  let result = spec.action().run(&mut context);
  let captured = context.into_captured();
  if let Err(e) = result {
    return Outcome { result: Err(e.to_string()), captured };
  }

  for output in spec.outputs() {
    match metadata(output) {
      Ok(Some(_)) => {}
      Ok(None) => {
        return Outcome {
          result: Err(ActionError::MissingOutput(output.clone()).to_string()),
          captured,
        };
      }
      Err(e) => return Outcome { result: Err(ActionError::Io(e).to_string()), captured },
    }
  }
  if let Err(e) = cache.put(&key, spec.outputs()) {
    return Outcome { result: Err(e.to_string()), captured };
  }
  match fingerprint_outputs(spec) {
    Ok(outputs) => Outcome {
      result: Ok(completion(TaskStatus::Executed, outputs)),
      captured,
    },
    Err(e) => Outcome { result: Err(e.to_string()), captured },
  }
}

fn fingerprint_outputs(spec: &TaskSpec) -> Result<BTreeMap<String, Fingerprint>, FingerprintError> {
  spec.outputs().iter()
    .map(|output| Ok((output.display().to_string(), Fingerprint::of_tree(output)?)))
    .collect()
}

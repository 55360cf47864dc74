use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs4::FileExt;

use crate::error::CacheError;
use crate::fingerprint::Fingerprint;
use crate::fs::{copy_path, metadata, remove_path};

/// Content-addressed store of previously built artifacts, shared between build invocations and
/// between concurrent builds.
///
/// Layout: one directory per cache key under the root, named by the key's hex rendering, holding
/// the artifact payload; a sibling `<key>.lock` file guards the entry. The per-entry lock is the
/// sole mutual-exclusion mechanism: there is no global lock on the root, so concurrent builds only
/// contend when touching the same entry.
///
/// In disabled mode lookups always miss, stores are no-ops, and the root directory is never
/// created.
#[derive(Clone, Debug)]
pub struct ArtifactCache {
  root: Option<PathBuf>,
}

impl ArtifactCache {
  /// Creates an enabled cache rooted at `root`. The root (and its parents) need not exist yet; it
  /// is created on first store.
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: Some(root.into()) }
  }

  /// Creates a disabled cache: lookups miss, stores are no-ops, no directory is ever created.
  pub fn disabled() -> Self {
    Self { root: None }
  }

  /// Returns `true` if caching is enabled.
  #[inline]
  pub fn is_enabled(&self) -> bool { self.root.is_some() }

  /// Returns the cache root directory, if enabled.
  #[inline]
  pub fn root(&self) -> Option<&Path> { self.root.as_deref() }

  /// Looks up the entry for `key` and, on a hit, copies its payload onto the declared `outputs`
  /// (in declaration order), returning `true`. The cached entry itself is never modified: reuse is
  /// copy, not move, and leaves the entry's bytes and timestamps unchanged.
  pub fn try_get(&self, key: &Fingerprint, outputs: &[PathBuf]) -> Result<bool, CacheError> {
    let Some(root) = &self.root else {
      return Ok(false);
    };
    let entry = root.join(key.to_hex());
    // Probe before locking: acquiring the lock would create the root on a cold cache.
    match metadata(&entry).map_err(|source| io_error(&entry, source))? {
      None => return Ok(false),
      Some(_) => {}
    }
    let _lock = EntryLock::acquire(root, key)?;
    for (index, output) in outputs.iter().enumerate() {
      let payload = entry.join(format!("out{}", index));
      match metadata(&payload).map_err(|source| io_error(&payload, source))? {
        // Payload does not cover the declared outputs: treat as a miss, the producer will rebuild.
        None => return Ok(false),
        Some(_) => copy_path(&payload, output).map_err(|source| io_error(output, source))?,
      }
    }
    Ok(true)
  }

  /// Stores a copy of the produced `outputs` under `key`. An existing entry is left untouched, so
  /// repeated builds with identical inputs never rewrite (or re-date) the cached artifact.
  ///
  /// The payload is staged into a temporary directory and renamed into place under the entry lock,
  /// so concurrent builds of the same key observe either no entry or a complete one.
  pub fn put(&self, key: &Fingerprint, outputs: &[PathBuf]) -> Result<(), CacheError> {
    let Some(root) = &self.root else {
      return Ok(());
    };
    std::fs::create_dir_all(root).map_err(|source| io_error(root, source))?;
    let _lock = EntryLock::acquire(root, key)?;
    let entry = root.join(key.to_hex());
    if metadata(&entry).map_err(|source| io_error(&entry, source))?.is_some() {
      return Ok(());
    }
    let staging = root.join(format!("{}.staging", key.to_hex()));
    remove_path(&staging).map_err(|source| io_error(&staging, source))?;
    std::fs::create_dir_all(&staging).map_err(|source| io_error(&staging, source))?;
    for (index, output) in outputs.iter().enumerate() {
      let payload = staging.join(format!("out{}", index));
      copy_path(output, &payload).map_err(|source| io_error(output, source))?;
    }
    std::fs::rename(&staging, &entry).map_err(|source| io_error(&entry, source))
  }

  /// Deletes the entire cache root. An absent root (or absent parent) is not an error.
  pub fn clear(&self) -> Result<(), CacheError> {
    let Some(root) = &self.root else {
      return Ok(());
    };
    remove_path(root).map_err(|source| io_error(root, source))
  }
}

fn io_error(path: &Path, source: io::Error) -> CacheError {
  CacheError::Io { path: path.to_path_buf(), source }
}

/// Exclusive lock over one cache entry, held for the duration of a read or write. Released on
/// drop; also released by the OS if the holding process dies.
struct EntryLock {
  file: File,
}

impl EntryLock {
  fn acquire(root: &Path, key: &Fingerprint) -> Result<Self, CacheError> {
    let path = root.join(format!("{}.lock", key.to_hex()));
    let file = OpenOptions::new()
      .create(true)
      .read(true)
      .write(true)
      .open(&path)
      .map_err(|source| CacheError::Lock { path: path.clone(), source })?;
    file.lock_exclusive().map_err(|source| CacheError::Lock { path, source })?;
    Ok(Self { file })
  }
}

impl Drop for EntryLock {
  fn drop(&mut self) {
    let _ = self.file.unlock();
  }
}

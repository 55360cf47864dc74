use std::fmt::{self, Debug, Display, Formatter};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::FingerprintError;

// Domain tags keep the fingerprint spaces of the input kinds disjoint: a file whose content equals
// a scalar value's bytes must not collide with it.
const TAG_BYTES: &[u8] = b"kiln:bytes\0";
const TAG_VALUE: &[u8] = b"kiln:value\0";
const TAG_FILE: &[u8] = b"kiln:file\0";
const TAG_TREE: &[u8] = b"kiln:tree\0";
const TAG_ABSENT: &[u8] = b"kiln:absent\0";
const TAG_COMBINE: &[u8] = b"kiln:combine\0";

/// Content fingerprint: a SHA-256 digest over an input's kind and content.
///
/// Fingerprints are pure functions of content. Modification times, inode numbers, and any other
/// filesystem metadata never contribute: touching a file without changing its bytes yields the
/// same fingerprint. Equality comparison is the only change signal.
#[derive(Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
  /// Fingerprints a byte string.
  pub fn of_bytes(bytes: impl AsRef<[u8]>) -> Self {
    let mut hasher = Sha256::new();
    hasher.update(TAG_BYTES);
    hasher.update(bytes.as_ref());
    Self(hasher.finalize().into())
  }

  /// Fingerprints a scalar key-value input, such as a declared build-tool version.
  pub fn of_value(key: &str, value: &str) -> Self {
    let mut hasher = Sha256::new();
    hasher.update(TAG_VALUE);
    hasher.update(key.as_bytes());
    hasher.update([0u8]);
    hasher.update(value.as_bytes());
    Self(hasher.finalize().into())
  }

  /// Fingerprints the content of the file at `path`. An absent file fingerprints to a stable
  /// absent marker: absence is a valid state to transition from and to, not an error.
  pub fn of_file(path: impl AsRef<Path>) -> Result<Self, FingerprintError> {
    let path = path.as_ref();
    let mut hasher = Sha256::new();
    hasher.update(TAG_FILE);
    hash_file_content(path, &mut hasher).map_err(|source| FingerprintError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Ok(Self(hasher.finalize().into()))
  }

  /// Fingerprints the directory tree at `path`: every file's relative path and content, in sorted
  /// order, so that additions, modifications, deletions, and renames all change the fingerprint.
  ///
  /// A regular file fingerprints as its content; an absent path fingerprints to a stable absent
  /// marker.
  pub fn of_tree(path: impl AsRef<Path>) -> Result<Self, FingerprintError> {
    let path = path.as_ref();
    let mut hasher = Sha256::new();
    hasher.update(TAG_TREE);
    hash_tree(path, path, &mut hasher).map_err(|source| FingerprintError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Ok(Self(hasher.finalize().into()))
  }

  /// Combines fingerprints into one, order-sensitively. Used to derive a task's cache key from its
  /// input fingerprints in declaration order.
  pub fn combine(fingerprints: impl IntoIterator<Item=Fingerprint>) -> Self {
    let mut hasher = Sha256::new();
    hasher.update(TAG_COMBINE);
    for fingerprint in fingerprints {
      hasher.update(fingerprint.0);
    }
    Self(hasher.finalize().into())
  }

  /// Renders the fingerprint as lowercase hex, the form used for cache entry names and the ledger.
  pub fn to_hex(&self) -> String {
    let mut hex = String::with_capacity(64);
    for byte in self.0 {
      hex.push_str(&format!("{:02x}", byte));
    }
    hex
  }

  /// Parses a fingerprint from its hex rendering.
  pub fn from_hex(hex: &str) -> Option<Self> {
    if hex.len() != 64 {
      return None;
    }
    let mut bytes = [0u8; 32];
    for (index, byte) in bytes.iter_mut().enumerate() {
      *byte = u8::from_str_radix(&hex[index * 2..index * 2 + 2], 16).ok()?;
    }
    Some(Self(bytes))
  }
}

/// Returns `true` when `current` differs from `previous`. Comparison is pure equality; there is no
/// ordering or recency semantics between fingerprints.
#[inline]
pub fn has_changed(previous: &Fingerprint, current: &Fingerprint) -> bool {
  previous != current
}

impl Display for Fingerprint {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    // Eight hex characters identify an entry well enough for log lines.
    for byte in &self.0[..4] {
      write!(f, "{:02x}", byte)?;
    }
    Ok(())
  }
}

impl Debug for Fingerprint {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    write!(f, "Fingerprint({})", self.to_hex())
  }
}

impl serde::Serialize for Fingerprint {
  fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.to_hex())
  }
}

impl<'de> serde::Deserialize<'de> for Fingerprint {
  fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let hex = <String as serde::Deserialize>::deserialize(deserializer)?;
    Fingerprint::from_hex(&hex)
      .ok_or_else(|| serde::de::Error::custom(format!("invalid fingerprint `{}`", hex)))
  }
}

fn hash_file_content(path: &Path, hasher: &mut Sha256) -> Result<(), io::Error> {
  match fs::File::open(path) {
    Err(e) if e.kind() == io::ErrorKind::NotFound => {
      hasher.update(TAG_ABSENT);
      Ok(())
    }
    Err(e) => Err(e),
    Ok(mut file) => {
      let mut buffer = [0u8; 64 * 1024];
      loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
          return Ok(());
        }
        hasher.update(&buffer[..read]);
      }
    }
  }
}

fn hash_tree(root: &Path, path: &Path, hasher: &mut Sha256) -> Result<(), io::Error> {
  let metadata = match fs::symlink_metadata(path) {
    Err(e) if e.kind() == io::ErrorKind::NotFound => {
      hasher.update(TAG_ABSENT);
      return Ok(());
    }
    Err(e) => return Err(e),
    Ok(metadata) => metadata,
  };
  if metadata.is_dir() {
    let mut entries: Vec<PathBuf> = fs::read_dir(path)?
      .map(|entry| entry.map(|e| e.path()))
      .collect::<Result<_, _>>()?;
    // Sorted traversal makes the fingerprint independent of directory iteration order.
    entries.sort();
    for entry in entries {
      hash_tree(root, &entry, hasher)?;
    }
  } else {
    // Relative path participates, so renames change the fingerprint even with identical content.
    let relative = path.strip_prefix(root).unwrap_or(path);
    hasher.update(relative.to_string_lossy().as_bytes());
    hasher.update([0u8]);
    hash_file_content(path, hasher)?;
  }
  Ok(())
}

/// A declared task input: the unit of change detection.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Input {
  /// A single file, identified by path. Fingerprinted from its content; absence is a valid state.
  File(PathBuf),
  /// A directory tree, identified by its root path. Any membership or content change under the
  /// tree changes the fingerprint.
  Tree(PathBuf),
  /// A scalar value, such as a build-tool version, identified by key.
  Value {
    /// Identity of the scalar within its task.
    key: String,
    /// The declared (or overridden) value.
    value: String,
  },
}

impl Input {
  /// Returns the key under which this input's fingerprint is recorded in the ledger.
  pub fn ledger_key(&self) -> String {
    match self {
      Input::File(path) => format!("file:{}", path.display()),
      Input::Tree(path) => format!("tree:{}", path.display()),
      Input::Value { key, .. } => format!("value:{}", key),
    }
  }

  /// Returns the filesystem path of this input, if it has one.
  pub fn path(&self) -> Option<&Path> {
    match self {
      Input::File(path) | Input::Tree(path) => Some(path),
      Input::Value { .. } => None,
    }
  }

  /// Fingerprints this input's current state.
  pub fn fingerprint(&self) -> Result<Fingerprint, FingerprintError> {
    match self {
      Input::File(path) => Fingerprint::of_file(path),
      Input::Tree(path) => Fingerprint::of_tree(path),
      Input::Value { key, value } => Ok(Fingerprint::of_value(key, value)),
    }
  }
}


#[cfg(test)]
mod test {
  use std::fs;

  use dev_shared::fs::{create_temp_dir, write_until_modified};

  use super::*;

  #[test]
  fn identical_content_yields_identical_fingerprints() {
    assert_eq!(Fingerprint::of_bytes("content"), Fingerprint::of_bytes("content"));
    assert_ne!(Fingerprint::of_bytes("content"), Fingerprint::of_bytes("changed"));
  }

  #[test]
  fn modification_time_does_not_participate() {
    let temp_dir = create_temp_dir();
    let path = temp_dir.path().join("a.src");
    fs::write(&path, "source").unwrap();
    let before = Fingerprint::of_file(&path).unwrap();
    // Rewrite the same bytes with a strictly newer modification time.
    write_until_modified(&path, "source").unwrap();
    assert_eq!(Fingerprint::of_file(&path).unwrap(), before);
  }

  #[test]
  fn absent_file_fingerprints_to_a_stable_marker() {
    let temp_dir = create_temp_dir();
    let path = temp_dir.path().join("missing");
    let absent = Fingerprint::of_file(&path).unwrap();
    assert_eq!(Fingerprint::of_file(&path).unwrap(), absent);

    fs::write(&path, "now present").unwrap();
    assert_ne!(Fingerprint::of_file(&path).unwrap(), absent);
    fs::remove_file(&path).unwrap();
    assert_eq!(Fingerprint::of_file(&path).unwrap(), absent);
  }

  #[test]
  fn input_kinds_occupy_disjoint_fingerprint_spaces() {
    let temp_dir = create_temp_dir();
    let path = temp_dir.path().join("v");
    fs::write(&path, "29.0.2").unwrap();
    let as_file = Fingerprint::of_file(&path).unwrap();
    let as_value = Fingerprint::of_value("v", "29.0.2");
    let as_bytes = Fingerprint::of_bytes("29.0.2");
    assert_ne!(as_file, as_value);
    assert_ne!(as_file, as_bytes);
    assert_ne!(as_value, as_bytes);
  }

  #[test]
  fn value_key_participates() {
    assert_ne!(Fingerprint::of_value("build-tools", "29.0.2"), Fingerprint::of_value("ndk", "29.0.2"));
  }

  #[test]
  fn tree_tracks_membership_and_content() {
    let temp_dir = create_temp_dir();
    let root = temp_dir.path().join("res");
    fs::create_dir_all(root.join("values")).unwrap();
    fs::write(root.join("values/strings.xml"), "<resources/>").unwrap();
    let initial = Fingerprint::of_tree(&root).unwrap();
    assert_eq!(Fingerprint::of_tree(&root).unwrap(), initial);

    // Addition.
    fs::write(root.join("values/colors.xml"), "<resources/>").unwrap();
    let with_addition = Fingerprint::of_tree(&root).unwrap();
    assert_ne!(with_addition, initial);

    // Deletion restores the original fingerprint.
    fs::remove_file(root.join("values/colors.xml")).unwrap();
    assert_eq!(Fingerprint::of_tree(&root).unwrap(), initial);

    // Modification.
    fs::write(root.join("values/strings.xml"), "<resources><string/></resources>").unwrap();
    assert_ne!(Fingerprint::of_tree(&root).unwrap(), initial);
  }

  #[test]
  fn tree_tracks_renames_with_identical_content() {
    let temp_dir = create_temp_dir();
    let root = temp_dir.path().join("jni");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("lib.c"), "int f() { return 1; }").unwrap();
    let before = Fingerprint::of_tree(&root).unwrap();

    fs::rename(root.join("lib.c"), root.join("lib.cpp")).unwrap();
    assert_ne!(Fingerprint::of_tree(&root).unwrap(), before);
  }

  #[test]
  fn combine_is_order_sensitive() {
    let a = Fingerprint::of_bytes("a");
    let b = Fingerprint::of_bytes("b");
    assert_eq!(Fingerprint::combine([a, b]), Fingerprint::combine([a, b]));
    assert_ne!(Fingerprint::combine([a, b]), Fingerprint::combine([b, a]));
    assert_ne!(Fingerprint::combine([a]), a);
  }

  #[test]
  fn hex_round_trips() {
    let fingerprint = Fingerprint::of_bytes("content");
    let hex = fingerprint.to_hex();
    assert_eq!(hex.len(), 64);
    assert_eq!(Fingerprint::from_hex(&hex), Some(fingerprint));
    assert_eq!(Fingerprint::from_hex("zz"), None);
  }

  #[test]
  fn ledger_keys_are_distinct_per_kind() {
    assert_eq!(Input::File("a.src".into()).ledger_key(), "file:a.src");
    assert_eq!(Input::Tree("res".into()).ledger_key(), "tree:res");
    assert_eq!(Input::Value { key: "tools".into(), value: "1".into() }.ledger_key(), "value:tools");
  }
}

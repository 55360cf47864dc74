use std::fs;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use tempfile::TempDir;

/// Creates a new temporary directory that gets cleaned up when dropped.
pub fn create_temp_dir() -> TempDir {
  TempDir::new().expect("failed to create temporary directory")
}

fn modified_time(path: &Path) -> Result<SystemTime, io::Error> {
  match fs::metadata(path) {
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(SystemTime::UNIX_EPOCH),
    Err(e) => Err(e),
    Ok(m) => m.modified(),
  }
}

/// Writes `contents` to the file at `path`, repeating until its modification time changes, and
/// returns the previous modification time. Modification times have low precision on some
/// filesystems and may not change after writes in quick succession.
pub fn write_until_modified(path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<SystemTime, io::Error> {
  let path = path.as_ref();
  let contents = contents.as_ref();
  let modified = modified_time(path)?;
  loop {
    fs::write(path, contents)?;
    if modified != modified_time(path)? {
      return Ok(modified);
    }
  }
}

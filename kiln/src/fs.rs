use std::{fs, io};
use std::fs::Metadata;
use std::path::Path;

/// Gets the metadata for given `path`, returning:
/// - `Ok(Some(metadata))` if a file or directory exists at given path,
/// - `Ok(None)` if no file or directory exists at given path,
/// - `Err(e)` if there was an error getting the metadata for given path.
pub fn metadata(path: impl AsRef<Path>) -> Result<Option<Metadata>, io::Error> {
  match fs::metadata(path) {
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
    Err(e) => Err(e),
    Ok(m) => Ok(Some(m))
  }
}

/// Removes the file or directory tree at `path` if it exists. Absence is not an error.
pub fn remove_path(path: impl AsRef<Path>) -> Result<(), io::Error> {
  let path = path.as_ref();
  let result = match metadata(path)? {
    None => return Ok(()),
    Some(m) if m.is_dir() => fs::remove_dir_all(path),
    Some(_) => fs::remove_file(path),
  };
  match result {
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    other => other,
  }
}

/// Copies the file or directory tree at `src` to `dst`, creating parent directories of `dst` as
/// needed. The source is left untouched.
pub fn copy_path(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<(), io::Error> {
  let src = src.as_ref();
  let dst = dst.as_ref();
  if let Some(parent) = dst.parent() {
    fs::create_dir_all(parent)?;
  }
  match metadata(src)? {
    None => Err(io::Error::new(io::ErrorKind::NotFound, format!("`{}` does not exist", src.display()))),
    Some(m) if m.is_dir() => copy_tree(src, dst),
    Some(_) => fs::copy(src, dst).map(|_| ()),
  }
}

fn copy_tree(src: &Path, dst: &Path) -> Result<(), io::Error> {
  fs::create_dir_all(dst)?;
  for entry in fs::read_dir(src)? {
    let entry = entry?;
    let entry_dst = dst.join(entry.file_name());
    if entry.file_type()?.is_dir() {
      copy_tree(&entry.path(), &entry_dst)?;
    } else {
      fs::copy(entry.path(), entry_dst)?;
    }
  }
  Ok(())
}


#[cfg(test)]
mod test {
  use std::fs;

  use dev_shared::fs::create_temp_dir;

  use super::*;

  #[test]
  fn metadata_some_for_existing_file() {
    let temp_dir = create_temp_dir();
    let file = temp_dir.path().join("f.txt");
    fs::write(&file, "x").unwrap();
    assert!(metadata(&file).unwrap().unwrap().is_file());
  }

  #[test]
  fn metadata_none_for_missing_file() {
    let temp_dir = create_temp_dir();
    assert!(metadata(temp_dir.path().join("missing")).unwrap().is_none());
  }

  #[test]
  fn remove_path_tolerates_absence() {
    let temp_dir = create_temp_dir();
    remove_path(temp_dir.path().join("missing")).unwrap();
  }

  #[test]
  fn remove_path_removes_files_and_trees() {
    let temp_dir = create_temp_dir();
    let file = temp_dir.path().join("f.txt");
    fs::write(&file, "x").unwrap();
    remove_path(&file).unwrap();
    assert!(!file.exists());

    let dir = temp_dir.path().join("d");
    fs::create_dir_all(dir.join("nested")).unwrap();
    fs::write(dir.join("nested/f.txt"), "x").unwrap();
    remove_path(&dir).unwrap();
    assert!(!dir.exists());
  }

  #[test]
  fn copy_path_copies_file_into_new_parent() {
    let temp_dir = create_temp_dir();
    let src = temp_dir.path().join("src.txt");
    fs::write(&src, "payload").unwrap();
    let dst = temp_dir.path().join("deep/nested/dst.txt");
    copy_path(&src, &dst).unwrap();
    assert_eq!(fs::read_to_string(&dst).unwrap(), "payload");
    assert!(src.exists(), "source must be copied, not moved");
  }

  #[test]
  fn copy_path_copies_tree() {
    let temp_dir = create_temp_dir();
    let src = temp_dir.path().join("src");
    fs::create_dir_all(src.join("sub")).unwrap();
    fs::write(src.join("a.txt"), "a").unwrap();
    fs::write(src.join("sub/b.txt"), "b").unwrap();
    let dst = temp_dir.path().join("dst");
    copy_path(&src, &dst).unwrap();
    assert_eq!(fs::read_to_string(dst.join("a.txt")).unwrap(), "a");
    assert_eq!(fs::read_to_string(dst.join("sub/b.txt")).unwrap(), "b");
  }
}

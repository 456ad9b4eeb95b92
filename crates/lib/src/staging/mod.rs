//! The staging tree a recipe installs into before partitioning.
//!
//! The tree is an explicit value handed to every install operation and every
//! style phase in turn. Two backends exist: [`FsStagingTree`], a private
//! directory on disk that external installers can write into, and
//! [`MemoryStagingTree`], used where no real build tools run.
//!
//! All paths given to a tree are relative to its root and already passed
//! through [`normalize`].

mod fs;
mod memory;

use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

pub use fs::FsStagingTree;
pub use memory::MemoryStagingTree;

/// Kind of a staged entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
  Dir,
  File,
  /// Symlink with its literal target.
  Symlink(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
  #[error("path `{0}` escapes the staging root")]
  ParentComponent(String),

  #[error("path `{0}` does not name anything below the staging root")]
  Empty(String),
}

/// Turn a recipe path (`/usr/lib`, `usr/./lib`, `usr/lib/`) into a relative path.
///
/// A leading `/` means the staging root, not the host root. `..` is rejected.
pub fn normalize(path: &str) -> Result<PathBuf, PathError> {
  let mut out = PathBuf::new();
  for component in Path::new(path).components() {
    match component {
      Component::Normal(part) => out.push(part),
      Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
      Component::ParentDir => return Err(PathError::ParentComponent(path.to_string())),
    }
  }
  if out.as_os_str().is_empty() {
    return Err(PathError::Empty(path.to_string()));
  }
  Ok(out)
}

pub(crate) fn not_a_directory(path: &Path) -> io::Error {
  io::Error::new(
    io::ErrorKind::NotADirectory,
    format!("{} is not a directory", path.display()),
  )
}

/// Create a host symlink. Only unix hosts support staged links.
pub(crate) fn host_symlink(target: &Path, link: &Path) -> io::Result<()> {
  #[cfg(unix)]
  {
    std::os::unix::fs::symlink(target, link)
  }
  #[cfg(not(unix))]
  {
    let _ = (target, link);
    Err(io::Error::new(io::ErrorKind::Unsupported, "symlinks are only staged on unix hosts"))
  }
}

pub trait StagingTree: Send + Sync {
  /// Directory on the host backing this tree, if there is one.
  ///
  /// External installers (`make DESTDIR=...`) can only target a tree that has one.
  fn host_root(&self) -> Option<&Path>;

  /// Kind of the entry at `path`, without following a final symlink.
  fn entry(&self, path: &Path) -> io::Result<Option<EntryKind>>;

  /// Create a directory and any missing parents. Existing directories are fine.
  fn create_dir_all(&mut self, path: &Path) -> io::Result<()>;

  /// Create a symlink at `path` pointing at the literal `target`. Parents are created.
  fn symlink(&mut self, target: &Path, path: &Path) -> io::Result<()>;

  /// Remove a file, symlink, or directory tree. Returns whether anything was there.
  fn remove(&mut self, path: &Path) -> io::Result<bool>;

  /// Write a regular file, creating parents and replacing any existing file.
  fn write_file(&mut self, path: &Path, contents: &[u8]) -> io::Result<()>;

  fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;

  /// Every entry in the tree, sorted by path.
  fn walk(&self) -> io::Result<Vec<(PathBuf, EntryKind)>>;

  /// Materialize the single entry at `path` at `dest` on the host.
  ///
  /// Files are hard-linked where the backend allows it and copied otherwise.
  /// Symlinks are recreated with the same target. Directories are created empty.
  fn export(&self, path: &Path, dest: &Path) -> io::Result<()>;

  /// The ownable paths of the tree: every non-directory entry plus every
  /// directory with nothing beneath it. Sorted.
  fn leaves(&self) -> io::Result<Vec<PathBuf>> {
    let entries = self.walk()?;
    let mut leaves = Vec::new();
    for (i, (path, kind)) in entries.iter().enumerate() {
      let is_leaf = match kind {
        EntryKind::Dir => !entries
          .get(i + 1)
          .is_some_and(|(next, _)| next.starts_with(path) && next != path),
        EntryKind::File | EntryKind::Symlink(_) => true,
      };
      if is_leaf {
        leaves.push(path.clone());
      }
    }
    Ok(leaves)
  }
}

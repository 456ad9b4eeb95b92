use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::trace;
use walkdir::WalkDir;

use super::{EntryKind, StagingTree, not_a_directory};

/// Staging tree backed by a private temporary directory.
///
/// The directory is deleted when the tree is dropped. Like
/// [`MemoryStagingTree`](super::MemoryStagingTree), staged symlinks are never
/// followed: a path whose parent is a symlink or a file cannot be written, and
/// does not exist for reads and removals.
#[derive(Debug)]
pub struct FsStagingTree {
  dir: TempDir,
}

impl FsStagingTree {
  /// Create an empty staging tree below `parent`.
  pub fn new_in(parent: &Path) -> io::Result<Self> {
    fs::create_dir_all(parent)?;
    let dir = tempfile::Builder::new().prefix("staging-").tempdir_in(parent)?;
    trace!(root = %dir.path().display(), "created staging tree");
    Ok(Self { dir })
  }

  pub fn root(&self) -> &Path {
    self.dir.path()
  }

  fn host(&self, path: &Path) -> PathBuf {
    self.dir.path().join(path)
  }

  /// Fail unless every existing prefix of `dirs` is a real directory.
  fn check_dirs(&self, dirs: &Path) -> io::Result<()> {
    let mut current = PathBuf::new();
    for component in dirs.components() {
      current.push(component);
      match fs::symlink_metadata(self.host(&current)) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Err(not_a_directory(&current)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
      }
    }
    Ok(())
  }

  /// Host path of `path`, refusing to resolve through a staged symlink.
  fn checked(&self, path: &Path) -> io::Result<PathBuf> {
    if let Some(parent) = path.parent() {
      self.check_dirs(parent)?;
    }
    Ok(self.host(path))
  }

  /// Like [`checked`](Self::checked), but a blocked parent means "absent".
  fn lookup(&self, path: &Path) -> io::Result<Option<PathBuf>> {
    match self.checked(path) {
      Ok(host) => Ok(Some(host)),
      Err(e) if e.kind() == io::ErrorKind::NotADirectory => Ok(None),
      Err(e) => Err(e),
    }
  }
}

fn kind_of(path: &Path, meta: &fs::Metadata) -> io::Result<EntryKind> {
  let ft = meta.file_type();
  Ok(if ft.is_symlink() {
    EntryKind::Symlink(fs::read_link(path)?)
  } else if ft.is_dir() {
    EntryKind::Dir
  } else {
    EntryKind::File
  })
}

impl StagingTree for FsStagingTree {
  fn host_root(&self) -> Option<&Path> {
    Some(self.dir.path())
  }

  fn entry(&self, path: &Path) -> io::Result<Option<EntryKind>> {
    let Some(host) = self.lookup(path)? else {
      return Ok(None);
    };
    match fs::symlink_metadata(&host) {
      Ok(meta) => kind_of(&host, &meta).map(Some),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e),
    }
  }

  fn create_dir_all(&mut self, path: &Path) -> io::Result<()> {
    self.check_dirs(path)?;
    fs::create_dir_all(self.host(path))
  }

  fn symlink(&mut self, target: &Path, path: &Path) -> io::Result<()> {
    let host = self.checked(path)?;
    if let Some(parent) = host.parent() {
      fs::create_dir_all(parent)?;
    }
    super::host_symlink(target, &host)
  }

  fn remove(&mut self, path: &Path) -> io::Result<bool> {
    let Some(host) = self.lookup(path)? else {
      return Ok(false);
    };
    let meta = match fs::symlink_metadata(&host) {
      Ok(meta) => meta,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
      Err(e) => return Err(e),
    };
    if meta.is_dir() {
      fs::remove_dir_all(&host)?;
    } else {
      fs::remove_file(&host)?;
    }
    Ok(true)
  }

  fn write_file(&mut self, path: &Path, contents: &[u8]) -> io::Result<()> {
    let host = self.checked(path)?;
    if let Some(parent) = host.parent() {
      fs::create_dir_all(parent)?;
    }
    // Replace a staged symlink instead of writing through it.
    if fs::symlink_metadata(&host).is_ok_and(|meta| meta.file_type().is_symlink()) {
      fs::remove_file(&host)?;
    }
    fs::write(host, contents)
  }

  fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
    match self.lookup(path)? {
      Some(host) if !fs::symlink_metadata(&host).is_ok_and(|meta| meta.file_type().is_symlink()) => fs::read(host),
      Some(_) => Err(io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("{} is not a regular file", path.display()),
      )),
      None => Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} not found", path.display()),
      )),
    }
  }

  fn walk(&self) -> io::Result<Vec<(PathBuf, EntryKind)>> {
    let root = self.dir.path();
    let mut entries = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
      let entry = entry.map_err(io::Error::other)?;
      let relative = entry.path().strip_prefix(root).map_err(io::Error::other)?.to_path_buf();
      let meta = entry.metadata().map_err(io::Error::other)?;
      entries.push((relative, kind_of(entry.path(), &meta)?));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
  }

  fn export(&self, path: &Path, dest: &Path) -> io::Result<()> {
    let host = self.checked(path)?;
    let meta = fs::symlink_metadata(&host)?;
    match kind_of(&host, &meta)? {
      EntryKind::Dir => fs::create_dir_all(dest),
      EntryKind::Symlink(target) => super::host_symlink(&target, dest),
      EntryKind::File => match fs::hard_link(&host, dest) {
        Ok(()) => Ok(()),
        Err(e) => {
          trace!(error = %e, path = %path.display(), "hard link failed, copying");
          fs::copy(&host, dest).map(|_| ())
        }
      },
    }
  }
}

//! Unpacking verified artifacts into a recipe's source directory.

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
  Tar,
  TarGz,
  /// Anything else is copied as is.
  Plain,
}

impl ArchiveKind {
  pub fn detect(file_name: &str) -> Self {
    if file_name.ends_with(".tar.gz") || file_name.ends_with(".tgz") {
      ArchiveKind::TarGz
    } else if file_name.ends_with(".tar") {
      ArchiveKind::Tar
    } else {
      ArchiveKind::Plain
    }
  }
}

/// Place one artifact into `dest`: extract archives, copy anything else under `file_name`.
///
/// For an archive whose entries all live below one top-level directory, returns
/// that directory.
pub fn unpack(artifact: &Path, file_name: &str, dest: &Path) -> io::Result<Option<PathBuf>> {
  fs::create_dir_all(dest)?;
  let root = match ArchiveKind::detect(file_name) {
    ArchiveKind::TarGz => unpack_tar(Archive::new(GzDecoder::new(File::open(artifact)?)), dest)?,
    ArchiveKind::Tar => unpack_tar(Archive::new(File::open(artifact)?), dest)?,
    ArchiveKind::Plain => {
      fs::copy(artifact, dest.join(file_name))?;
      None
    }
  };
  debug!(artifact = %artifact.display(), dest = %dest.display(), root = ?root, "unpacked artifact");
  Ok(root)
}

fn unpack_tar<R: io::Read>(mut archive: Archive<R>, dest: &Path) -> io::Result<Option<PathBuf>> {
  let mut top: Option<PathBuf> = None;
  let mut single = true;
  for entry in archive.entries()? {
    let mut entry = entry?;
    let kind = entry.header().entry_type();
    if kind.is_pax_global_extensions() || kind.is_pax_local_extensions() {
      continue;
    }
    let path = entry.path()?.into_owned();
    let mut parts = path.components().filter(|c| matches!(c, Component::Normal(_)));
    if let Some(first) = parts.next() {
      let nested = parts.next().is_some();
      let is_dir = kind.is_dir();
      let name = PathBuf::from(first.as_os_str());
      match &top {
        _ if !nested && !is_dir => single = false,
        None => top = Some(name),
        Some(seen) if *seen != name => single = false,
        Some(_) => {}
      }
    }
    entry.unpack_in(dest)?;
  }
  Ok(top.filter(|_| single).map(|name| dest.join(name)).filter(|dir| dir.is_dir()))
}

/// The directory build phases run in.
///
/// An explicit `source-dir` wins. Otherwise the single top-level directory of
/// the first archive (the usual `name-version/` tarball layout), else the
/// source root itself.
pub fn build_dir(src_root: &Path, source_dir: Option<&Path>, archive_root: Option<&Path>) -> PathBuf {
  match (source_dir, archive_root) {
    (Some(sub), _) => src_root.join(sub),
    (None, Some(root)) => root.to_path_buf(),
    (None, None) => src_root.to_path_buf(),
  }
}

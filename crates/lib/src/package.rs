//! Output packages and their on-disk form.
//!
//! Each package is written to `<out>/<name>-<version>-r<revision>/`:
//!
//! ```text
//! musl-devel-1.2.3-r0/
//! ├── package.json   identity, metadata, depends, owned paths
//! └── files/         the owned entries, relative to the staging root
//! ```
//!
//! Every emitted entry's mtime is pinned to `SOURCE_DATE_EPOCH`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::partition::Partition;
use crate::recipe::{PackageId, Recipe, check_component};
use crate::staging::StagingTree;

pub const MANIFEST_FILE: &str = "package.json";
pub const PAYLOAD_DIR: &str = "files";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
  Main,
  Side,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Package {
  #[serde(flatten)]
  pub id: PackageId,
  pub kind: PackageKind,
  pub description: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub home: Option<String>,
  pub maintainers: Vec<String>,
  pub licenses: Vec<String>,
  pub depends: Vec<String>,
  pub provides: Vec<String>,
  /// Recipe that produced this package.
  pub origin: String,
  /// Owned staging paths, sorted.
  pub paths: Vec<PathBuf>,
}

impl Package {
  /// Directory name under the output root.
  pub fn dir_name(&self) -> String {
    format!("{}-{}-r{}", self.id.name, self.id.version, self.id.revision)
  }
}

/// Turn a partition into packages: the main package first, then sides in declaration order.
///
/// `recipe` must already have its templates resolved.
pub fn assemble(recipe: &Recipe, partition: Partition) -> Vec<Package> {
  let mut packages = Vec::with_capacity(1 + partition.sides.len());
  packages.push(Package {
    id: recipe.id(),
    kind: PackageKind::Main,
    description: recipe.description.clone(),
    home: recipe.home.clone(),
    maintainers: recipe.maintainers.clone(),
    licenses: recipe.licenses.clone(),
    depends: recipe.depends.clone(),
    provides: recipe.provides.clone(),
    origin: recipe.name.clone(),
    paths: partition.main,
  });

  for (side, (_, paths)) in recipe.sides.iter().zip(partition.sides) {
    packages.push(Package {
      id: PackageId {
        name: side.name.clone(),
        version: recipe.version.clone(),
        revision: recipe.revision,
      },
      kind: PackageKind::Side,
      description: side.description.clone(),
      home: recipe.home.clone(),
      maintainers: recipe.maintainers.clone(),
      licenses: recipe.licenses.clone(),
      depends: side.depends.clone(),
      provides: Vec::new(),
      origin: recipe.name.clone(),
      paths,
    });
  }
  packages
}

#[derive(Debug, Error)]
#[error("emitting package {package} failed at {}: {source}", .path.display())]
pub struct EmitError {
  pub package: String,
  pub path: PathBuf,
  #[source]
  pub source: io::Error,
}

/// Write one package below `out_dir`, replacing any earlier copy. Returns its directory.
pub fn emit(package: &Package, staging: &dyn StagingTree, out_dir: &Path, epoch: i64) -> Result<PathBuf, EmitError> {
  let dir = out_dir.join(package.dir_name());
  let err = |path: &Path, source: io::Error| EmitError {
    package: package.id.to_string(),
    path: path.to_path_buf(),
    source,
  };

  check_component("package name", &package.id.name)
    .and_then(|()| check_component("version", &package.id.version))
    .map_err(|e| err(&dir, io::Error::new(io::ErrorKind::InvalidInput, e)))?;

  if fs::symlink_metadata(&dir).is_ok() {
    debug!(dir = %dir.display(), "replacing previous package output");
    fs::remove_dir_all(&dir).map_err(|e| err(&dir, e))?;
  }
  let payload = dir.join(PAYLOAD_DIR);
  fs::create_dir_all(&payload).map_err(|e| err(&payload, e))?;

  for path in &package.paths {
    let dest = payload.join(path);
    if let Some(parent) = dest.parent() {
      fs::create_dir_all(parent).map_err(|e| err(parent, e))?;
    }
    staging.export(path, &dest).map_err(|e| err(path, e))?;
  }

  let manifest = dir.join(MANIFEST_FILE);
  let json = serde_json::to_string_pretty(package).map_err(|e| err(&manifest, io::Error::other(e)))?;
  fs::write(&manifest, format!("{json}\n")).map_err(|e| err(&manifest, e))?;

  pin_mtimes(&dir, epoch).map_err(|e| err(&dir, e))?;
  debug!(package = %package.id, files = package.paths.len(), dir = %dir.display(), "wrote package");
  Ok(dir)
}

/// Write all packages of one recipe below `out_dir`, or none of them.
///
/// Packages are written into a scratch directory next to their final location
/// and renamed into place only once every one of them was written. Returns the
/// final directories in package order.
pub fn emit_all(
  packages: &[Package],
  staging: &dyn StagingTree,
  out_dir: &Path,
  epoch: i64,
) -> Result<Vec<PathBuf>, EmitError> {
  let Some(first) = packages.first() else {
    return Ok(Vec::new());
  };
  let err = |package: &Package, path: &Path, source: io::Error| EmitError {
    package: package.id.to_string(),
    path: path.to_path_buf(),
    source,
  };

  fs::create_dir_all(out_dir).map_err(|e| err(first, out_dir, e))?;
  let scratch = tempfile::Builder::new()
    .prefix(".emit-")
    .tempdir_in(out_dir)
    .map_err(|e| err(first, out_dir, e))?;

  let mut written = Vec::with_capacity(packages.len());
  for package in packages {
    written.push(emit(package, staging, scratch.path(), epoch)?);
  }

  let mut placed: Vec<PathBuf> = Vec::with_capacity(packages.len());
  for (package, from) in packages.iter().zip(written) {
    let dir = out_dir.join(package.dir_name());
    let moved = replace_dir(&from, &dir);
    if let Err(e) = moved {
      for done in &placed {
        if let Err(cleanup) = fs::remove_dir_all(done) {
          debug!(dir = %done.display(), error = %cleanup, "could not roll back package output");
        }
      }
      return Err(err(package, &dir, e));
    }
    info!(package = %package.id, files = package.paths.len(), dir = %dir.display(), "emitted package");
    placed.push(dir);
  }
  Ok(placed)
}

fn replace_dir(from: &Path, to: &Path) -> io::Result<()> {
  if fs::symlink_metadata(to).is_ok() {
    debug!(dir = %to.display(), "replacing previous package output");
    fs::remove_dir_all(to)?;
  }
  fs::rename(from, to)
}

/// Set every entry below (and including) `dir` to `epoch`, children before parents.
fn pin_mtimes(dir: &Path, epoch: i64) -> io::Result<()> {
  let time = FileTime::from_unix_time(epoch, 0);
  for entry in WalkDir::new(dir).contents_first(true) {
    let entry = entry.map_err(io::Error::other)?;
    filetime::set_symlink_file_times(entry.path(), time, time)?;
  }
  Ok(())
}

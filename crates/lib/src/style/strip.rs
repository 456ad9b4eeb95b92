//! Post-install stripping of staged ELF objects.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use goblin::elf::Elf;
use goblin::elf::header::{ET_DYN, ET_EXEC};
use tracing::{debug, info};

use super::{Invocation, Phase, StyleError, ToolRunner};
use crate::staging::{EntryKind, StagingTree};

const ELF_MAGIC: &[u8] = b"\x7fELF";
const AR_MAGIC: &[u8] = b"!<arch>\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StripKind {
  /// Executables, including position-independent ones.
  Executable,
  SharedObject,
  StaticArchive,
}

impl StripKind {
  fn flags(self) -> &'static [&'static str] {
    match self {
      StripKind::Executable => &[],
      StripKind::SharedObject => &["--strip-unneeded"],
      StripKind::StaticArchive => &["--strip-debug"],
    }
  }
}

/// Decide how, if at all, a file should be stripped.
pub fn classify(bytes: &[u8]) -> Option<StripKind> {
  if bytes.starts_with(AR_MAGIC) {
    return Some(StripKind::StaticArchive);
  }
  if !bytes.starts_with(ELF_MAGIC) {
    return None;
  }
  let elf = Elf::parse(bytes).ok()?;
  match elf.header.e_type {
    ET_EXEC => Some(StripKind::Executable),
    ET_DYN if elf.interpreter.is_some() => Some(StripKind::Executable),
    ET_DYN => Some(StripKind::SharedObject),
    _ => None,
  }
}

fn has_object_magic(path: &Path) -> io::Result<bool> {
  let mut magic = [0u8; 8];
  let mut file = File::open(path)?;
  let mut read = 0;
  while read < magic.len() {
    let n = file.read(&mut magic[read..])?;
    if n == 0 {
      break;
    }
    read += n;
  }
  Ok(magic[..read].starts_with(ELF_MAGIC) || magic[..read].starts_with(AR_MAGIC))
}

/// Host paths of the strippable objects among `files`, in order. Blocking.
fn find_objects(root: &Path, files: Vec<PathBuf>) -> io::Result<Vec<(PathBuf, StripKind)>> {
  let mut objects = Vec::new();
  for path in files {
    let host = root.join(&path);
    if !has_object_magic(&host)? {
      continue;
    }
    if let Some(kind) = classify(&fs::read(&host)?) {
      debug!(path = %path.display(), kind = ?kind, "found strippable object");
      objects.push((host, kind));
    }
  }
  Ok(objects)
}

/// Run `strip` over every ELF object and archive in the staging tree.
///
/// Trees without a host directory hold nothing a host tool could strip.
pub async fn strip_tree(staging: &dyn StagingTree, runner: &dyn ToolRunner) -> Result<(), StyleError> {
  let Some(root) = staging.host_root() else {
    debug!("staging tree is not on disk, nothing to strip");
    return Ok(());
  };
  let failed = |e: io::Error| StyleError::failed(Phase::PostInstall, e);

  let files: Vec<PathBuf> = staging
    .walk()
    .map_err(failed)?
    .into_iter()
    .filter(|(_, kind)| *kind == EntryKind::File)
    .map(|(path, _)| path)
    .collect();
  let host_root = root.to_path_buf();
  let objects = tokio::task::spawn_blocking(move || find_objects(&host_root, files))
    .await
    .map_err(io::Error::other)
    .and_then(|found| found)
    .map_err(failed)?;

  for (host, kind) in &objects {
    let invocation = Invocation::new("strip", root)
      .args(kind.flags().iter().copied())
      .arg(host.display().to_string());
    runner
      .run(&invocation)
      .await
      .map_err(|e| StyleError::failed(Phase::PostInstall, e))?;
  }

  if !objects.is_empty() {
    info!(count = objects.len(), "stripped objects");
  }
  Ok(())
}

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use super::{EntryKind, StagingTree, not_a_directory};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
  Dir,
  File(Vec<u8>),
  Symlink(PathBuf),
}

/// Staging tree held entirely in memory.
///
/// Symlinks are recorded but never followed; writing through a symlinked
/// directory fails with `NotADirectory`.
#[derive(Debug, Clone, Default)]
pub struct MemoryStagingTree {
  nodes: BTreeMap<PathBuf, Node>,
}

impl MemoryStagingTree {
  pub fn new() -> Self {
    Self::default()
  }

  fn ensure_parents(&mut self, path: &Path) -> io::Result<()> {
    match path.parent() {
      Some(parent) if !parent.as_os_str().is_empty() => self.create_dir_all(parent),
      _ => Ok(()),
    }
  }
}

impl StagingTree for MemoryStagingTree {
  fn host_root(&self) -> Option<&Path> {
    None
  }

  fn entry(&self, path: &Path) -> io::Result<Option<EntryKind>> {
    Ok(self.nodes.get(path).map(|node| match node {
      Node::Dir => EntryKind::Dir,
      Node::File(_) => EntryKind::File,
      Node::Symlink(target) => EntryKind::Symlink(target.clone()),
    }))
  }

  fn create_dir_all(&mut self, path: &Path) -> io::Result<()> {
    let mut current = PathBuf::new();
    for component in path.components() {
      current.push(component);
      match self.nodes.get(&current) {
        Some(Node::Dir) => {}
        Some(_) => return Err(not_a_directory(&current)),
        None => {
          self.nodes.insert(current.clone(), Node::Dir);
        }
      }
    }
    Ok(())
  }

  fn symlink(&mut self, target: &Path, path: &Path) -> io::Result<()> {
    if self.nodes.contains_key(path) {
      return Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("{} already exists", path.display()),
      ));
    }
    self.ensure_parents(path)?;
    self.nodes.insert(path.to_path_buf(), Node::Symlink(target.to_path_buf()));
    Ok(())
  }

  fn remove(&mut self, path: &Path) -> io::Result<bool> {
    let doomed: Vec<PathBuf> = self
      .nodes
      .range(path.to_path_buf()..)
      .take_while(|(p, _)| p.starts_with(path))
      .map(|(p, _)| p.clone())
      .collect();
    for p in &doomed {
      self.nodes.remove(p);
    }
    Ok(!doomed.is_empty())
  }

  fn write_file(&mut self, path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(Node::Dir) = self.nodes.get(path) {
      return Err(io::Error::new(
        io::ErrorKind::IsADirectory,
        format!("{} is a directory", path.display()),
      ));
    }
    self.ensure_parents(path)?;
    self.nodes.insert(path.to_path_buf(), Node::File(contents.to_vec()));
    Ok(())
  }

  fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
    match self.nodes.get(path) {
      Some(Node::File(contents)) => Ok(contents.clone()),
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
    self
      .nodes
      .keys()
      .map(|p| Ok((p.clone(), self.entry(p)?.ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?)))
      .collect()
  }

  fn export(&self, path: &Path, dest: &Path) -> io::Result<()> {
    match self.nodes.get(path) {
      Some(Node::Dir) => std::fs::create_dir_all(dest),
      Some(Node::File(contents)) => std::fs::write(dest, contents),
      Some(Node::Symlink(target)) => super::host_symlink(target, dest),
      None => Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} not found", path.display()),
      )),
    }
  }
}

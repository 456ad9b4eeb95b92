//! Splitting a finished staging tree into package payloads.
//!
//! Side packages are evaluated in declaration order. Each claims, from the
//! paths nobody has claimed yet, every path that one of its patterns matches,
//! either directly or through one of the path's parent directories (a pattern
//! naming a directory takes everything beneath it). `*` never crosses a `/`.
//! Whatever no side claims belongs to the main package.
//!
//! A later side whose pattern also matches a path an earlier side already
//! took is a [`PartitionError::ClaimConflict`] under
//! [`ClaimPrecedence::Strict`]; under [`ClaimPrecedence::FirstDeclared`] the
//! earlier side keeps it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::recipe::SidePackage;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
  case_sensitive: true,
  require_literal_separator: true,
  require_literal_leading_dot: false,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClaimPrecedence {
  #[default]
  Strict,
  FirstDeclared,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartitionError {
  #[error("side package `{side}` has an invalid claim `{pattern}`: {message}")]
  BadPattern {
    side: String,
    pattern: String,
    message: String,
  },

  #[error("{} is claimed by both `{first}` and `{second}`", .path.display())]
  ClaimConflict {
    path: PathBuf,
    first: String,
    second: String,
  },
}

/// The ownership split of one staging tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
  pub main: Vec<PathBuf>,
  /// One entry per side package, in declaration order.
  pub sides: Vec<(String, Vec<PathBuf>)>,
}

impl Partition {
  /// Name of the side owning `path`, or `None` when main owns it or it is not staged.
  pub fn side_owner(&self, path: &Path) -> Option<&str> {
    self
      .sides
      .iter()
      .find(|(_, paths)| paths.binary_search_by(|p| p.as_path().cmp(path)).is_ok())
      .map(|(name, _)| name.as_str())
  }

  pub fn total_paths(&self) -> usize {
    self.main.len() + self.sides.iter().map(|(_, paths)| paths.len()).sum::<usize>()
  }
}

fn compile(side: &SidePackage) -> Result<Vec<(String, Pattern)>, PartitionError> {
  side
    .claims
    .iter()
    .map(|claim| {
      let trimmed = claim.trim_start_matches('/').trim_end_matches('/');
      Pattern::new(trimmed)
        .map(|p| (claim.clone(), p))
        .map_err(|e| PartitionError::BadPattern {
          side: side.name.clone(),
          pattern: claim.clone(),
          message: e.msg.to_string(),
        })
    })
    .collect()
}

/// Whether `pattern` matches `path` or one of its parent directories.
fn claims(pattern: &Pattern, path: &Path) -> bool {
  path
    .ancestors()
    .filter(|a| !a.as_os_str().is_empty())
    .any(|a| pattern.matches_path_with(a, MATCH_OPTIONS))
}

/// Partition `paths` (the tree's leaves, sorted) between the main package and `sides`.
pub fn partition(
  paths: &[PathBuf],
  sides: &[SidePackage],
  precedence: ClaimPrecedence,
) -> Result<Partition, PartitionError> {
  // path -> index of owning side
  let mut owner: BTreeMap<&Path, usize> = BTreeMap::new();

  for (side_index, side) in sides.iter().enumerate() {
    for (claim, pattern) in compile(side)? {
      let mut matched = 0usize;
      for path in paths {
        if !claims(&pattern, path) {
          continue;
        }
        matched += 1;
        match owner.get(path.as_path()) {
          None => {
            owner.insert(path.as_path(), side_index);
          }
          Some(&earlier) if earlier == side_index => {}
          Some(&earlier) => match precedence {
            ClaimPrecedence::Strict => {
              return Err(PartitionError::ClaimConflict {
                path: path.clone(),
                first: sides[earlier].name.clone(),
                second: side.name.clone(),
              });
            }
            ClaimPrecedence::FirstDeclared => {
              debug!(path = %path.display(), kept_by = %sides[earlier].name, "claim shadowed");
            }
          },
        }
      }
      if matched == 0 {
        warn!(side = %side.name, claim = %claim, "claim matched no staged path");
      }
    }
  }

  let mut main = Vec::new();
  let mut side_paths: Vec<Vec<PathBuf>> = vec![Vec::new(); sides.len()];
  for path in paths {
    match owner.get(path.as_path()) {
      Some(&index) => side_paths[index].push(path.clone()),
      None => main.push(path.clone()),
    }
  }

  Ok(Partition {
    main,
    sides: sides.iter().map(|s| s.name.clone()).zip(side_paths).collect(),
  })
}

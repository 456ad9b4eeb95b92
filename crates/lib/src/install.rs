//! The install operation interpreter.
//!
//! A recipe's `install` block is a replay log over the staging tree: each
//! operation runs once, in declaration order, and may build on or undo what
//! earlier operations (including the style's own install phase) left behind.
//!
//! - `dir <path>` creates the directory and missing parents
//! - `link <target> <path>` creates a symlink to the literal `target`; an
//!   existing entry at `path` is a conflict unless it is the very same link
//! - `rm <path>` removes a file or directory tree; a missing path is fine
//! - `make-install` runs the style's install phase

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::recipe::InstallOp;
use crate::staging::{self, EntryKind, PathError};
use crate::style::{PhaseContext, StyleDriver, StyleError};

#[derive(Debug, Error)]
pub enum InstallError {
  #[error("install step {index} `{op}`: {} already exists and is not the same link", .path.display())]
  PathConflict { index: usize, op: String, path: PathBuf },

  #[error("install step {index} `{op}`: {source}")]
  InvalidPath {
    index: usize,
    op: String,
    #[source]
    source: PathError,
  },

  #[error("install step {index} `{op}`: {source}")]
  Io {
    index: usize,
    op: String,
    #[source]
    source: io::Error,
  },

  #[error("install step {index} `make-install`: {source}")]
  Style {
    index: usize,
    #[source]
    source: StyleError,
  },
}

impl InstallError {
  /// Zero-based position of the failing operation.
  pub fn index(&self) -> usize {
    match self {
      InstallError::PathConflict { index, .. }
      | InstallError::InvalidPath { index, .. }
      | InstallError::Io { index, .. }
      | InstallError::Style { index, .. } => *index,
    }
  }
}

/// Replay `ops` against `ctx.staging`, top to bottom.
pub async fn run_install_ops(
  ops: &[InstallOp],
  driver: &mut StyleDriver,
  ctx: &mut PhaseContext<'_>,
) -> Result<(), InstallError> {
  for (index, op) in ops.iter().enumerate() {
    debug!(recipe = %ctx.recipe.name, index, op = %op, "install step");

    let io_err = |source: io::Error| InstallError::Io {
      index,
      op: op.to_string(),
      source,
    };
    let path_of = |raw: &str| {
      staging::normalize(raw).map_err(|source| InstallError::InvalidPath {
        index,
        op: op.to_string(),
        source,
      })
    };

    match op {
      InstallOp::MakeDir(raw) => {
        let path = path_of(raw)?;
        ctx.staging.create_dir_all(&path).map_err(io_err)?;
      }
      InstallOp::Link { target, link_path } => {
        let path = path_of(link_path)?;
        let target = Path::new(target);
        match ctx.staging.entry(&path).map_err(io_err)? {
          None => ctx.staging.symlink(target, &path).map_err(io_err)?,
          Some(EntryKind::Symlink(existing)) if existing == target => {
            debug!(path = %path.display(), "identical link already present");
          }
          Some(_) => {
            return Err(InstallError::PathConflict {
              index,
              op: op.to_string(),
              path,
            });
          }
        }
      }
      InstallOp::Remove(raw) => {
        let path = path_of(raw)?;
        if !ctx.staging.remove(&path).map_err(io_err)? {
          debug!(path = %path.display(), "nothing to remove");
        }
      }
      InstallOp::RunStyleInstall => {
        driver
          .run_install(ctx)
          .await
          .map_err(|source| InstallError::Style { index, source })?;
      }
    }
  }
  Ok(())
}

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::fetch::FetchError;
use crate::install::InstallError;
use crate::package::{EmitError, Package};
use crate::partition::PartitionError;
use crate::recipe::{IdentityError, PackageId};
use crate::staging::PathError;
use crate::style::{Phase, StyleError};
use crate::template::TemplateError;

/// Where in a recipe's pipeline a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
  /// Scheduling before the pipeline started.
  Schedule,
  Resolve,
  /// Looking up the recipe's build style.
  Style,
  /// Creating the recipe's work directory.
  Prepare,
  Fetch,
  Unpack,
  Staging,
  Phase(Phase),
  Install,
  Partition,
  Emit,
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Stage::Schedule => f.write_str("schedule"),
      Stage::Resolve => f.write_str("template resolution"),
      Stage::Style => f.write_str("style lookup"),
      Stage::Prepare => f.write_str("prepare"),
      Stage::Fetch => f.write_str("fetch"),
      Stage::Unpack => f.write_str("unpack"),
      Stage::Staging => f.write_str("staging"),
      Stage::Phase(phase) => write!(f, "{phase} phase"),
      Stage::Install => f.write_str("install"),
      Stage::Partition => f.write_str("partition"),
      Stage::Emit => f.write_str("emit"),
    }
  }
}

#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  Template(#[from] TemplateError),

  #[error(transparent)]
  Identity(#[from] IdentityError),

  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error(transparent)]
  Style(#[from] StyleError),

  #[error(transparent)]
  Install(#[from] InstallError),

  #[error(transparent)]
  Partition(#[from] PartitionError),

  #[error(transparent)]
  Emit(#[from] EmitError),

  #[error("invalid source-dir: {0}")]
  SourceDir(#[from] PathError),

  #[error("{context}: {source}")]
  Io {
    context: String,
    #[source]
    source: std::io::Error,
  },

  #[error("build task aborted: {0}")]
  Aborted(String),
}

impl BuildError {
  pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
    BuildError::Io {
      context: context.into(),
      source,
    }
  }
}

/// A failure local to one recipe.
#[derive(Debug, Error)]
#[error("recipe {recipe} failed during {stage}: {source}")]
pub struct RecipeError {
  pub recipe: String,
  pub stage: Stage,
  #[source]
  pub source: BuildError,
}

impl RecipeError {
  pub fn new(recipe: impl Into<String>, stage: Stage, source: impl Into<BuildError>) -> Self {
    Self {
      recipe: recipe.into(),
      stage,
      source: source.into(),
    }
  }
}

/// A package written to the output directory.
#[derive(Debug, Clone, Serialize)]
pub struct EmittedPackage {
  pub package: Package,
  pub dir: PathBuf,
}

/// Result of one successful recipe build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildOutcome {
  pub recipe: String,
  pub id: PackageId,
  /// Main package first, then sides in declaration order.
  pub packages: Vec<EmittedPackage>,
}

impl BuildOutcome {
  /// Owned paths per package name, in package order.
  pub fn ownership(&self) -> Vec<(&str, &[PathBuf])> {
    self
      .packages
      .iter()
      .map(|p| (p.package.id.name.as_str(), p.package.paths.as_slice()))
      .collect()
  }
}

//! Types for running a set of recipes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::build::{BuildOutcome, RecipeError};

/// What a recipe failure does to the rest of the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureMode {
  /// Cancel everything in flight and queued.
  #[default]
  FailFast,
  /// Skip what depends on the failed recipe and keep building the rest.
  KeepGoing,
}

/// Structural errors in the recipe set. Nothing is built when one occurs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DagError {
  #[error("package {package} is produced by both {first} and {second}")]
  DuplicateProducer {
    package: String,
    first: String,
    second: String,
  },

  #[error("dependency cycle between recipes: {}", .recipes.join(" -> "))]
  Cycle { recipes: Vec<String> },
}

/// A recipe that never ran because something it depends on failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecipe {
  pub recipe: String,
  /// The failed recipe that caused the skip.
  pub failed_dependency: String,
}

/// Outcome of a whole run. Every input recipe appears in exactly one list.
#[derive(Debug, Default)]
pub struct RunReport {
  pub built: Vec<BuildOutcome>,
  /// At most one entry in fail-fast mode.
  pub failed: Vec<RecipeError>,
  pub skipped: Vec<SkippedRecipe>,
  /// Queued or in-flight recipes stopped by a fail-fast abort.
  pub cancelled: Vec<String>,
}

impl RunReport {
  pub fn is_success(&self) -> bool {
    self.failed.is_empty() && self.skipped.is_empty() && self.cancelled.is_empty()
  }

  /// Recipe count across all outcomes.
  pub fn total(&self) -> usize {
    self.built.len() + self.failed.len() + self.skipped.len() + self.cancelled.len()
  }

  pub(crate) fn sort(&mut self) {
    self.built.sort_by(|a, b| a.recipe.cmp(&b.recipe));
    self.failed.sort_by(|a, b| a.recipe.cmp(&b.recipe));
    self.skipped.sort_by(|a, b| a.recipe.cmp(&b.recipe));
    self.cancelled.sort();
  }
}

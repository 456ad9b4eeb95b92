//! Build styles: named, pluggable phase sequences.
//!
//! A [`BuildStyle`] declares the ordered phases it implements and runs one
//! phase at a time against a [`PhaseContext`]. The [`StyleRegistry`] maps style
//! names to implementations, and the [`StyleDriver`] runs a style's phases for
//! one recipe, each at most once:
//!
//! 1. every phase before `install`, before any install operation
//! 2. `install`, when the install operations reach `make-install`
//! 3. every phase after `install`, once the install operations are done

mod builtin;
mod runner;
mod strip;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::recipe::{Recipe, RecipeOptions};
use crate::staging::StagingTree;

pub use builtin::{ConfigureStyle, MakeStyle, NoopStyle};
pub use runner::{Invocation, ProcessRunner, RunError, ToolRunner};
pub use strip::{StripKind, classify, strip_tree};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
  Prepare,
  Configure,
  Build,
  Install,
  PostInstall,
}

impl Phase {
  pub fn as_str(self) -> &'static str {
    match self {
      Phase::Prepare => "prepare",
      Phase::Configure => "configure",
      Phase::Build => "build",
      Phase::Install => "install",
      Phase::PostInstall => "post-install",
    }
  }
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Error)]
pub enum StyleError {
  #[error("unknown build style `{name}` (registered: {})", .known.join(", "))]
  UnknownStyle { name: String, known: Vec<String> },

  #[error("{phase} phase failed: {source}")]
  PhaseFailed {
    phase: Phase,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("{phase} phase timed out after {timeout:?}")]
  Timeout { phase: Phase, timeout: Duration },

  #[error("{phase} phase already ran")]
  PhaseRepeated { phase: Phase },

  #[error("style `{style}` needs a staging tree on disk")]
  NoHostTree { style: String },
}

impl StyleError {
  pub fn failed(phase: Phase, source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
    StyleError::PhaseFailed {
      phase,
      source: source.into(),
    }
  }

  /// Phase this error happened in, if any.
  pub fn phase(&self) -> Option<Phase> {
    match self {
      StyleError::PhaseFailed { phase, .. }
      | StyleError::Timeout { phase, .. }
      | StyleError::PhaseRepeated { phase } => Some(*phase),
      StyleError::UnknownStyle { .. } | StyleError::NoHostTree { .. } => None,
    }
  }
}

/// Run-wide knobs the built-in styles read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleSettings {
  /// `-j` value for make.
  pub make_jobs: usize,
  pub source_date_epoch: i64,
}

impl Default for StyleSettings {
  fn default() -> Self {
    Self {
      make_jobs: std::thread::available_parallelism().map_or(1, |n| n.get()) + 1,
      source_date_epoch: 315532800,
    }
  }
}

/// Everything a phase may touch.
pub struct PhaseContext<'a> {
  /// The recipe with all templates resolved.
  pub recipe: &'a Recipe,
  /// Directory the sources were staged into.
  pub source_dir: &'a Path,
  pub staging: &'a mut dyn StagingTree,
  pub runner: &'a dyn ToolRunner,
  pub settings: &'a StyleSettings,
}

impl PhaseContext<'_> {
  pub fn options(&self) -> &RecipeOptions {
    &self.recipe.options
  }
}

#[async_trait]
pub trait BuildStyle: Send + Sync {
  fn name(&self) -> &str;

  /// Phases this style implements, in execution order.
  fn phases(&self) -> &[Phase];

  async fn run_phase(&self, phase: Phase, ctx: &mut PhaseContext<'_>) -> Result<(), StyleError>;
}

/// Style name to implementation.
#[derive(Clone, Default)]
pub struct StyleRegistry {
  styles: BTreeMap<String, Arc<dyn BuildStyle>>,
}

impl StyleRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry holding `noop`, `configure`, `gnu-configure` and `make`.
  pub fn with_builtin() -> Self {
    let mut registry = Self::new();
    registry.register(Arc::new(NoopStyle));
    registry.register(Arc::new(ConfigureStyle::plain()));
    registry.register(Arc::new(ConfigureStyle::gnu()));
    registry.register(Arc::new(MakeStyle));
    registry
  }

  /// Register a style under its own name, replacing any previous entry.
  pub fn register(&mut self, style: Arc<dyn BuildStyle>) -> Option<Arc<dyn BuildStyle>> {
    self.styles.insert(style.name().to_string(), style)
  }

  pub fn get(&self, name: &str) -> Result<Arc<dyn BuildStyle>, StyleError> {
    self.styles.get(name).cloned().ok_or_else(|| StyleError::UnknownStyle {
      name: name.to_string(),
      known: self.styles.keys().cloned().collect(),
    })
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.styles.keys().map(String::as_str)
  }
}

/// Runs one recipe's phases, each exactly once.
pub struct StyleDriver {
  style: Arc<dyn BuildStyle>,
  timeout: Option<Duration>,
  ran: Vec<Phase>,
}

impl StyleDriver {
  pub fn new(style: Arc<dyn BuildStyle>, timeout: Option<Duration>) -> Self {
    Self {
      style,
      timeout,
      ran: Vec::new(),
    }
  }

  pub fn style_name(&self) -> &str {
    self.style.name()
  }

  /// Phases run so far, in order.
  pub fn ran(&self) -> &[Phase] {
    &self.ran
  }

  /// Run every phase ordered before `install`.
  pub async fn run_until_install(&mut self, ctx: &mut PhaseContext<'_>) -> Result<(), StyleError> {
    let phases: Vec<Phase> = self.style.phases().iter().copied().filter(|p| *p < Phase::Install).collect();
    for phase in phases {
      self.run_once(phase, ctx).await?;
    }
    Ok(())
  }

  /// Run the `install` phase. Styles without one do nothing.
  pub async fn run_install(&mut self, ctx: &mut PhaseContext<'_>) -> Result<(), StyleError> {
    if self.style.phases().contains(&Phase::Install) {
      self.run_once(Phase::Install, ctx).await
    } else {
      debug!(style = self.style.name(), "style has no install phase");
      Ok(())
    }
  }

  /// Run every phase ordered after `install`.
  pub async fn run_after_install(&mut self, ctx: &mut PhaseContext<'_>) -> Result<(), StyleError> {
    let phases: Vec<Phase> = self.style.phases().iter().copied().filter(|p| *p > Phase::Install).collect();
    for phase in phases {
      self.run_once(phase, ctx).await?;
    }
    Ok(())
  }

  async fn run_once(&mut self, phase: Phase, ctx: &mut PhaseContext<'_>) -> Result<(), StyleError> {
    if self.ran.contains(&phase) {
      return Err(StyleError::PhaseRepeated { phase });
    }
    self.ran.push(phase);

    info!(recipe = %ctx.recipe.name, style = self.style.name(), %phase, "running phase");
    let run = self.style.run_phase(phase, ctx);
    match self.timeout {
      Some(limit) => match tokio::time::timeout(limit, run).await {
        Ok(result) => result,
        Err(_) => Err(StyleError::Timeout { phase, timeout: limit }),
      },
      None => run.await,
    }
  }
}

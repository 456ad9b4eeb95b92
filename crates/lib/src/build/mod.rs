//! One recipe, from declaration to emitted packages.
//!
//! The pipeline runs strictly in order inside one task:
//!
//! 1. resolve templates
//! 2. look up the build style
//! 3. fetch and verify every artifact (concurrently)
//! 4. unpack sources into a private work directory
//! 5. run the style phases before `install`
//! 6. replay the install operations against a fresh staging tree
//! 7. run the style phases after `install`
//! 8. partition the staging tree and emit the packages
//!
//! No phase starts before every fetch has verified, and the staging tree is
//! never shared with another recipe.

mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::BuildConfig;
use crate::fetch::extract::{self, ArchiveKind};
use crate::fetch::{ArtifactCache, DefaultTransport, Fetcher, Transport};
use crate::install::run_install_ops;
use crate::package;
use crate::partition::{ClaimPrecedence, partition};
use crate::recipe::Recipe;
use crate::staging::{self, FsStagingTree, MemoryStagingTree, StagingTree};
use crate::style::{PhaseContext, ProcessRunner, StyleDriver, StyleError, StyleRegistry, StyleSettings, ToolRunner};
use crate::template;

pub use types::*;

/// Backing store for staging trees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StagingBackend {
  /// A directory under the recipe's work directory. Required by styles that run host tools.
  #[default]
  Filesystem,
  Memory,
}

/// Resolve templates, then check the package identities they produced.
pub(crate) fn resolve(recipe: &Recipe) -> Result<Recipe, BuildError> {
  let resolved = template::resolve_recipe(recipe)?;
  resolved.check_identity()?;
  Ok(resolved)
}

fn style_stage(err: &StyleError) -> Stage {
  err.phase().map_or(Stage::Style, Stage::Phase)
}

/// Builds single recipes. Cheap to clone; clones share the fetcher and cache.
#[derive(Clone)]
pub struct RecipeBuilder {
  styles: Arc<StyleRegistry>,
  fetcher: Fetcher,
  runner: Arc<dyn ToolRunner>,
  settings: StyleSettings,
  phase_timeout: Option<Duration>,
  claim_precedence: ClaimPrecedence,
  staging: StagingBackend,
  work_dir: PathBuf,
  out_dir: PathBuf,
}

impl RecipeBuilder {
  /// A builder using the built-in styles, real network access, and host tools.
  pub fn new(config: &BuildConfig, out_dir: impl Into<PathBuf>) -> Self {
    let fetcher = Fetcher::new(
      Arc::new(DefaultTransport::new()),
      Arc::new(ArtifactCache::new(&config.cache_dir)),
      config.retry,
      config.fetch_parallelism,
    );
    Self {
      styles: Arc::new(StyleRegistry::with_builtin()),
      fetcher,
      runner: Arc::new(ProcessRunner::new(config.source_date_epoch)),
      settings: config.style_settings(),
      phase_timeout: config.phase_timeout(),
      claim_precedence: config.claim_precedence,
      staging: StagingBackend::default(),
      work_dir: config.work_dir.clone(),
      out_dir: out_dir.into(),
    }
  }

  pub fn with_styles(mut self, styles: StyleRegistry) -> Self {
    self.styles = Arc::new(styles);
    self
  }

  /// Replace the network collaborator, keeping the cache and retry policy.
  pub fn with_transport(mut self, transport: Arc<dyn Transport>, config: &BuildConfig) -> Self {
    self.fetcher = Fetcher::new(
      transport,
      Arc::new(ArtifactCache::new(&config.cache_dir)),
      config.retry,
      config.fetch_parallelism,
    );
    self
  }

  pub fn with_runner(mut self, runner: Arc<dyn ToolRunner>) -> Self {
    self.runner = runner;
    self
  }

  pub fn with_staging(mut self, staging: StagingBackend) -> Self {
    self.staging = staging;
    self
  }

  pub fn styles(&self) -> &StyleRegistry {
    &self.styles
  }

  pub fn out_dir(&self) -> &Path {
    &self.out_dir
  }

  /// Run the full pipeline for `recipe` and emit its packages.
  pub async fn build(&self, recipe: &Recipe) -> Result<BuildOutcome, RecipeError> {
    let started = Instant::now();
    let fail = |stage: Stage| {
      let name = recipe.name.clone();
      move |source: BuildError| RecipeError::new(name, stage, source)
    };

    let resolved = resolve(recipe).map_err(fail(Stage::Resolve))?;
    let style = self
      .styles
      .get(&resolved.style)
      .map_err(|e| fail(Stage::Style)(e.into()))?;
    info!(recipe = %resolved.id(), style = style.name(), "building recipe");

    std::fs::create_dir_all(&self.work_dir)
      .map_err(|e| fail(Stage::Prepare)(BuildError::io(format!("creating {}", self.work_dir.display()), e)))?;
    let work = tempfile::Builder::new()
      .prefix(&format!("{}-{}-r{}-", resolved.name, resolved.version, resolved.revision))
      .tempdir_in(&self.work_dir)
      .map_err(|e| fail(Stage::Prepare)(BuildError::io("creating work directory", e)))?;

    let artifacts = self
      .fetcher
      .fetch_all(&resolved.artifacts)
      .await
      .map_err(|e| fail(Stage::Fetch)(e.into()))?;
    debug!(recipe = %resolved.name, count = artifacts.len(), "artifacts verified");

    let source_dir = unpack_sources(&resolved, &artifacts, work.path())
      .await
      .map_err(fail(Stage::Unpack))?;

    let mut tree: Box<dyn StagingTree> = match self.staging {
      StagingBackend::Filesystem => Box::new(
        FsStagingTree::new_in(work.path())
          .map_err(|e| fail(Stage::Staging)(BuildError::io("creating staging tree", e)))?,
      ),
      StagingBackend::Memory => Box::new(MemoryStagingTree::new()),
    };

    {
      let mut driver = StyleDriver::new(style, self.phase_timeout);
      let mut ctx = PhaseContext {
        recipe: &resolved,
        source_dir: &source_dir,
        staging: &mut *tree,
        runner: self.runner.as_ref(),
        settings: &self.settings,
      };
      if let Err(e) = driver.run_until_install(&mut ctx).await {
        return Err(fail(style_stage(&e))(e.into()));
      }
      run_install_ops(&resolved.install, &mut driver, &mut ctx)
        .await
        .map_err(|e| fail(Stage::Install)(e.into()))?;
      if let Err(e) = driver.run_after_install(&mut ctx).await {
        return Err(fail(style_stage(&e))(e.into()));
      }
      debug!(recipe = %resolved.name, phases = ?driver.ran(), "style finished");
    }

    let leaves = tree
      .leaves()
      .map_err(|e| fail(Stage::Partition)(BuildError::io("listing staging tree", e)))?;
    let split = partition(&leaves, &resolved.sides, self.claim_precedence).map_err(|e| fail(Stage::Partition)(e.into()))?;
    let packages = package::assemble(&resolved, split);

    let dirs = package::emit_all(&packages, &*tree, &self.out_dir, self.settings.source_date_epoch)
      .map_err(|e| fail(Stage::Emit)(e.into()))?;
    let emitted: Vec<EmittedPackage> = packages
      .into_iter()
      .zip(dirs)
      .map(|(package, dir)| EmittedPackage { package, dir })
      .collect();

    info!(
      recipe = %resolved.id(),
      packages = emitted.len(),
      elapsed_ms = started.elapsed().as_millis() as u64,
      "recipe built"
    );
    Ok(BuildOutcome {
      recipe: resolved.name.clone(),
      id: resolved.id(),
      packages: emitted,
    })
  }
}

/// Unpack every artifact into `<work>/src` and return the directory phases run in.
async fn unpack_sources(recipe: &Recipe, artifacts: &[PathBuf], work: &Path) -> Result<PathBuf, BuildError> {
  let sub = recipe.source_dir.as_deref().map(staging::normalize).transpose()?;
  let jobs: Vec<(PathBuf, String)> = artifacts
    .iter()
    .zip(&recipe.artifacts)
    .map(|(path, spec)| (path.clone(), spec.file_name()))
    .collect();
  let src = work.join("src");

  tokio::task::spawn_blocking(move || {
    std::fs::create_dir_all(&src).map_err(|e| BuildError::io("creating source directory", e))?;
    let mut first_archive = None;
    for (artifact, file_name) in &jobs {
      let root =
        extract::unpack(artifact, file_name, &src).map_err(|e| BuildError::io(format!("unpacking {file_name}"), e))?;
      if first_archive.is_none() && ArchiveKind::detect(file_name) != ArchiveKind::Plain {
        first_archive = Some(root);
      }
    }
    Ok::<_, BuildError>(extract::build_dir(&src, sub.as_deref(), first_archive.flatten().as_deref()))
  })
  .await
  .map_err(|e| BuildError::Aborted(e.to_string()))?
}

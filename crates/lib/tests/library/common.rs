//! Shared fixtures for library tests.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use kiln_lib::build::{RecipeBuilder, StagingBackend};
use kiln_lib::config::BuildConfig;
use kiln_lib::execute::{FailureMode, Orchestrator};
use kiln_lib::fetch::MemoryTransport;
use kiln_lib::recipe::{Recipe, parse_document};
use kiln_lib::style::{BuildStyle, Phase, PhaseContext, StyleError, StyleRegistry};

/// A style whose `install` phase writes a fixed list of files.
///
/// Every file's content is its own path. Runs are counted so tests can assert
/// that a style was never reached.
pub struct FileListStyle {
  files: Vec<&'static str>,
  runs: Mutex<Vec<String>>,
}

impl FileListStyle {
  pub fn new(files: &[&'static str]) -> Arc<Self> {
    Arc::new(Self {
      files: files.to_vec(),
      runs: Mutex::new(Vec::new()),
    })
  }

  /// Recipes this style ran a phase for, in order.
  pub fn runs(&self) -> Vec<String> {
    self.runs.lock().unwrap().clone()
  }
}

#[async_trait]
impl BuildStyle for FileListStyle {
  fn name(&self) -> &str {
    "files"
  }

  fn phases(&self) -> &[Phase] {
    &[Phase::Build, Phase::Install]
  }

  async fn run_phase(&self, phase: Phase, ctx: &mut PhaseContext<'_>) -> Result<(), StyleError> {
    self.runs.lock().unwrap().push(format!("{}:{phase}", ctx.recipe.name));
    if phase != Phase::Install {
      return Ok(());
    }
    for file in &self.files {
      ctx
        .staging
        .write_file(Path::new(file), file.as_bytes())
        .map_err(|e| StyleError::failed(phase, e))?;
    }
    Ok(())
  }
}

/// Isolated work, cache and output directories.
pub struct Harness {
  pub temp: TempDir,
  pub config: BuildConfig,
}

impl Harness {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let config = BuildConfig {
      work_dir: temp.path().join("work"),
      cache_dir: temp.path().join("cache"),
      ..BuildConfig::default()
    };
    Self { temp, config }
  }

  pub fn out_dir(&self) -> PathBuf {
    self.temp.path().join("out")
  }

  pub fn builder(&self, style: Arc<FileListStyle>, transport: Arc<MemoryTransport>) -> RecipeBuilder {
    let mut styles = StyleRegistry::with_builtin();
    styles.register(style);
    RecipeBuilder::new(&self.config, self.out_dir())
      .with_styles(styles)
      .with_transport(transport, &self.config)
      .with_staging(StagingBackend::Memory)
  }

  pub fn orchestrator(&self, style: Arc<FileListStyle>, mode: FailureMode) -> Orchestrator {
    Orchestrator::new(self.builder(style, Arc::new(MemoryTransport::new())), mode, 2)
  }
}

pub fn parse(source: &str) -> Vec<Recipe> {
  parse_document(source, "test.kdl").unwrap()
}

pub fn parse_one(source: &str) -> Recipe {
  let mut recipes = parse(source);
  assert_eq!(recipes.len(), 1, "expected exactly one recipe");
  recipes.remove(0)
}

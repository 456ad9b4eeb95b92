//! Running a set of recipes in dependency order.
//!
//! This module provides:
//! - The recipe dependency graph ([`RecipeGraph`])
//! - A scheduler building independent recipes concurrently on a bounded pool
//! - Fail-fast and keep-going failure handling
//!
//! Structural problems (duplicate producers, cycles) are reported before any
//! recipe starts. Template errors are recipe-local and are reported the same
//! way as a failure during the build.

mod dag;
mod types;

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::build::{self, BuildError, RecipeBuilder, RecipeError, Stage};
use crate::recipe::{PackageId, Recipe};
use crate::style::StyleRegistry;

pub use dag::RecipeGraph;
pub use types::*;

/// Resolve templates for graph construction. Recipes that fail keep their raw
/// names so their dependents can still be found.
fn resolve_all(recipes: &[Recipe]) -> (Vec<Recipe>, Vec<Option<RecipeError>>) {
  recipes
    .iter()
    .map(|recipe| match build::resolve(recipe) {
      Ok(resolved) => (resolved, None),
      Err(e) => (recipe.clone(), Some(RecipeError::new(&recipe.name, Stage::Resolve, e))),
    })
    .unzip()
}

#[derive(Debug, Error)]
pub enum CheckError {
  #[error("{} recipe(s) are invalid", .0.len())]
  Recipes(Vec<RecipeError>),

  #[error(transparent)]
  Dag(#[from] DagError),
}

/// Validate a recipe set without building: templates, styles, and the graph.
///
/// Returns the package identities of the main packages in build order.
pub fn check(recipes: &[Recipe], styles: &StyleRegistry) -> Result<Vec<PackageId>, CheckError> {
  let (resolved, errors) = resolve_all(recipes);
  let mut errors: Vec<RecipeError> = errors.into_iter().flatten().collect();
  for recipe in &resolved {
    if let Err(e) = styles.get(&recipe.style) {
      errors.push(RecipeError::new(&recipe.name, Stage::Style, e));
    }
  }
  if !errors.is_empty() {
    return Err(CheckError::Recipes(errors));
  }

  let graph = RecipeGraph::new(&resolved)?;
  Ok(graph.order().into_iter().map(|i| resolved[i].id()).collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
  Pending,
  Running,
  Done,
  Failed,
  Skipped,
  Cancelled,
}

/// Builds recipe sets with a shared [`RecipeBuilder`].
pub struct Orchestrator {
  builder: RecipeBuilder,
  mode: FailureMode,
  parallelism: usize,
}

impl Orchestrator {
  pub fn new(builder: RecipeBuilder, mode: FailureMode, parallelism: usize) -> Self {
    Self {
      builder,
      mode,
      parallelism: parallelism.max(1),
    }
  }

  pub fn builder(&self) -> &RecipeBuilder {
    &self.builder
  }

  /// Build every recipe, dependencies first.
  ///
  /// Returns `Err` only for structural problems, in which case nothing ran.
  /// Recipe failures are reported in the [`RunReport`].
  pub async fn run(&self, recipes: &[Recipe]) -> Result<RunReport, DagError> {
    let (resolved, resolve_errors) = resolve_all(recipes);
    let graph = RecipeGraph::new(&resolved)?;
    info!(recipes = graph.len(), mode = ?self.mode, parallelism = self.parallelism, "starting run");

    let mut run = Run {
      graph: &graph,
      mode: self.mode,
      state: vec![State::Pending; graph.len()],
      report: RunReport::default(),
    };

    for (index, err) in resolve_errors.into_iter().enumerate() {
      if let Some(err) = err {
        error!(recipe = %err.recipe, error = %err, "recipe failed");
        run.fail(index, err);
      }
    }
    if self.mode == FailureMode::FailFast && !run.report.failed.is_empty() {
      run.cancel_rest();
      return Ok(run.finish());
    }

    let mut pending: Vec<usize> = (0..graph.len()).map(|i| graph.dependencies(i).len()).collect();
    let mut ready: BTreeSet<(&str, usize)> = (0..graph.len())
      .filter(|&i| pending[i] == 0 && run.state[i] == State::Pending)
      .map(|i| (graph.name(i), i))
      .collect();

    let semaphore = Arc::new(Semaphore::new(self.parallelism));
    let mut join_set = JoinSet::new();

    loop {
      while let Some((_, index)) = ready.pop_first() {
        if run.state[index] != State::Pending {
          continue;
        }
        run.state[index] = State::Running;
        debug!(recipe = graph.name(index), "scheduling recipe");

        let builder = self.builder.clone();
        let recipe = recipes[index].clone();
        let semaphore = semaphore.clone();
        join_set.spawn(async move {
          let result = match semaphore.acquire_owned().await {
            Ok(_permit) => builder.build(&recipe).await,
            Err(e) => Err(RecipeError::new(
              &recipe.name,
              Stage::Schedule,
              BuildError::Aborted(e.to_string()),
            )),
          };
          (index, result)
        });
      }

      let Some(joined) = join_set.join_next().await else {
        break;
      };
      match joined {
        Ok((index, Ok(outcome))) => {
          run.state[index] = State::Done;
          run.report.built.push(outcome);
          for next in graph.dependents(index) {
            pending[next] -= 1;
            if pending[next] == 0 && run.state[next] == State::Pending {
              ready.insert((graph.name(next), next));
            }
          }
        }
        Ok((index, Err(err))) => {
          error!(recipe = %err.recipe, stage = %err.stage, error = %err.source, "recipe failed");
          run.fail(index, err);
          if self.mode == FailureMode::FailFast {
            join_set.shutdown().await;
            run.cancel_rest();
            return Ok(run.finish());
          }
        }
        Err(e) => {
          // The panicked recipe stays marked running; it is failed once the set drains.
          error!(error = %e, "build task panicked");
          if self.mode == FailureMode::FailFast {
            join_set.shutdown().await;
            run.cancel_rest();
            return Ok(run.finish());
          }
        }
      }
    }

    run.abort_running("build task panicked");
    run.cancel_rest();
    Ok(run.finish())
  }
}

/// Bookkeeping for one [`Orchestrator::run`].
struct Run<'g> {
  graph: &'g RecipeGraph,
  mode: FailureMode,
  state: Vec<State>,
  report: RunReport,
}

impl Run<'_> {
  fn fail(&mut self, index: usize, err: RecipeError) {
    self.state[index] = State::Failed;
    self.report.failed.push(err);
    if self.mode == FailureMode::FailFast {
      return;
    }
    let failed = self.graph.name(index).to_string();
    for dependent in self.graph.transitive_dependents(index) {
      if self.state[dependent] == State::Pending {
        warn!(recipe = self.graph.name(dependent), failed_dependency = %failed, "skipping recipe due to failed dependency");
        self.state[dependent] = State::Skipped;
        self.report.skipped.push(SkippedRecipe {
          recipe: self.graph.name(dependent).to_string(),
          failed_dependency: failed.clone(),
        });
      }
    }
  }

  /// Fail every recipe still marked running. Only reached when a task panicked.
  fn abort_running(&mut self, message: &str) {
    let running: Vec<usize> = (0..self.state.len())
      .filter(|&i| self.state[i] == State::Running)
      .collect();
    for index in running {
      let err = RecipeError::new(
        self.graph.name(index),
        Stage::Schedule,
        BuildError::Aborted(message.to_string()),
      );
      self.fail(index, err);
    }
  }

  fn cancel_rest(&mut self) {
    for index in 0..self.state.len() {
      if matches!(self.state[index], State::Pending | State::Running) {
        self.state[index] = State::Cancelled;
        self.report.cancelled.push(self.graph.name(index).to_string());
      }
    }
  }

  fn finish(mut self) -> RunReport {
    self.report.sort();
    info!(
      built = self.report.built.len(),
      failed = self.report.failed.len(),
      skipped = self.report.skipped.len(),
      cancelled = self.report.cancelled.len(),
      "run complete"
    );
    self.report
  }
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;
  use std::sync::Mutex;
  use std::time::Duration;

  use async_trait::async_trait;
  use tracing_test::traced_test;

  use super::*;
  use crate::build::StagingBackend;
  use crate::config::BuildConfig;
  use crate::fetch::MemoryTransport;
  use crate::recipe::SidePackage;
  use crate::style::{BuildStyle, Phase, PhaseContext, StyleError};
  use crate::util::testutil::RecordingRunner;

  /// Installs `usr/share/<recipe>/marker`; fails for recipes named in `fail`.
  /// Records the order recipes start in and sleeps briefly in `build`.
  struct Marker {
    fail: Vec<&'static str>,
    started: Mutex<Vec<String>>,
  }

  impl Marker {
    fn new(fail: &[&'static str]) -> Arc<Self> {
      Arc::new(Self {
        fail: fail.to_vec(),
        started: Mutex::new(Vec::new()),
      })
    }

    fn started(&self) -> Vec<String> {
      self.started.lock().unwrap().clone()
    }
  }

  #[async_trait]
  impl BuildStyle for Marker {
    fn name(&self) -> &str {
      "marker"
    }

    fn phases(&self) -> &[Phase] {
      &[Phase::Build, Phase::Install]
    }

    async fn run_phase(&self, phase: Phase, ctx: &mut PhaseContext<'_>) -> Result<(), StyleError> {
      let name = ctx.recipe.name.clone();
      match phase {
        Phase::Build => {
          self.started.lock().unwrap().push(name.clone());
          tokio::time::sleep(Duration::from_millis(5)).await;
          if self.fail.contains(&name.as_str()) {
            return Err(StyleError::failed(phase, "marker failure"));
          }
          Ok(())
        }
        _ => ctx
          .staging
          .write_file(&PathBuf::from(format!("usr/share/{name}/marker")), name.as_bytes())
          .map_err(|e| StyleError::failed(phase, e)),
      }
    }
  }

  fn recipe(name: &str, depends: &[&str]) -> Recipe {
    let mut recipe = Recipe::new(name, "1.0");
    recipe.style = "marker".into();
    recipe.depends = depends.iter().map(|d| d.to_string()).collect();
    recipe
  }

  fn orchestrator(temp: &tempfile::TempDir, style: Arc<Marker>, mode: FailureMode, parallelism: usize) -> Orchestrator {
    let config = BuildConfig {
      work_dir: temp.path().join("work"),
      cache_dir: temp.path().join("cache"),
      ..BuildConfig::default()
    };
    let mut styles = StyleRegistry::with_builtin();
    styles.register(style);
    let builder = RecipeBuilder::new(&config, temp.path().join("out"))
      .with_styles(styles)
      .with_transport(Arc::new(MemoryTransport::new()), &config)
      .with_runner(Arc::new(RecordingRunner::default()))
      .with_staging(StagingBackend::Memory);
    Orchestrator::new(builder, mode, parallelism)
  }

  fn built(report: &RunReport) -> Vec<&str> {
    report.built.iter().map(|b| b.recipe.as_str()).collect()
  }

  #[tokio::test]
  async fn builds_in_dependency_order() {
    let temp = tempfile::TempDir::new().unwrap();
    let style = Marker::new(&[]);
    let recipes = vec![
      recipe("gcc", &["binutils"]),
      recipe("binutils", &["zlib"]),
      recipe("zlib", &[]),
    ];
    let report = orchestrator(&temp, style.clone(), FailureMode::FailFast, 4)
      .run(&recipes)
      .await
      .unwrap();

    assert!(report.is_success());
    assert_eq!(built(&report), vec!["binutils", "gcc", "zlib"]);
    assert_eq!(style.started(), vec!["zlib", "binutils", "gcc"]);
    assert!(temp.path().join("out/gcc-1.0-r0/files/usr/share/gcc/marker").exists());
  }

  #[tokio::test]
  async fn keep_going_skips_only_dependents() {
    let temp = tempfile::TempDir::new().unwrap();
    let recipes = vec![
      recipe("zlib", &[]),
      recipe("binutils", &["zlib"]),
      recipe("gcc", &["binutils"]),
      recipe("musl", &[]),
    ];
    let report = orchestrator(&temp, Marker::new(&["zlib"]), FailureMode::KeepGoing, 2)
      .run(&recipes)
      .await
      .unwrap();

    assert!(!report.is_success());
    assert_eq!(built(&report), vec!["musl"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].recipe, "zlib");
    assert_eq!(report.failed[0].stage, Stage::Phase(Phase::Build));
    assert_eq!(
      report.skipped,
      vec![
        SkippedRecipe {
          recipe: "binutils".into(),
          failed_dependency: "zlib".into()
        },
        SkippedRecipe {
          recipe: "gcc".into(),
          failed_dependency: "zlib".into()
        },
      ]
    );
    assert!(report.cancelled.is_empty());
  }

  #[tokio::test]
  async fn fail_fast_cancels_everything_else() {
    let temp = tempfile::TempDir::new().unwrap();
    let style = Marker::new(&["a"]);
    let recipes = vec![recipe("a", &[]), recipe("b", &["a"]), recipe("c", &["b"]), recipe("d", &["c"])];
    let report = orchestrator(&temp, style.clone(), FailureMode::FailFast, 1)
      .run(&recipes)
      .await
      .unwrap();

    assert_eq!(report.failed.len(), 1);
    assert!(report.built.is_empty());
    assert!(report.skipped.is_empty());
    assert_eq!(report.cancelled, vec!["b", "c", "d"]);
    assert_eq!(style.started(), vec!["a"]);
    assert_eq!(report.total(), 4);
  }

  #[tokio::test]
  async fn cycle_is_detected_before_anything_runs() {
    let temp = tempfile::TempDir::new().unwrap();
    let style = Marker::new(&[]);
    let mut a = recipe("a", &[]);
    a.sides.push(SidePackage {
      name: "a-devel".into(),
      description: String::new(),
      depends: vec!["b".into()],
      claims: vec!["usr/include".into()],
    });
    let b = recipe("b", &["a-devel"]);

    let err = orchestrator(&temp, style.clone(), FailureMode::KeepGoing, 2)
      .run(&[a, b])
      .await
      .unwrap_err();
    assert!(matches!(err, DagError::Cycle { .. }));
    assert!(style.started().is_empty());
  }

  #[tokio::test]
  #[traced_test]
  async fn template_failure_is_local_in_keep_going() {
    let temp = tempfile::TempDir::new().unwrap();
    let mut broken = recipe("broken", &[]);
    broken.description = "{{nope}}".into();
    let recipes = vec![broken, recipe("user", &["broken"]), recipe("fine", &[])];

    let report = orchestrator(&temp, Marker::new(&[]), FailureMode::KeepGoing, 2)
      .run(&recipes)
      .await
      .unwrap();
    assert_eq!(built(&report), vec!["fine"]);
    assert_eq!(report.failed[0].stage, Stage::Resolve);
    assert_eq!(report.skipped[0].recipe, "user");
    assert!(logs_contain("skipping recipe due to failed dependency"));
  }

  #[tokio::test]
  async fn template_failure_stops_fail_fast_before_building() {
    let temp = tempfile::TempDir::new().unwrap();
    let style = Marker::new(&[]);
    let mut broken = recipe("broken", &[]);
    broken.version = "{{version}}".into();
    let recipes = vec![broken, recipe("fine", &[])];

    let report = orchestrator(&temp, style.clone(), FailureMode::FailFast, 2)
      .run(&recipes)
      .await
      .unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.cancelled, vec!["fine"]);
    assert!(style.started().is_empty());
  }

  #[tokio::test]
  async fn independent_recipes_share_the_pool() {
    let temp = tempfile::TempDir::new().unwrap();
    let style = Marker::new(&[]);
    let recipes: Vec<Recipe> = (0..6).map(|i| recipe(&format!("r{i}"), &[])).collect();
    let report = orchestrator(&temp, style.clone(), FailureMode::FailFast, 3)
      .run(&recipes)
      .await
      .unwrap();
    assert_eq!(report.built.len(), 6);
    assert_eq!(style.started().len(), 6);
  }

  #[test]
  fn check_returns_build_order() {
    let recipes = vec![recipe("gcc", &["musl"]), recipe("musl", &[])];
    let mut styles = StyleRegistry::with_builtin();
    styles.register(Marker::new(&[]));
    let order = check(&recipes, &styles).unwrap();
    let names: Vec<_> = order.iter().map(ToString::to_string).collect();
    assert_eq!(names, vec!["musl@1.0-0", "gcc@1.0-0"]);
  }

  #[test]
  fn check_reports_unknown_styles() {
    let recipes = vec![recipe("gcc", &[])];
    let err = check(&recipes, &StyleRegistry::with_builtin()).unwrap_err();
    match err {
      CheckError::Recipes(errors) => assert_eq!(errors[0].stage, Stage::Style),
      other => panic!("unexpected error: {other}"),
    }
  }
}

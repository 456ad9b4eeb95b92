//! Implementation of the `kiln build` command.
//!
//! Parses the recipe files, builds every recipe in dependency order, and
//! writes one directory per produced package below the output directory.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Args;
use tracing::debug;

use kiln_lib::build::RecipeBuilder;
use kiln_lib::config::BuildConfig;
use kiln_lib::execute::{FailureMode, Orchestrator};

use super::load_recipes;
use crate::output::{print_json, print_report, report_json};

#[derive(Debug, Args)]
pub struct BuildArgs {
  /// Recipe files
  #[arg(required = true)]
  pub recipes: Vec<PathBuf>,

  /// Directory packages are written to
  #[arg(short, long)]
  pub output: PathBuf,

  /// Keep building unrelated recipes after a failure
  #[arg(long)]
  pub keep_going: bool,

  /// Recipes built at once
  #[arg(short = 'j', long)]
  pub jobs: Option<usize>,

  /// Per-phase time limit, in seconds or as a duration like `90m`
  #[arg(long, value_name = "SECS", value_parser = parse_timeout)]
  pub timeout: Option<Duration>,

  /// TOML configuration file
  #[arg(long)]
  pub config: Option<PathBuf>,

  /// Scratch directory for sources and staging trees
  #[arg(long)]
  pub work_dir: Option<PathBuf>,

  /// Artifact cache directory
  #[arg(long)]
  pub cache_dir: Option<PathBuf>,

  /// Print the run report as JSON
  #[arg(long)]
  pub json: bool,
}

fn parse_timeout(value: &str) -> Result<Duration, String> {
  let timeout = match value.parse::<u64>() {
    Ok(secs) => Duration::from_secs(secs),
    Err(_) => humantime::parse_duration(value).map_err(|e| e.to_string())?,
  };
  if timeout.is_zero() || timeout.subsec_nanos() != 0 {
    return Err(format!("`{value}` is not a whole number of seconds of at least 1s"));
  }
  Ok(timeout)
}

impl BuildArgs {
  /// The config file, if any, with command-line flags applied on top.
  fn config(&self) -> Result<BuildConfig> {
    let mut config = match &self.config {
      Some(path) => BuildConfig::load(path).with_context(|| format!("Failed to load config: {}", path.display()))?,
      None => BuildConfig::default(),
    };
    if self.keep_going {
      config.failure_mode = FailureMode::KeepGoing;
    }
    if let Some(jobs) = self.jobs {
      config.parallelism = jobs;
    }
    if let Some(timeout) = self.timeout {
      config.phase_timeout = Some(timeout.as_secs());
    }
    if let Some(dir) = &self.work_dir {
      config.work_dir = dir.clone();
    }
    if let Some(dir) = &self.cache_dir {
      config.cache_dir = dir.clone();
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
  }
}

/// Returns whether every recipe built.
pub fn cmd_build(args: BuildArgs) -> Result<bool> {
  let config = args.config()?;
  let recipes = load_recipes(&args.recipes)?;

  std::fs::create_dir_all(&args.output)
    .with_context(|| format!("Failed to create output directory: {}", args.output.display()))?;
  let out_dir = dunce::canonicalize(&args.output).unwrap_or_else(|_| args.output.clone());
  debug!(?config, out_dir = %out_dir.display(), "build configuration");

  let orchestrator = Orchestrator::new(
    RecipeBuilder::new(&config, out_dir),
    config.failure_mode,
    config.parallelism,
  );

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let started = Instant::now();
  let report = rt.block_on(orchestrator.run(&recipes)).context("Invalid recipe set")?;

  if args.json {
    print_json(&report_json(&report)?)?;
  } else {
    print_report(&report, started.elapsed());
  }
  Ok(report.is_success())
}

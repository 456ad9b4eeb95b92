//! Run configuration.
//!
//! Loaded from an optional TOML file; every key is optional:
//!
//! ```toml
//! work-dir = "/var/tmp/kiln"
//! cache-dir = "/var/cache/kiln"
//! parallelism = 4
//! fetch-parallelism = 4
//! phase-timeout = 3600
//! failure-mode = "keep-going"
//! claim-precedence = "strict"
//! make-jobs = 9
//! source-date-epoch = 315532800
//!
//! [retry]
//! max-attempts = 3
//! initial-delay-ms = 500
//! multiplier = 2
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::execute::FailureMode;
use crate::partition::ClaimPrecedence;
use crate::style::StyleSettings;

/// Value is 315532800 = January 1, 1980 00:00:00 UTC (ZIP epoch)
pub const DEFAULT_SOURCE_DATE_EPOCH: i64 = 315532800;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("invalid config: {0}")]
  Invalid(String),
}

/// Retry schedule for transient fetch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct RetryPolicy {
  /// Total attempts, including the first.
  pub max_attempts: u32,
  pub initial_delay_ms: u64,
  pub multiplier: u32,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      initial_delay_ms: 500,
      multiplier: 2,
    }
  }
}

impl RetryPolicy {
  /// No retries at all.
  pub fn none() -> Self {
    Self {
      max_attempts: 1,
      ..Self::default()
    }
  }

  /// Delay before attempt `attempt + 1`, where `attempt` counts from 1.
  pub fn delay_after(&self, attempt: u32) -> Duration {
    let factor = u64::from(self.multiplier).saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(self.initial_delay_ms.saturating_mul(factor))
  }
}

fn cpus() -> usize {
  std::thread::available_parallelism().map_or(1, |n| n.get())
}

fn kiln_dir(sub: &str) -> PathBuf {
  dirs::cache_dir()
    .unwrap_or_else(std::env::temp_dir)
    .join("kiln")
    .join(sub)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct BuildConfig {
  /// Per-recipe scratch space: sources and staging trees.
  pub work_dir: PathBuf,
  /// Verified artifacts shared by every recipe.
  pub cache_dir: PathBuf,
  /// Recipes built at once.
  pub parallelism: usize,
  /// Artifact downloads at once within one recipe.
  pub fetch_parallelism: usize,
  /// Per-phase limit, in seconds.
  pub phase_timeout: Option<u64>,
  pub failure_mode: FailureMode,
  pub claim_precedence: ClaimPrecedence,
  pub retry: RetryPolicy,
  pub make_jobs: usize,
  pub source_date_epoch: i64,
}

impl Default for BuildConfig {
  fn default() -> Self {
    Self {
      work_dir: kiln_dir("work"),
      cache_dir: kiln_dir("artifacts"),
      parallelism: cpus(),
      fetch_parallelism: 4,
      phase_timeout: None,
      failure_mode: FailureMode::default(),
      claim_precedence: ClaimPrecedence::default(),
      retry: RetryPolicy::default(),
      make_jobs: cpus() + 1,
      source_date_epoch: DEFAULT_SOURCE_DATE_EPOCH,
    }
  }
}

impl BuildConfig {
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_toml(&text).map_err(|e| match e {
      ConfigError::Parse { source, .. } => ConfigError::Parse {
        path: path.to_path_buf(),
        source,
      },
      other => other,
    })
  }

  pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
    let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
      path: PathBuf::from("<inline>"),
      source,
    })?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.parallelism == 0 {
      return Err(ConfigError::Invalid("parallelism must be at least 1".into()));
    }
    if self.fetch_parallelism == 0 {
      return Err(ConfigError::Invalid("fetch-parallelism must be at least 1".into()));
    }
    if self.retry.max_attempts == 0 {
      return Err(ConfigError::Invalid("retry.max-attempts must be at least 1".into()));
    }
    if self.phase_timeout == Some(0) {
      return Err(ConfigError::Invalid("phase-timeout must be at least 1 second".into()));
    }
    Ok(())
  }

  pub fn phase_timeout(&self) -> Option<Duration> {
    self.phase_timeout.map(Duration::from_secs)
  }

  pub fn style_settings(&self) -> StyleSettings {
    StyleSettings {
      make_jobs: self.make_jobs.max(1),
      source_date_epoch: self.source_date_epoch,
    }
  }
}

//! Built-in styles: `noop`, `configure`, `gnu-configure`, `make`.
//!
//! Recognised options:
//! - `configure-script` (default `./configure`)
//! - `configure-args`, appended after the style's own flags
//! - `make-command` (default `make`)
//! - `make-args`, appended to the build step
//! - `strip` (default true), toggles the post-install strip step

use async_trait::async_trait;
use tracing::debug;

use super::strip::strip_tree;
use super::{BuildStyle, Invocation, Phase, PhaseContext, StyleError};

/// Does nothing in any phase.
pub struct NoopStyle;

#[async_trait]
impl BuildStyle for NoopStyle {
  fn name(&self) -> &str {
    "noop"
  }

  fn phases(&self) -> &[Phase] {
    &[]
  }

  async fn run_phase(&self, _phase: Phase, _ctx: &mut PhaseContext<'_>) -> Result<(), StyleError> {
    Ok(())
  }
}

/// `./configure --prefix=/usr && make && make DESTDIR=<staging> install`.
pub struct ConfigureStyle {
  name: &'static str,
  flags: &'static [&'static str],
}

impl ConfigureStyle {
  pub fn plain() -> Self {
    Self {
      name: "configure",
      flags: &["--prefix=/usr"],
    }
  }

  /// `configure` with the usual GNU directory layout.
  pub fn gnu() -> Self {
    Self {
      name: "gnu-configure",
      flags: &[
        "--prefix=/usr",
        "--sysconfdir=/etc",
        "--localstatedir=/var",
        "--mandir=/usr/share/man",
        "--infodir=/usr/share/info",
      ],
    }
  }
}

#[async_trait]
impl BuildStyle for ConfigureStyle {
  fn name(&self) -> &str {
    self.name
  }

  fn phases(&self) -> &[Phase] {
    &[Phase::Configure, Phase::Build, Phase::Install, Phase::PostInstall]
  }

  async fn run_phase(&self, phase: Phase, ctx: &mut PhaseContext<'_>) -> Result<(), StyleError> {
    match phase {
      Phase::Configure => {
        let script = ctx.options().str("configure-script").unwrap_or("./configure");
        let invocation = Invocation::new(script, ctx.source_dir)
          .args(self.flags.iter().copied())
          .args(ctx.options().list("configure-args"));
        ctx.runner.run(&invocation).await.map_err(|e| StyleError::failed(phase, e))
      }
      Phase::Build => make_build(ctx).await,
      Phase::Install => make_install(self.name, ctx).await,
      Phase::PostInstall => post_install(ctx).await,
      Phase::Prepare => Ok(()),
    }
  }
}

/// Plain makefile projects: no configure step.
pub struct MakeStyle;

#[async_trait]
impl BuildStyle for MakeStyle {
  fn name(&self) -> &str {
    "make"
  }

  fn phases(&self) -> &[Phase] {
    &[Phase::Build, Phase::Install, Phase::PostInstall]
  }

  async fn run_phase(&self, phase: Phase, ctx: &mut PhaseContext<'_>) -> Result<(), StyleError> {
    match phase {
      Phase::Build => make_build(ctx).await,
      Phase::Install => make_install(self.name(), ctx).await,
      Phase::PostInstall => post_install(ctx).await,
      Phase::Prepare | Phase::Configure => Ok(()),
    }
  }
}

fn make_command<'a>(ctx: &'a PhaseContext<'_>) -> &'a str {
  ctx.options().str("make-command").unwrap_or("make")
}

async fn make_build(ctx: &mut PhaseContext<'_>) -> Result<(), StyleError> {
  let invocation = Invocation::new(make_command(ctx), ctx.source_dir)
    .arg(format!("-j{}", ctx.settings.make_jobs))
    .args(ctx.options().list("make-args"));
  ctx
    .runner
    .run(&invocation)
    .await
    .map_err(|e| StyleError::failed(Phase::Build, e))
}

async fn make_install(style: &str, ctx: &mut PhaseContext<'_>) -> Result<(), StyleError> {
  let Some(root) = ctx.staging.host_root() else {
    return Err(StyleError::NoHostTree {
      style: style.to_string(),
    });
  };
  let destdir = root.display().to_string();
  let invocation = Invocation::new(make_command(ctx), ctx.source_dir)
    .arg(format!("DESTDIR={destdir}"))
    .arg("install")
    .env("DESTDIR", destdir);
  ctx
    .runner
    .run(&invocation)
    .await
    .map_err(|e| StyleError::failed(Phase::Install, e))
}

async fn post_install(ctx: &mut PhaseContext<'_>) -> Result<(), StyleError> {
  if !ctx.options().bool("strip").unwrap_or(true) {
    debug!(recipe = %ctx.recipe.name, "strip disabled");
    return Ok(());
  }
  strip_tree(&*ctx.staging, ctx.runner).await
}

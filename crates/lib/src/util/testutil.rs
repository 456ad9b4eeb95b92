//! Test utilities for kiln-lib.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::style::{BuildStyle, Invocation, Phase, PhaseContext, RunError, StyleError, ToolRunner};

/// Returns the shell command and args to execute a shell script.
pub fn shell_cmd(script: &str) -> (&'static str, Vec<String>) {
  ("/bin/sh", vec!["-c".to_string(), script.to_string()])
}

/// A tool runner that records invocations instead of running them.
///
/// Any invocation whose program equals `fail_on` fails with exit status 2.
#[derive(Default)]
pub struct RecordingRunner {
  pub calls: Mutex<Vec<Invocation>>,
  pub fail_on: Option<String>,
}

impl RecordingRunner {
  pub fn failing_on(program: &str) -> Self {
    Self {
      calls: Mutex::new(Vec::new()),
      fail_on: Some(program.to_string()),
    }
  }

  /// Recorded invocations rendered as command lines.
  pub fn commands(&self) -> Vec<String> {
    self.calls.lock().unwrap().iter().map(ToString::to_string).collect()
  }
}

#[async_trait]
impl ToolRunner for RecordingRunner {
  async fn run(&self, invocation: &Invocation) -> Result<(), RunError> {
    self.calls.lock().unwrap().push(invocation.clone());
    if self.fail_on.as_deref() == Some(invocation.program.as_str()) {
      return Err(RunError::Exit {
        command: invocation.to_string(),
        code: Some(2),
        stderr_tail: String::new(),
      });
    }
    Ok(())
  }
}

/// A style with `build` and `install` phases that writes a fixed file list on install.
pub struct ScriptedStyle {
  name: &'static str,
  files: Vec<&'static str>,
  fail_in: Option<Phase>,
  copy_source: Option<&'static str>,
  ran: Mutex<Vec<Phase>>,
}

impl ScriptedStyle {
  pub fn new(name: &'static str, files: &[&'static str]) -> Self {
    Self {
      name,
      files: files.to_vec(),
      fail_in: None,
      copy_source: None,
      ran: Mutex::new(Vec::new()),
    }
  }

  pub fn failing_in(mut self, phase: Phase) -> Self {
    self.fail_in = Some(phase);
    self
  }

  /// Also install `<source_dir>/<file>` as `usr/share/kiln/<file>`.
  pub fn copying_source(mut self, file: &'static str) -> Self {
    self.copy_source = Some(file);
    self
  }

  pub fn ran(&self) -> Vec<Phase> {
    self.ran.lock().unwrap().clone()
  }
}

#[async_trait]
impl BuildStyle for ScriptedStyle {
  fn name(&self) -> &str {
    self.name
  }

  fn phases(&self) -> &[Phase] {
    &[Phase::Build, Phase::Install]
  }

  async fn run_phase(&self, phase: Phase, ctx: &mut PhaseContext<'_>) -> Result<(), StyleError> {
    self.ran.lock().unwrap().push(phase);
    if self.fail_in == Some(phase) {
      return Err(StyleError::failed(phase, "scripted failure"));
    }
    if phase != Phase::Install {
      return Ok(());
    }
    for file in &self.files {
      ctx
        .staging
        .write_file(Path::new(file), file.as_bytes())
        .map_err(|e| StyleError::failed(phase, e))?;
    }
    if let Some(file) = self.copy_source {
      let bytes = std::fs::read(ctx.source_dir.join(file)).map_err(|e| StyleError::failed(phase, e))?;
      ctx
        .staging
        .write_file(&Path::new("usr/share/kiln").join(file), &bytes)
        .map_err(|e| StyleError::failed(phase, e))?;
    }
    Ok(())
  }
}

//! External build-tool invocation.
//!
//! Styles describe what to run as an [`Invocation`]; a [`ToolRunner`] runs it.
//! The process runner gives every tool an isolated environment:
//! - all inherited variables are cleared
//! - `PATH` is the host `PATH` captured when the runner was created
//! - `HOME` is `/homeless-shelter`
//! - `LANG`/`LC_ALL` are `C`
//! - `SOURCE_DATE_EPOCH` is fixed
//! - variables set on the invocation are merged last

use std::collections::{BTreeMap, VecDeque};
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

/// Lines of stderr kept in a failure.
const STDERR_TAIL_LINES: usize = 20;

/// One external tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
  pub program: String,
  pub args: Vec<String>,
  pub cwd: PathBuf,
  pub env: BTreeMap<String, String>,
}

impl Invocation {
  pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      cwd: cwd.into(),
      env: BTreeMap::new(),
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.insert(key.into(), value.into());
    self
  }
}

impl fmt::Display for Invocation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.program)?;
    for arg in &self.args {
      write!(f, " {arg}")?;
    }
    Ok(())
  }
}

#[derive(Debug, Error)]
pub enum RunError {
  #[error("failed to start `{program}`: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  #[error("reading output of `{command}`: {source}")]
  Output {
    command: String,
    #[source]
    source: std::io::Error,
  },

  #[error("`{command}` exited with {}{}", exit_label(.code), tail_label(.stderr_tail))]
  Exit {
    command: String,
    code: Option<i32>,
    stderr_tail: String,
  },
}

fn exit_label(code: &Option<i32>) -> String {
  match code {
    Some(code) => format!("status {code}"),
    None => "a signal".to_string(),
  }
}

fn tail_label(tail: &str) -> String {
  if tail.is_empty() {
    String::new()
  } else {
    format!("\n{tail}")
  }
}

#[async_trait]
pub trait ToolRunner: Send + Sync {
  async fn run(&self, invocation: &Invocation) -> Result<(), RunError>;
}

/// Runs tools as child processes.
///
/// The child is killed if the returned future is dropped, which is how phase
/// timeouts and fail-fast cancellation terminate running tools.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
  path: OsString,
  source_date_epoch: i64,
}

impl ProcessRunner {
  pub fn new(source_date_epoch: i64) -> Self {
    Self {
      path: std::env::var_os("PATH").unwrap_or_else(|| OsString::from("/usr/bin:/bin")),
      source_date_epoch,
    }
  }
}

#[async_trait]
impl ToolRunner for ProcessRunner {
  async fn run(&self, invocation: &Invocation) -> Result<(), RunError> {
    info!(cmd = %invocation, "running tool");

    let mut command = Command::new(&invocation.program);
    command
      .args(&invocation.args)
      .current_dir(&invocation.cwd)
      .env_clear()
      .env("PATH", &self.path)
      .env("HOME", "/homeless-shelter")
      .env("LANG", "C")
      .env("LC_ALL", "C")
      .env("SOURCE_DATE_EPOCH", self.source_date_epoch.to_string())
      .envs(&invocation.env)
      .kill_on_drop(true);

    debug!(cwd = ?invocation.cwd, "spawning process");

    let spawn_err = |source: io::Error| RunError::Spawn {
      program: invocation.program.clone(),
      source,
    };
    let mut child = command
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(spawn_err)?;
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
      return Err(spawn_err(io::Error::other("output pipes were not captured")));
    };

    let (stdout, stderr, status) = tokio::join!(
      drain(stdout, "stdout", 0),
      drain(stderr, "stderr", STDERR_TAIL_LINES),
      child.wait()
    );
    let output_err = |source: io::Error| RunError::Output {
      command: invocation.to_string(),
      source,
    };
    stdout.map_err(output_err)?;
    let tail = stderr.map_err(output_err)?;
    let status = status.map_err(output_err)?;

    if !status.success() {
      return Err(RunError::Exit {
        command: invocation.to_string(),
        code: status.code(),
        stderr_tail: Vec::from(tail).join("\n"),
      });
    }
    Ok(())
  }
}

/// Log `stream` line by line as it arrives, keeping only its last `keep` lines.
async fn drain<R: AsyncRead + Unpin>(stream: R, name: &'static str, keep: usize) -> io::Result<VecDeque<String>> {
  let mut reader = BufReader::new(stream);
  let mut buf = Vec::new();
  let mut tail = VecDeque::with_capacity(keep);
  loop {
    buf.clear();
    if reader.read_until(b'\n', &mut buf).await? == 0 {
      return Ok(tail);
    }
    let text = String::from_utf8_lossy(&buf);
    let line = text.trim_end_matches(['\n', '\r']);
    debug!(stream = name, line, "tool output");
    if keep > 0 {
      if tail.len() == keep {
        tail.pop_front();
      }
      tail.push_back(line.to_string());
    }
  }
}

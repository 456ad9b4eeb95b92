//! Shared test helpers for CLI integration tests.

use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// sha256 of the empty byte string.
pub const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// A well-formed digest no test artifact has.
pub const WRONG_SHA256: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Isolated test environment.
///
/// Each test gets its own temporary directory with isolated work, cache, and output paths.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  /// Write a file relative to the temp directory and return its path.
  pub fn write_file(&self, relative_path: &str, content: &str) -> PathBuf {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
  }

  /// A `file://` URL for an artifact with the given content.
  pub fn artifact(&self, name: &str, content: &str) -> String {
    let path = self.write_file(&format!("artifacts/{name}"), content);
    let path = dunce::canonicalize(&path).unwrap_or(path);
    format!("file://{}", path.display())
  }

  pub fn output_path(&self) -> PathBuf {
    self.temp.path().join("out")
  }

  /// `kiln build` with isolated work and cache directories.
  pub fn build_cmd(&self, recipes: &[PathBuf]) -> Command {
    let mut cmd = kiln_cmd();
    cmd
      .arg("build")
      .args(recipes)
      .arg("-o")
      .arg(self.output_path())
      .arg("--work-dir")
      .arg(self.temp.path().join("work"))
      .arg("--cache-dir")
      .arg(self.temp.path().join("cache"));
    cmd
  }
}

pub fn kiln_cmd() -> Command {
  let mut cmd = cargo_bin_cmd!("kiln");
  cmd.env_remove("RUST_LOG");
  cmd
}

/// A noop-style recipe with one plain artifact, a doc directory, and a `-doc` side package.
pub fn doc_recipe(name: &str, url: &str, digest: &str, depends: &[&str]) -> String {
  let depends: String = depends.iter().map(|d| format!("  depends \"{d}\"\n")).collect();
  format!(
    r#"recipe "{name}" {{
  version "1.0"
  description "the {name} package"
{depends}  artifacts {{
    fetch {{
      url "{url}"
      sha256 "{digest}"
    }}
  }}
  install {{
    dir "usr/share/doc/{{{{name}}}}"
    link "../share/doc" "usr/bin/docs"
  }}
  side "{{{{name}}}}-doc" {{
    depends "{{{{self-ref}}}}"
    claim "usr/share/doc"
  }}
}}
"#
  )
}

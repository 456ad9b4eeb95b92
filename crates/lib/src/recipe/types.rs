use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity of a produced package: `name@version-revision`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageId {
  pub name: String,
  pub version: String,
  pub revision: u32,
}

impl fmt::Display for PackageId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}@{}-{}", self.name, self.version, self.revision)
  }
}

/// A package identity that cannot name its own output directory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
  #[error("{field} `{value}` must be a single path component")]
  NotAComponent { field: &'static str, value: String },

  #[error("recipe `{recipe}` produces more than one package named `{package}`")]
  DuplicatePackage { recipe: String, package: String },
}

/// Names and versions become directory names, so each must be one plain path component.
pub fn check_component(field: &'static str, value: &str) -> Result<(), IdentityError> {
  if value.is_empty() || value == "." || value == ".." || value.contains(['/', '\\', '\0']) {
    return Err(IdentityError::NotAComponent {
      field,
      value: value.to_string(),
    });
  }
  Ok(())
}

/// A parsed recipe. Immutable once parsed; template resolution produces a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
  pub name: String,
  pub version: String,
  pub revision: u32,
  pub style: String,
  pub description: String,
  pub home: Option<String>,
  pub maintainers: Vec<String>,
  pub licenses: Vec<String>,
  /// Dependencies of the main package.
  pub depends: Vec<String>,
  /// Virtual names the main package provides.
  pub provides: Vec<String>,
  /// Subdirectory of the extracted sources the build phases run in.
  pub source_dir: Option<String>,
  pub options: RecipeOptions,
  pub artifacts: Vec<FetchSpec>,
  pub install: Vec<InstallOp>,
  pub sides: Vec<SidePackage>,
}

impl Recipe {
  pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      version: version.into(),
      revision: 0,
      style: "noop".to_string(),
      description: String::new(),
      home: None,
      maintainers: Vec::new(),
      licenses: Vec::new(),
      depends: Vec::new(),
      provides: Vec::new(),
      source_dir: None,
      options: RecipeOptions::default(),
      artifacts: Vec::new(),
      install: vec![InstallOp::RunStyleInstall],
      sides: Vec::new(),
    }
  }

  pub fn id(&self) -> PackageId {
    PackageId {
      name: self.name.clone(),
      version: self.version.clone(),
      revision: self.revision,
    }
  }

  /// Check that the main and side packages each get a distinct, well-formed
  /// identity. Meaningful once templates are resolved.
  pub fn check_identity(&self) -> Result<(), IdentityError> {
    check_component("package name", &self.name)?;
    check_component("version", &self.version)?;
    let mut seen = BTreeSet::from([self.name.as_str()]);
    for side in &self.sides {
      check_component("package name", &side.name)?;
      if !seen.insert(side.name.as_str()) {
        return Err(IdentityError::DuplicatePackage {
          recipe: self.name.clone(),
          package: side.name.clone(),
        });
      }
    }
    Ok(())
  }

  /// Every package name this recipe produces: main, provides, then sides.
  pub fn produced_names(&self) -> impl Iterator<Item = &str> {
    std::iter::once(self.name.as_str())
      .chain(self.provides.iter().map(String::as_str))
      .chain(self.sides.iter().map(|s| s.name.as_str()))
  }

  /// Dependencies of the main package and of every side package.
  pub fn all_depends(&self) -> impl Iterator<Item = &str> {
    self
      .depends
      .iter()
      .chain(self.sides.iter().flat_map(|s| s.depends.iter()))
      .map(String::as_str)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
  Bool(bool),
  Int(i64),
  String(String),
  List(Vec<String>),
}

/// Style options keyed by name. Unknown keys are kept for custom styles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecipeOptions(pub BTreeMap<String, OptionValue>);

impl RecipeOptions {
  pub fn get(&self, key: &str) -> Option<&OptionValue> {
    self.0.get(key)
  }

  pub fn bool(&self, key: &str) -> Option<bool> {
    match self.0.get(key) {
      Some(OptionValue::Bool(b)) => Some(*b),
      _ => None,
    }
  }

  pub fn str(&self, key: &str) -> Option<&str> {
    match self.0.get(key) {
      Some(OptionValue::String(s)) => Some(s),
      _ => None,
    }
  }

  /// A list option. A single string is treated as a one-element list.
  pub fn list(&self, key: &str) -> Vec<String> {
    match self.0.get(key) {
      Some(OptionValue::List(items)) => items.clone(),
      Some(OptionValue::String(s)) => vec![s.clone()],
      _ => Vec::new(),
    }
  }

  pub fn insert(&mut self, key: impl Into<String>, value: OptionValue) {
    self.0.insert(key.into(), value);
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
  Sha256,
  Sha512,
}

impl HashAlgorithm {
  pub fn parse(name: &str) -> Option<Self> {
    match name {
      "sha256" => Some(HashAlgorithm::Sha256),
      "sha512" => Some(HashAlgorithm::Sha512),
      _ => None,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      HashAlgorithm::Sha256 => "sha256",
      HashAlgorithm::Sha512 => "sha512",
    }
  }

  /// Length of the hex-encoded digest.
  pub fn hex_len(self) -> usize {
    match self {
      HashAlgorithm::Sha256 => 64,
      HashAlgorithm::Sha512 => 128,
    }
  }
}

impl fmt::Display for HashAlgorithm {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Declared digest of an artifact. `digest` is lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactHash {
  pub algorithm: HashAlgorithm,
  pub digest: String,
}

impl ArtifactHash {
  pub fn new(algorithm: HashAlgorithm, digest: impl Into<String>) -> Self {
    Self {
      algorithm,
      digest: digest.into().to_ascii_lowercase(),
    }
  }

  /// Process-wide cache key for this digest.
  pub fn cache_key(&self) -> String {
    format!("{}-{}", self.algorithm, self.digest)
  }
}

impl fmt::Display for ArtifactHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.algorithm, self.digest)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchSpec {
  pub url: String,
  pub hash: ArtifactHash,
}

impl FetchSpec {
  /// File name of the artifact, taken from the last URL path segment.
  pub fn file_name(&self) -> String {
    let last = self.url.rsplit('/').next().unwrap_or_default();
    let last = last.split(['?', '#']).next().unwrap_or_default();
    let sanitized: String = last
      .chars()
      .map(|c| {
        if c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '+') {
          c
        } else {
          '_'
        }
      })
      .collect();

    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
      "artifact".to_string()
    } else {
      sanitized
    }
  }
}

/// One step of the install replay log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallOp {
  MakeDir(String),
  Link { target: String, link_path: String },
  Remove(String),
  RunStyleInstall,
}

impl fmt::Display for InstallOp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      InstallOp::MakeDir(path) => write!(f, "dir {path}"),
      InstallOp::Link { target, link_path } => write!(f, "link {target} {link_path}"),
      InstallOp::Remove(path) => write!(f, "rm {path}"),
      InstallOp::RunStyleInstall => f.write_str("make-install"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidePackage {
  pub name: String,
  pub description: String,
  pub depends: Vec<String>,
  /// Ordered glob patterns over staging-tree paths.
  pub claims: Vec<String>,
}

/// A dependency reference: a package name with an optional version part.
///
/// Accepted forms: `musl`, `musl@1.2.3-0`, `musl>=1.2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRef<'a> {
  pub name: &'a str,
  pub constraint: Option<&'a str>,
}

impl<'a> DependencyRef<'a> {
  pub fn parse(reference: &'a str) -> Self {
    let reference = reference.trim();
    match reference.find(['@', '<', '>', '=']) {
      Some(pos) => DependencyRef {
        name: &reference[..pos],
        constraint: Some(&reference[pos..]),
      },
      None => DependencyRef {
        name: reference,
        constraint: None,
      },
    }
  }
}

//! KDL recipe document parsing.
//!
//! A document may hold several `recipe` nodes. Parsing never stops at the
//! first problem: every diagnostic in the document is collected and the whole
//! document is rejected if any were found.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use thiserror::Error;
use tracing::debug;

use super::types::{
  ArtifactHash, FetchSpec, HashAlgorithm, InstallOp, OptionValue, Recipe, RecipeOptions, SidePackage, check_component,
};

/// A single problem found in a recipe document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
  pub line: usize,
  pub column: usize,
  pub message: String,
  pub help: Option<String>,
}

impl fmt::Display for Diagnostic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}: {}", self.line, self.column, self.message)?;
    if let Some(help) = &self.help {
      write!(f, " (help: {help})")?;
    }
    Ok(())
  }
}

#[derive(Debug, Error)]
pub enum ParseError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("{file}: invalid KDL: {message}")]
  Syntax { file: String, message: String },

  #[error("{file}: {} problem(s) in recipe document:{}", .diagnostics.len(), render(.diagnostics))]
  Invalid { file: String, diagnostics: Vec<Diagnostic> },
}

impl ParseError {
  pub fn diagnostics(&self) -> &[Diagnostic] {
    match self {
      ParseError::Invalid { diagnostics, .. } => diagnostics,
      _ => &[],
    }
  }
}

fn render(diagnostics: &[Diagnostic]) -> String {
  diagnostics.iter().map(|d| format!("\n  {d}")).collect()
}

/// Read and parse a recipe file.
pub fn load_file(path: &Path) -> Result<Vec<Recipe>, ParseError> {
  let source = std::fs::read_to_string(path).map_err(|source| ParseError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  parse_document(&source, &path.display().to_string())
}

/// Parse every `recipe` node of a KDL document.
pub fn parse_document(source: &str, file: &str) -> Result<Vec<Recipe>, ParseError> {
  let document: KdlDocument = source.parse().map_err(|e: kdl::KdlError| ParseError::Syntax {
    file: file.to_string(),
    message: e.to_string(),
  })?;

  let mut parser = DocParser {
    source,
    diagnostics: Vec::new(),
  };

  let mut recipes = Vec::new();
  for node in document.nodes() {
    if node.name().value() == "recipe" {
      if let Some(recipe) = parser.recipe(node) {
        recipes.push(recipe);
      }
    } else {
      debug!(node = node.name().value(), file, "ignoring unknown top-level node");
    }
  }

  if parser.diagnostics.is_empty() {
    Ok(recipes)
  } else {
    Err(ParseError::Invalid {
      file: file.to_string(),
      diagnostics: parser.diagnostics,
    })
  }
}

fn children(node: &KdlNode) -> &[KdlNode] {
  node.children().map_or(&[], |doc| doc.nodes())
}

fn arguments(node: &KdlNode) -> impl Iterator<Item = &KdlEntry> {
  node.entries().iter().filter(|e| e.name().is_none())
}

struct DocParser<'s> {
  source: &'s str,
  diagnostics: Vec<Diagnostic>,
}

impl DocParser<'_> {
  fn push(&mut self, offset: usize, message: String, help: Option<String>) {
    let prefix = self.source.get(..offset).unwrap_or(self.source);
    let line = prefix.matches('\n').count() + 1;
    let column = prefix.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
    self.diagnostics.push(Diagnostic {
      line,
      column,
      message,
      help,
    });
  }

  fn error(&mut self, node: &KdlNode, message: impl Into<String>) {
    self.push(node.span().offset(), message.into(), None);
  }

  fn error_help(&mut self, node: &KdlNode, message: impl Into<String>, help: impl Into<String>) {
    self.push(node.span().offset(), message.into(), Some(help.into()));
  }

  fn reject_properties(&mut self, node: &KdlNode) {
    if node.entries().iter().any(|e| e.name().is_some()) {
      self.error(node, format!("`{}` does not accept properties", node.name().value()));
    }
  }

  /// Exactly one string argument.
  fn single_string(&mut self, node: &KdlNode) -> Option<String> {
    self.reject_properties(node);
    let args: Vec<_> = arguments(node).collect();
    match args.as_slice() {
      [entry] => match entry.value().as_string() {
        Some(s) => Some(s.to_string()),
        None => {
          self.error(node, format!("`{}` expects a string", node.name().value()));
          None
        }
      },
      [] => {
        self.error(node, format!("`{}` is missing its value", node.name().value()));
        None
      }
      _ => {
        self.error(node, format!("`{}` expects exactly one value", node.name().value()));
        None
      }
    }
  }

  /// One or more string arguments.
  fn strings(&mut self, node: &KdlNode) -> Vec<String> {
    self.reject_properties(node);
    let mut values = Vec::new();
    for entry in arguments(node) {
      match entry.value().as_string() {
        Some(s) => values.push(s.to_string()),
        None => self.error(node, format!("`{}` expects only string values", node.name().value())),
      }
    }
    if values.is_empty() {
      self.error(node, format!("`{}` expects at least one value", node.name().value()));
    }
    values
  }

  fn set_once<T>(&mut self, node: &KdlNode, slot: &mut Option<T>, value: Option<T>) {
    if slot.is_some() {
      self.error(node, format!("`{}` is defined more than once", node.name().value()));
      return;
    }
    if value.is_some() {
      *slot = value;
    }
  }

  fn recipe(&mut self, node: &KdlNode) -> Option<Recipe> {
    let name = self.single_string(node)?;

    let mut version = None;
    let mut revision = None;
    let mut style = None;
    let mut description = None;
    let mut home = None;
    let mut source_dir = None;
    let mut options = None;
    let mut install = None;
    let mut maintainers = Vec::new();
    let mut licenses = Vec::new();
    let mut depends = Vec::new();
    let mut provides = Vec::new();
    let mut artifacts = Vec::new();
    let mut sides = Vec::new();

    for child in children(node) {
      match child.name().value() {
        "version" => {
          let v = self.single_string(child);
          self.set_once(child, &mut version, v);
        }
        "revision" => {
          let r = self.revision(child);
          self.set_once(child, &mut revision, r);
        }
        "style" => {
          let s = self.single_string(child);
          self.set_once(child, &mut style, s);
        }
        "description" => {
          let d = self.single_string(child);
          self.set_once(child, &mut description, d);
        }
        "home" => {
          let h = self.single_string(child);
          self.set_once(child, &mut home, h);
        }
        "source-dir" => {
          let s = self.single_string(child);
          self.set_once(child, &mut source_dir, s);
        }
        "maintainer" => maintainers.extend(self.strings(child)),
        "license" => licenses.extend(self.strings(child)),
        "depends" => depends.extend(self.strings(child)),
        "provides" => provides.extend(self.strings(child)),
        "options" => {
          let o = Some(self.options(child));
          self.set_once(child, &mut options, o);
        }
        "artifacts" => artifacts.extend(self.artifacts(child)),
        "install" => {
          let ops = Some(self.install(child));
          self.set_once(child, &mut install, ops);
        }
        "side" => {
          if let Some(side) = self.side(child) {
            sides.push(side);
          }
        }
        other => self.error_help(
          child,
          format!("unknown recipe field `{other}`"),
          "expected one of: version, revision, style, description, home, maintainer, license, depends, \
           provides, source-dir, options, artifacts, install, side",
        ),
      }
    }

    let Some(version) = version else {
      self.error(node, format!("recipe `{name}` has no version"));
      return None;
    };
    self.check_identity(node, &name, &version, &sides);

    Some(Recipe {
      name,
      version,
      revision: revision.unwrap_or(0),
      style: style.unwrap_or_else(|| "noop".to_string()),
      description: description.unwrap_or_default(),
      home,
      maintainers,
      licenses,
      depends,
      provides,
      source_dir,
      options: options.unwrap_or_default(),
      artifacts,
      install: install.unwrap_or_else(|| vec![InstallOp::RunStyleInstall]),
      sides,
    })
  }

  /// Identity checks for values that are already literal. Templated values are
  /// checked again once resolved.
  fn check_identity(&mut self, node: &KdlNode, name: &str, version: &str, sides: &[SidePackage]) {
    let literal = |value: &str| !value.contains("{{");
    let fields = [("package name", name), ("version", version)]
      .into_iter()
      .chain(sides.iter().map(|side| ("package name", side.name.as_str())));
    for (field, value) in fields {
      if literal(value)
        && let Err(e) = check_component(field, value)
      {
        self.error(node, e.to_string());
      }
    }

    let mut seen = BTreeSet::from([name]);
    for side in sides.iter().filter(|side| literal(&side.name)) {
      if !seen.insert(side.name.as_str()) {
        self.error_help(
          node,
          format!("recipe `{name}` produces more than one package named `{}`", side.name),
          "give every side package its own name",
        );
      }
    }
  }

  fn revision(&mut self, node: &KdlNode) -> Option<u32> {
    self.reject_properties(node);
    let args: Vec<_> = arguments(node).collect();
    let [entry] = args.as_slice() else {
      self.error(node, "`revision` expects exactly one integer");
      return None;
    };
    match entry.value().as_i64().map(u32::try_from) {
      Some(Ok(r)) => Some(r),
      _ => {
        self.error(node, "`revision` must be a non-negative integer");
        None
      }
    }
  }

  fn options(&mut self, node: &KdlNode) -> RecipeOptions {
    let mut options = RecipeOptions::default();
    for child in children(node) {
      self.reject_properties(child);
      let key = child.name().value().to_string();
      let args: Vec<&KdlValue> = arguments(child).map(|e| e.value()).collect();

      let value = match args.as_slice() {
        [] => Some(OptionValue::Bool(true)),
        [single] => scalar_option(single),
        many => {
          let strings: Option<Vec<String>> = many.iter().map(|v| v.as_string().map(str::to_string)).collect();
          strings.map(OptionValue::List)
        }
      };

      match value {
        Some(value) => {
          if options.get(&key).is_some() {
            self.error(child, format!("option `{key}` is defined more than once"));
          }
          options.insert(key, value);
        }
        None => self.error_help(
          child,
          format!("option `{key}` has an unsupported value"),
          "options take a bool, an integer, a string, or a list of strings",
        ),
      }
    }
    options
  }

  fn artifacts(&mut self, node: &KdlNode) -> Vec<FetchSpec> {
    let mut specs = Vec::new();
    for child in children(node) {
      match child.name().value() {
        "fetch" => {
          if let Some(spec) = self.fetch(child) {
            specs.push(spec);
          }
        }
        other => self.error(child, format!("unknown artifact source `{other}`")),
      }
    }
    specs
  }

  fn fetch(&mut self, node: &KdlNode) -> Option<FetchSpec> {
    let mut url = None;
    let mut hash: Option<ArtifactHash> = None;

    for child in children(node) {
      let field = child.name().value();
      if field == "url" {
        let u = self.single_string(child);
        self.set_once(child, &mut url, u);
      } else if let Some(algorithm) = HashAlgorithm::parse(field) {
        let Some(digest) = self.single_string(child) else {
          continue;
        };
        let digest = digest.to_ascii_lowercase();
        if digest.len() != algorithm.hex_len() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
          self.error_help(
            child,
            format!("{algorithm} digest must be {} hex characters", algorithm.hex_len()),
            "copy the digest printed by sha256sum/sha512sum",
          );
          continue;
        }
        let h = Some(ArtifactHash::new(algorithm, digest));
        self.set_once(child, &mut hash, h);
      } else {
        self.error_help(
          child,
          format!("unknown fetch field `{field}`"),
          "expected `url`, `sha256` or `sha512`",
        );
      }
    }

    match (url, hash) {
      (Some(url), Some(hash)) => Some(FetchSpec { url, hash }),
      (None, _) => {
        self.error(node, "fetch is missing `url`");
        None
      }
      (_, None) => {
        self.error_help(node, "fetch is missing a digest", "add `sha256 \"<hex digest>\"`");
        None
      }
    }
  }

  fn install(&mut self, node: &KdlNode) -> Vec<InstallOp> {
    let mut ops = Vec::new();
    let mut seen_style_install = false;

    for child in children(node) {
      match child.name().value() {
        "dir" => ops.extend(self.strings(child).into_iter().map(InstallOp::MakeDir)),
        "rm" => ops.extend(self.strings(child).into_iter().map(InstallOp::Remove)),
        "link" => {
          let args = self.strings(child);
          match <[String; 2]>::try_from(args) {
            Ok([target, link_path]) => ops.push(InstallOp::Link { target, link_path }),
            Err(_) => self.error_help(
              child,
              "`link` expects exactly two values",
              "link \"<target>\" \"<link-path>\"",
            ),
          }
        }
        "make-install" => {
          if child.entries().iter().next().is_some() {
            self.error(child, "`make-install` takes no arguments");
          }
          if seen_style_install {
            self.error(child, "`make-install` may appear only once");
          }
          seen_style_install = true;
          ops.push(InstallOp::RunStyleInstall);
        }
        other => self.error_help(
          child,
          format!("unknown install operation `{other}`"),
          "expected one of: dir, link, rm, make-install",
        ),
      }
    }
    ops
  }

  fn side(&mut self, node: &KdlNode) -> Option<SidePackage> {
    let name = self.single_string(node)?;
    let mut description = None;
    let mut depends = Vec::new();
    let mut claims = Vec::new();

    for child in children(node) {
      match child.name().value() {
        "description" => {
          let d = self.single_string(child);
          self.set_once(child, &mut description, d);
        }
        "depends" => depends.extend(self.strings(child)),
        "claim" => claims.extend(self.strings(child)),
        other => self.error_help(
          child,
          format!("unknown side package field `{other}`"),
          "expected one of: description, depends, claim",
        ),
      }
    }

    if claims.is_empty() {
      self.error_help(
        node,
        format!("side package `{name}` claims nothing"),
        "add at least one `claim \"<glob>\"`",
      );
    }

    Some(SidePackage {
      name,
      description: description.unwrap_or_default(),
      depends,
      claims,
    })
  }
}

fn scalar_option(value: &KdlValue) -> Option<OptionValue> {
  if let Some(b) = value.as_bool() {
    Some(OptionValue::Bool(b))
  } else if let Some(i) = value.as_i64() {
    Some(OptionValue::Int(i))
  } else {
    value.as_string().map(|s| OptionValue::String(s.to_string()))
  }
}

//! `{{identifier}}` template resolution for recipe string fields.
//!
//! Every recipe gets one immutable [`TemplateContext`] mapping identifiers to
//! fully resolved values. The identifiers available are `name`, `version`,
//! `revision`, `description` and `self-ref` (`name@version-revision`). Context
//! values may themselves contain placeholders; they are resolved recursively
//! with an explicit visiting set so that self-referential definitions fail
//! with [`TemplateError::Cycle`] instead of looping.
//!
//! A single `{` passes through unchanged, and a string with no `{{` is returned
//! as is, which makes resolution idempotent.
//!
//! ```
//! use kiln_lib::template::{parse, Segment};
//!
//! let segments = parse("{{name}}-{{ version }}.tar.gz").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Placeholder("name".to_string()),
//!     Segment::Literal("-".to_string()),
//!     Segment::Placeholder("version".to_string()),
//!     Segment::Literal(".tar.gz".to_string()),
//! ]);
//! ```

use std::collections::BTreeMap;

use thiserror::Error;

use crate::recipe::{FetchSpec, InstallOp, OptionValue, Recipe, SidePackage};

/// A segment of parsed template text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  Literal(String),
  /// Identifier between `{{` and `}}`, surrounding whitespace trimmed.
  Placeholder(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
  #[error("unclosed placeholder at position {position} in {field}")]
  Unclosed { field: String, position: usize },

  #[error("empty placeholder at position {position} in {field}")]
  Empty { field: String, position: usize },

  #[error("unresolved placeholder `{{{{{ident}}}}}` in {field}")]
  Unresolved { ident: String, field: String },

  #[error("template cycle: {}", .chain.join(" -> "))]
  Cycle { chain: Vec<String> },
}

/// Something that can supply values for placeholder identifiers.
pub trait Resolver {
  fn resolve(&self, ident: &str) -> Option<&str>;
}

/// Parse a template string into literal and placeholder segments.
pub fn parse(input: &str) -> Result<Vec<Segment>, TemplateError> {
  parse_field(input, "value")
}

fn parse_field(input: &str, field: &str) -> Result<Vec<Segment>, TemplateError> {
  let mut segments = Vec::new();
  let mut rest = input;
  let mut offset = 0;

  while let Some(open) = rest.find("{{") {
    if open > 0 {
      segments.push(Segment::Literal(rest[..open].to_string()));
    }
    let after_open = &rest[open + 2..];
    let Some(close) = after_open.find("}}") else {
      return Err(TemplateError::Unclosed {
        field: field.to_string(),
        position: offset + open,
      });
    };

    let ident = after_open[..close].trim();
    if ident.is_empty() {
      return Err(TemplateError::Empty {
        field: field.to_string(),
        position: offset + open,
      });
    }
    segments.push(Segment::Placeholder(ident.to_string()));

    let consumed = open + 2 + close + 2;
    offset += consumed;
    rest = &rest[consumed..];
  }

  if !rest.is_empty() {
    segments.push(Segment::Literal(rest.to_string()));
  }
  Ok(segments)
}

/// Substitute every placeholder in `input` using `resolver`.
///
/// `field` names the recipe field being resolved and only appears in errors.
pub fn substitute(input: &str, field: &str, resolver: &impl Resolver) -> Result<String, TemplateError> {
  if !input.contains("{{") {
    return Ok(input.to_string());
  }

  let mut out = String::with_capacity(input.len());
  for segment in parse_field(input, field)? {
    match segment {
      Segment::Literal(text) => out.push_str(&text),
      Segment::Placeholder(ident) => match resolver.resolve(&ident) {
        Some(value) => out.push_str(value),
        None => {
          return Err(TemplateError::Unresolved {
            ident,
            field: field.to_string(),
          });
        }
      },
    }
  }
  Ok(out)
}

/// Resolved identifier values for one recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateContext {
  values: BTreeMap<String, String>,
}

impl Resolver for TemplateContext {
  fn resolve(&self, ident: &str) -> Option<&str> {
    self.values.get(ident).map(String::as_str)
  }
}

impl TemplateContext {
  /// Build the context from a recipe's raw (unresolved) fields.
  pub fn for_recipe(recipe: &Recipe) -> Result<Self, TemplateError> {
    let raw = BTreeMap::from([
      ("name".to_string(), recipe.name.clone()),
      ("version".to_string(), recipe.version.clone()),
      ("revision".to_string(), recipe.revision.to_string()),
      ("description".to_string(), recipe.description.clone()),
      ("self-ref".to_string(), "{{name}}@{{version}}-{{revision}}".to_string()),
    ]);
    Self::from_raw(raw)
  }

  /// Build a context from arbitrary raw definitions, resolving each one.
  pub fn from_raw(raw: BTreeMap<String, String>) -> Result<Self, TemplateError> {
    let mut values = BTreeMap::new();
    let mut visiting = Vec::new();
    for ident in raw.keys() {
      resolve_ident(ident, &raw, &mut values, &mut visiting)?;
    }
    Ok(Self { values })
  }

  pub fn get(&self, ident: &str) -> Option<&str> {
    self.resolve(ident)
  }

  pub fn render(&self, input: &str, field: &str) -> Result<String, TemplateError> {
    substitute(input, field, self)
  }
}

fn resolve_ident(
  ident: &str,
  raw: &BTreeMap<String, String>,
  resolved: &mut BTreeMap<String, String>,
  visiting: &mut Vec<String>,
) -> Result<(), TemplateError> {
  if resolved.contains_key(ident) {
    return Ok(());
  }
  if let Some(start) = visiting.iter().position(|v| v == ident) {
    let mut chain = visiting[start..].to_vec();
    chain.push(ident.to_string());
    return Err(TemplateError::Cycle { chain });
  }

  let template = &raw[ident];
  visiting.push(ident.to_string());

  let mut value = String::with_capacity(template.len());
  for segment in parse_field(template, ident)? {
    match segment {
      Segment::Literal(text) => value.push_str(&text),
      Segment::Placeholder(inner) => {
        if !raw.contains_key(&inner) {
          return Err(TemplateError::Unresolved {
            ident: inner,
            field: ident.to_string(),
          });
        }
        resolve_ident(&inner, raw, resolved, visiting)?;
        value.push_str(&resolved[&inner]);
      }
    }
  }

  visiting.pop();
  resolved.insert(ident.to_string(), value);
  Ok(())
}

/// Resolve every string field of a recipe, returning the resolved copy.
pub fn resolve_recipe(recipe: &Recipe) -> Result<Recipe, TemplateError> {
  let ctx = TemplateContext::for_recipe(recipe)?;
  let render_all = |items: &[String], field: &str| -> Result<Vec<String>, TemplateError> {
    items
      .iter()
      .enumerate()
      .map(|(i, item)| ctx.render(item, &format!("{field}[{i}]")))
      .collect()
  };

  let mut options = recipe.options.clone();
  for (key, value) in options.0.iter_mut() {
    match value {
      OptionValue::String(s) => *s = ctx.render(s, &format!("options.{key}"))?,
      OptionValue::List(items) => *items = render_all(items, &format!("options.{key}"))?,
      OptionValue::Bool(_) | OptionValue::Int(_) => {}
    }
  }

  let artifacts = recipe
    .artifacts
    .iter()
    .enumerate()
    .map(|(i, spec)| {
      Ok(FetchSpec {
        url: ctx.render(&spec.url, &format!("artifacts[{i}].url"))?,
        hash: spec.hash.clone(),
      })
    })
    .collect::<Result<Vec<_>, TemplateError>>()?;

  let install = recipe
    .install
    .iter()
    .enumerate()
    .map(|(i, op)| {
      let field = format!("install[{i}]");
      Ok(match op {
        InstallOp::MakeDir(path) => InstallOp::MakeDir(ctx.render(path, &field)?),
        InstallOp::Link { target, link_path } => InstallOp::Link {
          target: ctx.render(target, &field)?,
          link_path: ctx.render(link_path, &field)?,
        },
        InstallOp::Remove(path) => InstallOp::Remove(ctx.render(path, &field)?),
        InstallOp::RunStyleInstall => InstallOp::RunStyleInstall,
      })
    })
    .collect::<Result<Vec<_>, TemplateError>>()?;

  let sides = recipe
    .sides
    .iter()
    .enumerate()
    .map(|(i, side)| {
      Ok(SidePackage {
        name: ctx.render(&side.name, &format!("side[{i}].name"))?,
        description: ctx.render(&side.description, &format!("side[{i}].description"))?,
        depends: render_all(&side.depends, &format!("side[{i}].depends"))?,
        claims: render_all(&side.claims, &format!("side[{i}].claim"))?,
      })
    })
    .collect::<Result<Vec<_>, TemplateError>>()?;

  Ok(Recipe {
    name: ctx.render(&recipe.name, "name")?,
    version: ctx.render(&recipe.version, "version")?,
    revision: recipe.revision,
    style: ctx.render(&recipe.style, "style")?,
    description: ctx.render(&recipe.description, "description")?,
    home: recipe.home.as_deref().map(|h| ctx.render(h, "home")).transpose()?,
    maintainers: render_all(&recipe.maintainers, "maintainer")?,
    licenses: render_all(&recipe.licenses, "license")?,
    depends: render_all(&recipe.depends, "depends")?,
    provides: render_all(&recipe.provides, "provides")?,
    source_dir: recipe
      .source_dir
      .as_deref()
      .map(|s| ctx.render(s, "source-dir"))
      .transpose()?,
    options,
    artifacts,
    install,
    sides,
  })
}

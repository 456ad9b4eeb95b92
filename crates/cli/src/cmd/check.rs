//! Implementation of the `kiln check` command.
//!
//! Validates recipe files (parsing, templates, styles, dependency graph)
//! without fetching or building anything, and prints the build order.

use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;

use kiln_lib::execute::{CheckError, check};
use kiln_lib::style::StyleRegistry;

use super::load_recipes;
use crate::output::{print_error, print_info, print_json, print_success};

#[derive(Serialize)]
struct CheckOutput {
  order: Vec<String>,
}

/// Returns whether the recipe set is valid.
pub fn cmd_check(paths: &[PathBuf], json: bool) -> Result<bool> {
  let recipes = load_recipes(paths)?;

  match check(&recipes, &StyleRegistry::with_builtin()) {
    Ok(order) => {
      if json {
        print_json(&CheckOutput {
          order: order.iter().map(ToString::to_string).collect(),
        })?;
      } else {
        print_success(&format!("{} recipe(s) are valid", order.len()));
        for (position, id) in order.iter().enumerate() {
          print_info(&format!("{}. {id}", position + 1));
        }
      }
      Ok(true)
    }
    Err(CheckError::Recipes(errors)) => {
      for err in &errors {
        print_error(&err.to_string());
      }
      Ok(false)
    }
    Err(e @ CheckError::Dag(_)) => {
      print_error(&e.to_string());
      Ok(false)
    }
  }
}

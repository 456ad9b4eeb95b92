mod build;
mod check;

use std::path::PathBuf;

use anyhow::{Result, bail};

use kiln_lib::recipe::{Recipe, load_file};

use crate::output::print_error;

pub use build::{BuildArgs, cmd_build};
pub use check::cmd_check;

/// Parse every recipe file, reporting all parse errors before failing.
fn load_recipes(paths: &[PathBuf]) -> Result<Vec<Recipe>> {
  let mut recipes = Vec::new();
  let mut failed = 0;
  for path in paths {
    match load_file(path) {
      Ok(parsed) => recipes.extend(parsed),
      Err(e) => {
        print_error(&e.to_string());
        failed += 1;
      }
    }
  }
  if failed > 0 {
    bail!("{failed} recipe file(s) could not be parsed");
  }
  Ok(recipes)
}

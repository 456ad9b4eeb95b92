mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::{BuildArgs, cmd_build, cmd_check};

/// kiln - build packages from recipes
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build recipes and write their packages
  Build(BuildArgs),

  /// Validate recipes and print the build order
  Check {
    /// Recipe files
    #[arg(required = true)]
    recipes: Vec<PathBuf>,

    /// Print the build order as JSON
    #[arg(long)]
    json: bool,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "kiln=debug" } else { "kiln=info" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let success = match cli.command {
    Commands::Build(args) => cmd_build(args)?,
    Commands::Check { recipes, json } => cmd_check(&recipes, json)?,
  };
  if !success {
    std::process::exit(1);
  }
  Ok(())
}

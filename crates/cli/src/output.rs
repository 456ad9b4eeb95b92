//! CLI output formatting utilities.
//!
//! Status lines go to stdout, errors and warnings to stderr. Colors are only
//! used when the stream supports them.

use std::time::Duration;

use anyhow::Context;
use owo_colors::{OwoColorize, Stream};
use serde_json::{Value, json};

use kiln_lib::execute::RunReport;

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    let mins = secs / 60;
    let remaining_secs = secs % 60;
    format!("{}m {}s", mins, remaining_secs)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

/// Human-readable run report: one line per recipe, then totals.
pub fn print_report(report: &RunReport, elapsed: Duration) {
  for outcome in &report.built {
    let names: Vec<&str> = outcome.packages.iter().map(|p| p.package.id.name.as_str()).collect();
    print_success(&format!("{} {} {}", outcome.id, symbols::ARROW, names.join(", ")));
  }
  for err in &report.failed {
    print_error(&err.to_string());
  }
  for skipped in &report.skipped {
    print_warning(&format!(
      "skipped {}: dependency {} failed",
      skipped.recipe, skipped.failed_dependency
    ));
  }
  for cancelled in &report.cancelled {
    print_warning(&format!("cancelled {cancelled}"));
  }

  println!();
  print_stat("Built", &report.built.len().to_string());
  if !report.failed.is_empty() {
    print_stat("Failed", &report.failed.len().to_string());
  }
  if !report.skipped.is_empty() {
    print_stat("Skipped", &report.skipped.len().to_string());
  }
  if !report.cancelled.is_empty() {
    print_stat("Cancelled", &report.cancelled.len().to_string());
  }
  print_stat("Time", &format_duration(elapsed));
}

/// The run report as a JSON document.
pub fn report_json(report: &RunReport) -> anyhow::Result<Value> {
  let failed: Vec<Value> = report
    .failed
    .iter()
    .map(|err| {
      json!({
        "recipe": err.recipe,
        "stage": err.stage.to_string(),
        "error": err.source.to_string(),
      })
    })
    .collect();

  Ok(json!({
    "success": report.is_success(),
    "built": serde_json::to_value(&report.built).context("Failed to serialize built packages")?,
    "failed": failed,
    "skipped": serde_json::to_value(&report.skipped).context("Failed to serialize skipped recipes")?,
    "cancelled": report.cancelled,
  }))
}

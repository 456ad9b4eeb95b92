//! Multi-recipe runs: ordering, failure modes, and graph validation.

use std::sync::Arc;

use kiln_lib::build::{BuildError, Stage};
use kiln_lib::execute::{CheckError, DagError, FailureMode, Orchestrator, check};
use kiln_lib::fetch::MemoryTransport;
use kiln_lib::recipe::{HashAlgorithm, PackageId, Recipe};
use kiln_lib::style::StyleRegistry;
use kiln_lib::util::hash::hash_bytes;

use super::common::{FileListStyle, Harness, parse};

const TOOLCHAIN: &str = r#"
recipe "gcc" {
  version "13.2.0"
  style "files"
  depends "binutils" "musl-devel"
}
recipe "musl" {
  version "1.2.3"
  style "files"
  side "{{name}}-devel" { claim "usr/include"; }
}
recipe "binutils" {
  version "2.41"
  style "files"
}
"#;

fn names(ids: &[PackageId]) -> Vec<&str> {
  ids.iter().map(|id| id.name.as_str()).collect()
}

#[test]
fn check_orders_producers_before_consumers() {
  let mut styles = StyleRegistry::with_builtin();
  styles.register(FileListStyle::new(&[]));
  let order = check(&parse(TOOLCHAIN), &styles).unwrap();
  assert_eq!(names(&order), vec!["binutils", "musl", "gcc"]);
}

#[test]
fn check_reports_every_unknown_style() {
  let Err(CheckError::Recipes(errors)) = check(&parse(TOOLCHAIN), &StyleRegistry::with_builtin()) else {
    panic!("expected recipe errors");
  };
  assert_eq!(errors.len(), 3);
  assert!(errors.iter().all(|e| e.stage == Stage::Style));
  assert!(errors[0].to_string().contains("unknown build style `files`"));
}

#[tokio::test]
async fn builds_every_recipe_in_dependency_order() {
  let harness = Harness::new();
  let style = FileListStyle::new(&["usr/include/stdio.h", "usr/lib/libc.so"]);
  let orchestrator = Orchestrator::new(
    harness.builder(style.clone(), Arc::new(MemoryTransport::new())),
    FailureMode::FailFast,
    1,
  );

  let report = orchestrator.run(&parse(TOOLCHAIN)).await.unwrap();

  assert!(report.is_success());
  assert_eq!(report.built.len(), 3);
  let installs: Vec<String> = style.runs().into_iter().filter(|r| r.ends_with(":install")).collect();
  assert_eq!(installs, vec!["binutils:install", "musl:install", "gcc:install"]);
}

#[tokio::test]
async fn cycle_is_rejected_before_anything_builds() {
  let harness = Harness::new();
  let style = FileListStyle::new(&[]);
  let recipes = parse(
    r#"
recipe "a" { version "1"; style "files"; depends "b"; }
recipe "b" { version "1"; style "files"; depends "a"; }
recipe "c" { version "1"; style "files"; }
"#,
  );

  let err = harness
    .orchestrator(style.clone(), FailureMode::KeepGoing)
    .run(&recipes)
    .await
    .unwrap_err();

  assert_eq!(
    err,
    DagError::Cycle {
      recipes: vec!["a".into(), "b".into(), "a".into()]
    }
  );
  assert!(style.runs().is_empty());
}

fn broken_toolchain() -> (Vec<Recipe>, MemoryTransport) {
  let url = "https://example.com/binutils.patch";
  let recipes = parse(&format!(
    r#"
recipe "binutils" {{
  version "2.41"
  style "files"
  artifacts {{
    fetch {{
      url "{url}"
      sha256 "{}"
    }}
  }}
}}
recipe "gcc" {{
  version "13.2.0"
  style "files"
  depends "binutils"
}}
recipe "musl" {{
  version "1.2.3"
  style "files"
}}
"#,
    hash_bytes(b"expected", HashAlgorithm::Sha256)
  ));
  (recipes, MemoryTransport::new().with(url, b"corrupted".to_vec()))
}

fn orchestrator(harness: &Harness, transport: MemoryTransport, mode: FailureMode) -> Orchestrator {
  let builder = harness.builder(FileListStyle::new(&["usr/lib/lib.so"]), Arc::new(transport));
  Orchestrator::new(builder, mode, 1)
}

#[tokio::test]
async fn keep_going_skips_only_dependents_of_the_failure() {
  let harness = Harness::new();
  let (recipes, transport) = broken_toolchain();

  let report = orchestrator(&harness, transport, FailureMode::KeepGoing)
    .run(&recipes)
    .await
    .unwrap();

  assert!(!report.is_success());
  assert_eq!(report.failed.len(), 1);
  assert_eq!(report.failed[0].recipe, "binutils");
  assert_eq!(report.failed[0].stage, Stage::Fetch);
  assert_eq!(report.skipped.len(), 1);
  assert_eq!(report.skipped[0].recipe, "gcc");
  assert_eq!(report.skipped[0].failed_dependency, "binutils");
  let built: Vec<&str> = report.built.iter().map(|o| o.recipe.as_str()).collect();
  assert_eq!(built, vec!["musl"]);
  assert!(report.cancelled.is_empty());
}

#[tokio::test]
async fn fail_fast_stops_scheduling_after_the_first_failure() {
  let harness = Harness::new();
  let (recipes, transport) = broken_toolchain();

  let report = orchestrator(&harness, transport, FailureMode::FailFast)
    .run(&recipes)
    .await
    .unwrap();

  assert_eq!(report.failed.len(), 1);
  assert_eq!(report.failed[0].recipe, "binutils");
  assert!(report.skipped.is_empty());
  // binutils sorts first and the pool holds one recipe, so nothing else started.
  assert!(report.built.is_empty());
  assert_eq!(report.cancelled, vec!["gcc", "musl"]);
  assert_eq!(report.total(), 3);
}

#[tokio::test]
async fn unresolvable_template_fails_only_its_recipe() {
  let harness = Harness::new();
  let recipes = parse(
    r#"
recipe "musl" { version "1.2.3"; style "files"; description "{{flavour}}"; }
recipe "zlib" { version "1.3"; style "files"; }
"#,
  );

  let report = harness
    .orchestrator(FileListStyle::new(&[]), FailureMode::KeepGoing)
    .run(&recipes)
    .await
    .unwrap();

  assert_eq!(report.failed.len(), 1);
  assert_eq!(report.failed[0].stage, Stage::Resolve);
  assert!(matches!(report.failed[0].source, BuildError::Template(_)));
  assert_eq!(report.built[0].recipe, "zlib");
}

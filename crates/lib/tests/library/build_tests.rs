//! Single-recipe pipeline: fetch, style, install, partition, emit.

use std::path::PathBuf;
use std::sync::Arc;

use kiln_lib::build::{BuildError, Stage, StagingBackend};
use kiln_lib::fetch::{FetchError, MemoryTransport};
use kiln_lib::package::{MANIFEST_FILE, PAYLOAD_DIR};
use kiln_lib::recipe::HashAlgorithm;
use kiln_lib::util::hash::hash_bytes;

use super::common::{FileListStyle, Harness, parse_one};

const MUSL_FILES: &[&str] = &["usr/lib/libc.so", "usr/lib/libc.a", "usr/include/stdio.h"];

const MUSL: &str = r#"
recipe "musl" {
  version "1.2.3"
  style "files"
  description "the musl c library"
  license "MIT"
  install {
    make-install
    dir "usr/bin"
    link "../lib/libc.so" "usr/bin/ldd"
  }
  side "{{name}}-devel" {
    description "{{description}} (development files)"
    depends "{{self-ref}}"
    claim "usr/include" "usr/lib/*.a"
  }
}
"#;

fn paths(items: &[&str]) -> Vec<PathBuf> {
  items.iter().map(PathBuf::from).collect()
}

#[tokio::test]
async fn musl_splits_into_main_and_devel() {
  let harness = Harness::new();
  let builder = harness.builder(FileListStyle::new(MUSL_FILES), Arc::new(MemoryTransport::new()));

  let outcome = builder.build(&parse_one(MUSL)).await.unwrap();

  assert_eq!(outcome.id.to_string(), "musl@1.2.3-0");
  let owned = outcome.ownership();
  assert_eq!(owned.len(), 2);
  assert_eq!(owned[0].0, "musl");
  assert!(owned[0].1.contains(&PathBuf::from("usr/lib/libc.so")));
  assert!(owned[0].1.contains(&PathBuf::from("usr/bin/ldd")));
  assert_eq!(owned[1].0, "musl-devel");
  assert_eq!(owned[1].1, paths(&["usr/include/stdio.h", "usr/lib/libc.a"]).as_slice());

  let devel = &outcome.packages[1].package;
  assert_eq!(devel.description, "the musl c library (development files)");
  assert_eq!(devel.depends, vec!["musl@1.2.3-0"]);
  assert_eq!(devel.licenses, vec!["MIT"]);
}

#[tokio::test]
async fn packages_are_written_below_the_output_directory() {
  let harness = Harness::new();
  let builder = harness.builder(FileListStyle::new(MUSL_FILES), Arc::new(MemoryTransport::new()));

  let outcome = builder.build(&parse_one(MUSL)).await.unwrap();

  let devel_dir = &outcome.packages[1].dir;
  assert_eq!(devel_dir, &harness.out_dir().join("musl-devel-1.2.3-r0"));
  let header = std::fs::read_to_string(devel_dir.join(PAYLOAD_DIR).join("usr/include/stdio.h")).unwrap();
  assert_eq!(header, "usr/include/stdio.h");
  assert!(!devel_dir.join(PAYLOAD_DIR).join("usr/lib/libc.so").exists());

  let manifest: serde_json::Value =
    serde_json::from_str(&std::fs::read_to_string(devel_dir.join(MANIFEST_FILE)).unwrap()).unwrap();
  assert_eq!(manifest["name"], "musl-devel");
  assert_eq!(manifest["kind"], "side");
  assert_eq!(manifest["origin"], "musl");
}

#[tokio::test]
async fn integrity_failure_stops_before_any_phase() {
  let harness = Harness::new();
  let style = FileListStyle::new(MUSL_FILES);
  let url = "https://example.com/musl-1.2.3.patch";
  let transport = Arc::new(MemoryTransport::new().with(url, b"tampered".to_vec()));
  let recipe = parse_one(&format!(
    r#"
recipe "musl" {{
  version "1.2.3"
  style "files"
  artifacts {{
    fetch {{
      url "{url}"
      sha256 "{}"
    }}
  }}
}}
"#,
    hash_bytes(b"original", HashAlgorithm::Sha256)
  ));

  let err = harness.builder(style.clone(), transport).build(&recipe).await.unwrap_err();

  assert_eq!(err.recipe, "musl");
  assert_eq!(err.stage, Stage::Fetch);
  assert!(matches!(err.source, BuildError::Fetch(FetchError::Integrity { .. })));
  assert!(style.runs().is_empty());
  assert!(!harness.out_dir().join("musl-1.2.3-r0").exists());
}

#[tokio::test]
async fn verified_artifact_is_fetched_once_across_builds() {
  let harness = Harness::new();
  let url = "https://example.com/fix-locale.patch";
  let content = b"--- a/locale.c\n+++ b/locale.c\n";
  let transport = Arc::new(MemoryTransport::new().with(url, content.to_vec()));
  let recipe = parse_one(&format!(
    r#"
recipe "musl" {{
  version "1.2.3"
  style "files"
  artifacts {{
    fetch {{
      url "{url}"
      sha256 "{}"
    }}
  }}
}}
"#,
    hash_bytes(content, HashAlgorithm::Sha256)
  ));
  let builder = harness.builder(FileListStyle::new(&["usr/lib/libc.so"]), transport.clone());

  builder.build(&recipe).await.unwrap();
  builder.build(&recipe).await.unwrap();

  assert_eq!(transport.opens(url), 1);
}

#[tokio::test]
async fn recipe_without_sides_yields_one_package_with_every_file() {
  let harness = Harness::new();
  let builder = harness.builder(FileListStyle::new(MUSL_FILES), Arc::new(MemoryTransport::new()));
  let recipe = parse_one(r#"recipe "musl" { version "1.2.3"; style "files"; }"#);

  let outcome = builder.build(&recipe).await.unwrap();

  let owned = outcome.ownership();
  assert_eq!(owned.len(), 1);
  assert_eq!(owned[0].0, "musl");
  assert_eq!(
    owned[0].1,
    paths(&["usr/include/stdio.h", "usr/lib/libc.a", "usr/lib/libc.so"]).as_slice()
  );
}

#[tokio::test]
async fn repeated_builds_produce_identical_ownership() {
  let first = Harness::new();
  let second = Harness::new();
  let recipe = parse_one(MUSL);

  let a = first
    .builder(FileListStyle::new(MUSL_FILES), Arc::new(MemoryTransport::new()))
    .build(&recipe)
    .await
    .unwrap();
  let b = second
    .builder(FileListStyle::new(MUSL_FILES), Arc::new(MemoryTransport::new()))
    .with_staging(StagingBackend::Filesystem)
    .build(&recipe)
    .await
    .unwrap();

  assert_eq!(a.ownership(), b.ownership());
  for (pa, pb) in a.packages.iter().zip(&b.packages) {
    let ma = std::fs::read(pa.dir.join(MANIFEST_FILE)).unwrap();
    let mb = std::fs::read(pb.dir.join(MANIFEST_FILE)).unwrap();
    assert_eq!(ma, mb);
  }
}

#[tokio::test]
async fn side_without_matches_is_emitted_empty() {
  let harness = Harness::new();
  let builder = harness.builder(FileListStyle::new(&["usr/lib/libc.so"]), Arc::new(MemoryTransport::new()));
  let recipe = parse_one(
    r#"
recipe "musl" {
  version "1.2.3"
  style "files"
  side "musl-devel" { claim "usr/include"; }
}
"#,
  );

  let outcome = builder.build(&recipe).await.unwrap();

  let empty: &[PathBuf] = &[];
  assert_eq!(outcome.ownership()[1], ("musl-devel", empty));
  assert!(outcome.packages[1].dir.join(MANIFEST_FILE).exists());
}

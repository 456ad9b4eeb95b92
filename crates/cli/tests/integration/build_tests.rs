//! End-to-end `kiln build` runs against local `file://` artifacts.

use predicates::prelude::*;

use crate::common::{EMPTY_SHA256, TestEnv, WRONG_SHA256, doc_recipe};

#[test]
fn builds_main_and_side_packages() {
  let env = TestEnv::new();
  let url = env.artifact("hello.patch", "");
  let recipe = env.write_file("hello.kdl", &doc_recipe("hello", &url, EMPTY_SHA256, &[]));

  env
    .build_cmd(&[recipe])
    .assert()
    .success()
    .stdout(predicate::str::contains("hello@1.0-0"))
    .stdout(predicate::str::contains("hello-doc"));

  let out = env.output_path();
  assert!(out.join("hello-1.0-r0/package.json").is_file());
  assert!(out.join("hello-1.0-r0/files/usr/bin/docs").is_symlink());
  assert!(out.join("hello-doc-1.0-r0/files/usr/share/doc/hello").is_dir());
  assert!(!out.join("hello-1.0-r0/files/usr/share").exists());

  let manifest: serde_json::Value =
    serde_json::from_str(&std::fs::read_to_string(out.join("hello-doc-1.0-r0/package.json")).unwrap()).unwrap();
  assert_eq!(manifest["kind"], "side");
  assert_eq!(manifest["depends"][0], "hello@1.0-0");
  assert_eq!(manifest["origin"], "hello");
}

#[test]
fn json_report() {
  let env = TestEnv::new();
  let url = env.artifact("hello.patch", "");
  let recipe = env.write_file("hello.kdl", &doc_recipe("hello", &url, EMPTY_SHA256, &[]));

  let output = env.build_cmd(&[recipe]).arg("--json").output().unwrap();
  assert!(output.status.success());
  let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(report["success"], true);
  assert_eq!(report["built"][0]["recipe"], "hello");
  assert_eq!(report["built"][0]["packages"].as_array().unwrap().len(), 2);
}

#[test]
fn keep_going_builds_unrelated_recipes_but_fails() {
  let env = TestEnv::new();
  let good_url = env.artifact("good.patch", "");
  let bad_url = env.artifact("bad.patch", "tampered");
  let recipes = format!(
    "{}\n{}\n{}",
    doc_recipe("bad", &bad_url, WRONG_SHA256, &[]),
    doc_recipe("needs-bad", &good_url, EMPTY_SHA256, &["bad"]),
    doc_recipe("good", &good_url, EMPTY_SHA256, &[]),
  );
  let recipe = env.write_file("set.kdl", &recipes);

  env
    .build_cmd(&[recipe])
    .arg("--keep-going")
    .assert()
    .failure()
    .code(1)
    .stdout(predicate::str::contains("good@1.0-0"))
    .stderr(predicate::str::contains("recipe bad failed during fetch"))
    .stderr(predicate::str::contains("integrity check failed"))
    .stderr(predicate::str::contains("skipped needs-bad: dependency bad failed"));

  assert!(env.output_path().join("good-1.0-r0").is_dir());
  assert!(!env.output_path().join("needs-bad-1.0-r0").exists());
}

#[test]
fn fail_fast_cancels_dependents() {
  let env = TestEnv::new();
  let good_url = env.artifact("good.patch", "");
  let bad_url = env.artifact("bad.patch", "tampered");
  let recipes = format!(
    "{}\n{}",
    doc_recipe("bad", &bad_url, WRONG_SHA256, &[]),
    doc_recipe("after", &good_url, EMPTY_SHA256, &["bad"]),
  );
  let recipe = env.write_file("set.kdl", &recipes);

  env
    .build_cmd(&[recipe])
    .assert()
    .failure()
    .code(1)
    .stderr(predicate::str::contains("cancelled after"));
}

#[test]
fn unknown_style_fails_the_recipe() {
  let env = TestEnv::new();
  let recipe = env.write_file(
    "cmake.kdl",
    r#"recipe "cmaked" {
  version "1.0"
  style "cmake"
}
"#,
  );

  env
    .build_cmd(&[recipe])
    .assert()
    .failure()
    .stderr(predicate::str::contains("style lookup"))
    .stderr(predicate::str::contains("cmake"));
}

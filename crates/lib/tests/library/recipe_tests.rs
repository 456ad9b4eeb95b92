//! Recipe files from disk through template resolution.

use kiln_lib::recipe::{InstallOp, load_file};
use kiln_lib::template::{TemplateError, resolve_recipe};

use super::common::parse_one;

const ZLIB: &str = r#"
recipe "zlib" {
  version "1.3.1"
  revision 2
  style "configure"
  description "compression library"
  artifacts {
    fetch {
      url "https://zlib.net/{{name}}-{{version}}.tar.gz"
      sha256 "9a93b2b7dfdac77ceba5a558a580e74667dd6fede4585b91eefb60f03b72df23"
    }
  }
  install {
    make-install
    link "lib{{name}}.so.{{version}}" "usr/lib/lib{{name}}.so"
  }
  side "{{name}}-devel" {
    description "{{description}} headers"
    depends "{{self-ref}}"
    claim "usr/include"
  }
}
"#;

#[test]
fn resolution_fills_every_string_field() {
  let resolved = resolve_recipe(&parse_one(ZLIB)).unwrap();

  assert_eq!(resolved.artifacts[0].url, "https://zlib.net/zlib-1.3.1.tar.gz");
  assert_eq!(
    resolved.install[1],
    InstallOp::Link {
      target: "libzlib.so.1.3.1".into(),
      link_path: "usr/lib/libzlib.so".into(),
    }
  );
  assert_eq!(resolved.sides[0].name, "zlib-devel");
  assert_eq!(resolved.sides[0].description, "compression library headers");
  assert_eq!(resolved.sides[0].depends, vec!["zlib@1.3.1-2"]);
}

#[test]
fn resolution_is_idempotent() {
  let once = resolve_recipe(&parse_one(ZLIB)).unwrap();
  let twice = resolve_recipe(&once).unwrap();
  assert_eq!(once, twice);
}

#[test]
fn unknown_placeholder_names_the_field() {
  let recipe = parse_one(r#"recipe "zlib" { version "1.3.1"; home "https://{{host}}/"; }"#);
  let err = resolve_recipe(&recipe).unwrap_err();
  assert_eq!(
    err,
    TemplateError::Unresolved {
      ident: "host".into(),
      field: "home".into(),
    }
  );
}

#[test]
fn load_file_reports_the_file_name() {
  let temp = tempfile::TempDir::new().unwrap();
  let path = temp.path().join("zlib.kdl");
  std::fs::write(&path, "recipe \"zlib\" {\n  style \"configure\"\n}\n").unwrap();

  let err = load_file(&path).unwrap_err();
  let message = err.to_string();
  assert!(message.contains("zlib.kdl"), "{message}");
  assert!(message.contains("has no version"), "{message}");
}

#[test]
fn load_file_reads_several_recipes() {
  let temp = tempfile::TempDir::new().unwrap();
  let path = temp.path().join("set.kdl");
  std::fs::write(&path, format!("{ZLIB}\nrecipe \"pigz\" {{ version \"2.8\"; depends \"zlib\"; }}\n")).unwrap();

  let recipes = load_file(&path).unwrap();
  let names: Vec<&str> = recipes.iter().map(|r| r.name.as_str()).collect();
  assert_eq!(names, vec!["zlib", "pigz"]);
}

//! kiln-lib: recipe-driven package builds
//!
//! A recipe declares where sources come from, how to build them, and how the
//! installed files are split into packages:
//! - `recipe`: the KDL recipe document and its types
//! - `template`: `{{placeholder}}` resolution against recipe fields
//! - `fetch`: verified, cached artifact downloads
//! - `style`: pluggable build styles and the phase driver
//! - `install`: the install operation replay log
//! - `partition` / `package`: splitting the staging tree into packages and writing them
//! - `build`: the per-recipe pipeline
//! - `execute`: dependency-ordered runs over many recipes

pub mod build;
pub mod config;
pub mod execute;
pub mod fetch;
pub mod install;
pub mod package;
pub mod partition;
pub mod recipe;
pub mod staging;
pub mod style;
pub mod template;
pub mod util;

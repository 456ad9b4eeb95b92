//! End-to-end tests for kiln-lib driven through the public API.

mod build_tests;
mod common;
mod orchestrate_tests;
mod recipe_tests;

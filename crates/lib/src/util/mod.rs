//! Shared utilities.
//!
//! Streaming digests and test helpers.

pub mod hash;

#[cfg(test)]
pub mod testutil;

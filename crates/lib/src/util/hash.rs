//! Streaming digests for artifact verification.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256, Sha512};

use crate::recipe::HashAlgorithm;

/// An in-progress digest over a byte stream.
#[derive(Clone)]
pub enum StreamHasher {
  Sha256(Sha256),
  Sha512(Sha512),
}

impl StreamHasher {
  pub fn new(algorithm: HashAlgorithm) -> Self {
    match algorithm {
      HashAlgorithm::Sha256 => StreamHasher::Sha256(Sha256::new()),
      HashAlgorithm::Sha512 => StreamHasher::Sha512(Sha512::new()),
    }
  }

  pub fn update(&mut self, bytes: &[u8]) {
    match self {
      StreamHasher::Sha256(h) => h.update(bytes),
      StreamHasher::Sha512(h) => h.update(bytes),
    }
  }

  /// Lowercase hex digest.
  pub fn finalize_hex(self) -> String {
    match self {
      StreamHasher::Sha256(h) => hex::encode(h.finalize()),
      StreamHasher::Sha512(h) => hex::encode(h.finalize()),
    }
  }
}

/// Digest of a file on disk, read in fixed-size chunks.
pub fn hash_file(path: &Path, algorithm: HashAlgorithm) -> io::Result<String> {
  let mut file = File::open(path)?;
  let mut hasher = StreamHasher::new(algorithm);
  let mut buffer = [0u8; 64 * 1024];
  loop {
    let n = file.read(&mut buffer)?;
    if n == 0 {
      break;
    }
    hasher.update(&buffer[..n]);
  }
  Ok(hasher.finalize_hex())
}

pub fn hash_bytes(bytes: &[u8], algorithm: HashAlgorithm) -> String {
  let mut hasher = StreamHasher::new(algorithm);
  hasher.update(bytes);
  hasher.finalize_hex()
}

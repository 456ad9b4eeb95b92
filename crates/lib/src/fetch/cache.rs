//! Process-wide artifact cache keyed by declared digest.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::FetchError;
use super::transport::Transport;
use crate::config::RetryPolicy;
use crate::recipe::FetchSpec;
use crate::util::hash::{StreamHasher, hash_file};

/// Verified artifacts on disk, named `<algo>-<digest>-<file-name>`.
///
/// Each digest has one slot. Concurrent requests for the same digest wait on
/// the first one and reuse its file, so an artifact is fetched at most once
/// per process. A failed fetch leaves the slot empty for the next caller.
#[derive(Debug)]
pub struct ArtifactCache {
  dir: PathBuf,
  slots: Mutex<HashMap<String, Arc<OnceCell<PathBuf>>>>,
}

impl ArtifactCache {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self {
      dir: dir.into(),
      slots: Mutex::new(HashMap::new()),
    }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn slot(&self, key: &str) -> Arc<OnceCell<PathBuf>> {
    let mut slots = match self.slots.lock() {
      Ok(slots) => slots,
      Err(poisoned) => poisoned.into_inner(),
    };
    slots.entry(key.to_string()).or_default().clone()
  }

  /// Path of a verified copy of `spec`, fetching it through `transport` if needed.
  pub async fn get(
    &self,
    spec: &FetchSpec,
    transport: &dyn Transport,
    retry: &RetryPolicy,
  ) -> Result<PathBuf, FetchError> {
    let slot = self.slot(&spec.hash.cache_key());
    slot
      .get_or_try_init(|| self.materialize(spec, transport, retry))
      .await
      .cloned()
  }

  async fn materialize(
    &self,
    spec: &FetchSpec,
    transport: &dyn Transport,
    retry: &RetryPolicy,
  ) -> Result<PathBuf, FetchError> {
    let io_err = |source| FetchError::Io {
      url: spec.url.clone(),
      source,
    };
    tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
    let dest = self
      .dir
      .join(format!("{}-{}", spec.hash.cache_key(), spec.file_name()));

    if tokio::fs::try_exists(&dest).await.map_err(io_err)? {
      let check = dest.clone();
      let algorithm = spec.hash.algorithm;
      let actual = tokio::task::spawn_blocking(move || hash_file(&check, algorithm))
        .await
        .map_err(|e| io_err(std::io::Error::other(e)))?
        .map_err(io_err)?;
      if actual == spec.hash.digest {
        info!(url = %spec.url, path = %dest.display(), "using cached artifact");
        return Ok(dest);
      }
      warn!(path = %dest.display(), actual = %actual, "cached artifact is corrupt, fetching again");
      tokio::fs::remove_file(&dest).await.map_err(io_err)?;
    }

    let mut attempt = 1;
    loop {
      match self.download(spec, transport, &dest).await {
        Ok(()) => return Ok(dest),
        Err(FetchError::Transport { source, .. }) if source.retryable && attempt < retry.max_attempts => {
          let delay = retry.delay_after(attempt);
          warn!(url = %spec.url, attempt, error = %source, delay_ms = delay.as_millis() as u64, "fetch failed, retrying");
          tokio::time::sleep(delay).await;
          attempt += 1;
        }
        Err(FetchError::Transport { url, source, .. }) => {
          return Err(FetchError::Transport {
            url,
            attempts: attempt,
            source,
          });
        }
        Err(other) => return Err(other),
      }
    }
  }

  /// One download attempt: stream into a temp file, hashing as we go, then
  /// move it into place only if the digest matches.
  async fn download(&self, spec: &FetchSpec, transport: &dyn Transport, dest: &Path) -> Result<(), FetchError> {
    let io_err = |source| FetchError::Io {
      url: spec.url.clone(),
      source,
    };
    let transport_err = |source| FetchError::Transport {
      url: spec.url.clone(),
      attempts: 1,
      source,
    };

    info!(url = %spec.url, "fetching artifact");
    let mut stream = transport.open(&spec.url).await.map_err(transport_err)?;

    let partial = tempfile::Builder::new()
      .prefix(".partial-")
      .tempfile_in(&self.dir)
      .map_err(io_err)?;
    let (std_file, temp_path) = partial.into_parts();
    let mut file = tokio::fs::File::from_std(std_file);

    let mut hasher = StreamHasher::new(spec.hash.algorithm);
    let mut size = 0u64;
    while let Some(chunk) = stream.next_chunk().await.map_err(transport_err)? {
      hasher.update(&chunk);
      file.write_all(&chunk).await.map_err(io_err)?;
      size += chunk.len() as u64;
    }
    file.flush().await.map_err(io_err)?;
    drop(file);

    let actual = hasher.finalize_hex();
    if actual != spec.hash.digest {
      return Err(FetchError::Integrity {
        url: spec.url.clone(),
        expected: spec.hash.to_string(),
        actual: format!("{}:{actual}", spec.hash.algorithm),
      });
    }

    temp_path.persist(dest).map_err(|e| io_err(e.error))?;
    debug!(path = %dest.display(), size, "artifact verified");
    Ok(())
  }
}

//! Artifact fetching and verification.
//!
//! Every artifact is streamed through its declared digest while it is
//! written to disk, and only a matching download is ever handed to a build.
//! Downloads within one recipe run concurrently, bounded by the fetch pool.

mod cache;
pub mod extract;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::config::RetryPolicy;
use crate::recipe::FetchSpec;

pub use cache::ArtifactCache;
pub use transport::{
  ByteStream, DefaultTransport, FileTransport, HttpTransport, MemoryTransport, Transport, TransportError,
};

#[derive(Debug, Error)]
pub enum FetchError {
  #[error("fetching {url} failed after {attempts} attempt(s): {source}")]
  Transport {
    url: String,
    attempts: u32,
    #[source]
    source: TransportError,
  },

  #[error("integrity check failed for {url}: expected {expected}, got {actual}")]
  Integrity {
    url: String,
    expected: String,
    actual: String,
  },

  #[error("storing {url} failed: {source}")]
  Io {
    url: String,
    #[source]
    source: std::io::Error,
  },

  #[error("fetch task for {url} did not complete: {message}")]
  Task { url: String, message: String },
}

impl FetchError {
  pub fn url(&self) -> &str {
    match self {
      FetchError::Transport { url, .. }
      | FetchError::Integrity { url, .. }
      | FetchError::Io { url, .. }
      | FetchError::Task { url, .. } => url,
    }
  }
}

/// Fetches artifacts through a shared cache. Cheap to clone.
#[derive(Clone)]
pub struct Fetcher {
  transport: Arc<dyn Transport>,
  cache: Arc<ArtifactCache>,
  retry: RetryPolicy,
  parallelism: usize,
}

impl Fetcher {
  pub fn new(transport: Arc<dyn Transport>, cache: Arc<ArtifactCache>, retry: RetryPolicy, parallelism: usize) -> Self {
    Self {
      transport,
      cache,
      retry,
      parallelism: parallelism.max(1),
    }
  }

  pub fn cache(&self) -> &ArtifactCache {
    &self.cache
  }

  /// Verified local path of one artifact.
  pub async fn fetch(&self, spec: &FetchSpec) -> Result<PathBuf, FetchError> {
    self.cache.get(spec, self.transport.as_ref(), &self.retry).await
  }

  /// Fetch every spec concurrently. Paths come back in `specs` order.
  ///
  /// The first failure cancels the downloads still in flight.
  pub async fn fetch_all(&self, specs: &[FetchSpec]) -> Result<Vec<PathBuf>, FetchError> {
    let semaphore = Arc::new(Semaphore::new(self.parallelism));
    let mut join_set = JoinSet::new();

    for (index, spec) in specs.iter().enumerate() {
      let fetcher = self.clone();
      let spec = spec.clone();
      let semaphore = semaphore.clone();
      join_set.spawn(async move {
        let _permit = semaphore.acquire_owned().await.map_err(|e| FetchError::Task {
          url: spec.url.clone(),
          message: e.to_string(),
        })?;
        let path = fetcher.fetch(&spec).await?;
        Ok::<_, FetchError>((index, path))
      });
    }

    let mut paths: Vec<Option<PathBuf>> = vec![None; specs.len()];
    while let Some(joined) = join_set.join_next().await {
      let outcome = match joined {
        Ok(outcome) => outcome,
        Err(e) => {
          error!(error = %e, "fetch task panicked");
          Err(FetchError::Task {
            url: String::from("<unknown>"),
            message: e.to_string(),
          })
        }
      };
      match outcome {
        Ok((index, path)) => paths[index] = Some(path),
        Err(e) => {
          debug!(url = %e.url(), "fetch failed, cancelling the rest");
          join_set.abort_all();
          return Err(e);
        }
      }
    }

    Ok(paths.into_iter().flatten().collect())
  }
}

//! Byte-stream transports for artifact URLs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncReadExt;

const FILE_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
  pub message: String,
  /// Whether trying again could plausibly succeed.
  pub retryable: bool,
}

impl TransportError {
  pub fn transient(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      retryable: true,
    }
  }

  pub fn permanent(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      retryable: false,
    }
  }
}

/// An open download, consumed chunk by chunk.
#[async_trait]
pub trait ByteStream: Send {
  /// The next chunk, or `None` at the end of the stream.
  async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}

#[async_trait]
pub trait Transport: Send + Sync {
  async fn open(&self, url: &str) -> Result<Box<dyn ByteStream>, TransportError>;
}

/// HTTP(S) through reqwest.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
  client: reqwest::Client,
}

impl HttpTransport {
  pub fn new() -> Self {
    Self::default()
  }
}

struct HttpStream(reqwest::Response);

#[async_trait]
impl ByteStream for HttpStream {
  async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
    self
      .0
      .chunk()
      .await
      .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
      .map_err(|e| TransportError::transient(e.to_string()))
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn open(&self, url: &str) -> Result<Box<dyn ByteStream>, TransportError> {
    let response = self
      .client
      .get(url)
      .send()
      .await
      .map_err(|e| TransportError::transient(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
      let message = format!("HTTP {status}");
      return Err(if status.is_server_error() || status.as_u16() == 429 {
        TransportError::transient(message)
      } else {
        TransportError::permanent(message)
      });
    }
    Ok(Box::new(HttpStream(response)))
  }
}

/// `file://` URLs, read from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTransport;

struct FileStream(tokio::fs::File);

#[async_trait]
impl ByteStream for FileStream {
  async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
    let mut buffer = vec![0u8; FILE_CHUNK];
    let n = self
      .0
      .read(&mut buffer)
      .await
      .map_err(|e| TransportError::transient(e.to_string()))?;
    if n == 0 {
      return Ok(None);
    }
    buffer.truncate(n);
    Ok(Some(buffer))
  }
}

#[async_trait]
impl Transport for FileTransport {
  async fn open(&self, url: &str) -> Result<Box<dyn ByteStream>, TransportError> {
    let Some(path) = url.strip_prefix("file://") else {
      return Err(TransportError::permanent(format!("not a file:// URL: {url}")));
    };
    let file = tokio::fs::File::open(PathBuf::from(path))
      .await
      .map_err(|e| TransportError::permanent(format!("{path}: {e}")))?;
    Ok(Box::new(FileStream(file)))
  }
}

/// Chooses a transport by URL scheme: `file://`, `http://`, `https://`.
#[derive(Debug, Clone, Default)]
pub struct DefaultTransport {
  http: HttpTransport,
  file: FileTransport,
}

impl DefaultTransport {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl Transport for DefaultTransport {
  async fn open(&self, url: &str) -> Result<Box<dyn ByteStream>, TransportError> {
    if url.starts_with("file://") {
      self.file.open(url).await
    } else if url.starts_with("http://") || url.starts_with("https://") {
      self.http.open(url).await
    } else {
      Err(TransportError::permanent(format!("unsupported URL scheme: {url}")))
    }
  }
}

/// Serves fixed byte strings from memory.
///
/// Counts how often each URL was opened and can fail the first few opens of a
/// URL with a transient error.
#[derive(Debug, Default)]
pub struct MemoryTransport {
  objects: HashMap<String, Vec<u8>>,
  chunk_size: usize,
  opens: Mutex<HashMap<String, usize>>,
  failures: Mutex<HashMap<String, usize>>,
  total_opens: AtomicUsize,
}

impl MemoryTransport {
  pub fn new() -> Self {
    Self {
      chunk_size: 7,
      ..Self::default()
    }
  }

  pub fn with(mut self, url: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
    self.objects.insert(url.into(), bytes.into());
    self
  }

  /// Make the next `count` opens of `url` fail with a transient error.
  pub fn failing(self, url: impl Into<String>, count: usize) -> Self {
    if let Ok(mut failures) = self.failures.lock() {
      failures.insert(url.into(), count);
    }
    self
  }

  /// How many times `url` was opened, failures included.
  pub fn opens(&self, url: &str) -> usize {
    self.opens.lock().map_or(0, |opens| opens.get(url).copied().unwrap_or(0))
  }

  pub fn total_opens(&self) -> usize {
    self.total_opens.load(Ordering::SeqCst)
  }
}

struct MemoryStream {
  remaining: Vec<u8>,
  chunk_size: usize,
}

#[async_trait]
impl ByteStream for MemoryStream {
  async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
    if self.remaining.is_empty() {
      return Ok(None);
    }
    let take = self.chunk_size.max(1).min(self.remaining.len());
    let rest = self.remaining.split_off(take);
    Ok(Some(std::mem::replace(&mut self.remaining, rest)))
  }
}

#[async_trait]
impl Transport for MemoryTransport {
  async fn open(&self, url: &str) -> Result<Box<dyn ByteStream>, TransportError> {
    self.total_opens.fetch_add(1, Ordering::SeqCst);
    if let Ok(mut opens) = self.opens.lock() {
      *opens.entry(url.to_string()).or_default() += 1;
    }

    if let Ok(mut failures) = self.failures.lock() {
      if let Some(left) = failures.get_mut(url).filter(|left| **left > 0) {
        *left -= 1;
        return Err(TransportError::transient(format!("simulated outage for {url}")));
      }
    }

    match self.objects.get(url) {
      Some(bytes) => Ok(Box::new(MemoryStream {
        remaining: bytes.clone(),
        chunk_size: self.chunk_size,
      })),
      None => Err(TransportError::permanent(format!("404 not found: {url}"))),
    }
  }
}

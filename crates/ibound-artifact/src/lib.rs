//! Ibound Artifact
//!
//! This crate provides artifact naming and the artifact storage trait for
//! ibound. Artifacts are the files a run leaves behind: raw engine logs,
//! preserved divergent output files and the persisted search-state databases
//! the engine hands from one bound level to the next.
//!
//! The [`Store`] trait defines the storage backend. Implementations handle the
//! actual storage while [`ArtifactLayout`] decides which key every artifact
//! lives under, so that distinct (target, strategy, bound) tuples never share
//! a path.
//!
//! The trait uses async streaming because search-state databases can be large.

mod fs;
mod layout;

pub use fs::FsStore;
pub use layout::{ArtifactLayout, ArtifactName, DIVERGENT_OUTPUT_NAME, SEARCH_STATE_FILES};

use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

/// A boxed stream of bytes for artifact data.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, Error>> + Send>>;

/// Error type for artifact storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested artifact was not found.
  #[error("artifact not found: {0}")]
  NotFound(String),

  /// The key would escape the store root.
  #[error("invalid artifact key: {0}")]
  InvalidKey(String),

  /// An I/O error occurred.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Artifact storage trait.
#[async_trait]
pub trait Store: Send + Sync {
  /// Retrieve an artifact by key.
  async fn get(&self, key: &str) -> Result<ByteStream, Error>;

  /// Store an artifact, replacing any previous content under the key.
  async fn put(&self, key: &str, data: ByteStream) -> Result<(), Error>;

  /// Delete an artifact by key.
  async fn delete(&self, key: &str) -> Result<(), Error>;

  /// Check whether an artifact exists.
  async fn exists(&self, key: &str) -> Result<bool, Error>;

  /// Upload a local file.
  async fn put_file(&self, key: &str, path: &Path) -> Result<(), Error> {
    let file = File::open(path).await.map_err(|e| {
      if e.kind() == std::io::ErrorKind::NotFound {
        Error::NotFound(path.display().to_string())
      } else {
        Error::Io(e)
      }
    })?;
    let stream = ReaderStream::new(file).map(|r| r.map_err(Error::Io));
    self.put(key, Box::pin(stream)).await
  }

  /// Materialize an artifact as a local file, creating parent directories.
  async fn fetch_to_file(&self, key: &str, dest: &Path) -> Result<(), Error> {
    let mut stream = self.get(key).await?;

    if let Some(parent) = dest.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = File::create(dest).await?;
    while let Some(chunk) = stream.next().await {
      file.write_all(&chunk?).await?;
    }
    file.flush().await?;
    Ok(())
  }
}

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::{ByteStream, Error, Store};

/// Filesystem-based artifact store.
///
/// Stores artifacts as files on the local filesystem. Each artifact is stored
/// at `{base_path}/{key}`. Parent directories are created automatically.
/// Writes go to a sibling temporary file that is renamed into place, so a
/// reader never observes a half-written artifact.
pub struct FsStore {
  base_path: PathBuf,
}

impl FsStore {
  /// Create a new filesystem store with the given base path.
  pub fn new(base_path: impl Into<PathBuf>) -> Self {
    Self {
      base_path: base_path.into(),
    }
  }

  pub fn base_path(&self) -> &Path {
    &self.base_path
  }

  /// Local path of a key.
  pub fn path_of(&self, key: &str) -> Result<PathBuf, Error> {
    let relative = Path::new(key);
    let valid = !key.is_empty()
      && relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !valid {
      return Err(Error::InvalidKey(key.to_string()));
    }
    Ok(self.base_path.join(relative))
  }
}

fn not_found(key: &str) -> impl FnOnce(std::io::Error) -> Error + '_ {
  move |e| {
    if e.kind() == std::io::ErrorKind::NotFound {
      Error::NotFound(key.to_string())
    } else {
      Error::Io(e)
    }
  }
}

#[async_trait]
impl Store for FsStore {
  async fn get(&self, key: &str) -> Result<ByteStream, Error> {
    let path = self.path_of(key)?;
    let file = File::open(&path).await.map_err(not_found(key))?;
    let stream = ReaderStream::new(file).map(|r| r.map_err(Error::Io));
    Ok(Box::pin(stream))
  }

  async fn put(&self, key: &str, data: ByteStream) -> Result<(), Error> {
    let path = self.path_of(key)?;

    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).await?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".partial");
    let tmp_path = PathBuf::from(tmp_name);

    let mut file = File::create(&tmp_path).await?;
    let mut stream = std::pin::pin!(data);

    while let Some(chunk) = stream.next().await {
      let bytes = chunk?;
      file.write_all(&bytes).await?;
    }

    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp_path, &path).await?;
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<(), Error> {
    let path = self.path_of(key)?;
    fs::remove_file(&path).await.map_err(not_found(key))
  }

  async fn exists(&self, key: &str) -> Result<bool, Error> {
    let path = self.path_of(key)?;
    Ok(fs::try_exists(&path).await?)
  }
}

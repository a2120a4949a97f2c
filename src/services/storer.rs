//! Storage backends ("storers").
//!
//! A storer maps slash separated relative paths such as `user/3/avatar.png`
//! onto some backing store and knows how to turn such a path into the public
//! URL served to clients and back. `LocalStorer` keeps payloads on disk below
//! `base_path` and is served by the `/files/{*path}` route.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const MAX_PATH_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum StorerError {
    #[error("`{0}` already exists")]
    AlreadyExists(String),
    #[error("`{0}` not found")]
    NotFound(String),
    #[error("invalid storage path `{0}`")]
    InvalidPath(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorerResult<T> = Result<T, StorerError>;

/// Name and id recorded on every file row, so that rows can be traced back
/// to the backend that holds the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorerInfo {
    pub name: String,
    pub id: String,
}

#[async_trait]
pub trait Storer: Send + Sync {
    fn info(&self) -> StorerInfo;

    /// Store `data` at `path` and return its public URL. With
    /// `overwrite = false` an existing payload yields `AlreadyExists`.
    async fn put(&self, path: &str, data: Bytes, overwrite: bool) -> StorerResult<String>;

    async fn get(&self, path: &str) -> StorerResult<Bytes> {
        let chunks: Vec<Bytes> = self.get_stream(path).await?.try_collect().await?;
        Ok(chunks.concat().into())
    }

    async fn get_stream(&self, path: &str) -> StorerResult<BoxStream<'static, io::Result<Bytes>>>;

    async fn exists(&self, path: &str) -> StorerResult<bool>;

    /// Removing a missing payload is not an error.
    async fn delete(&self, path: &str) -> StorerResult<()>;

    /// Recursively remove a folder. Removing a missing folder is not an error.
    async fn delete_dir(&self, path: &str) -> StorerResult<()>;

    fn public_url(&self, path: &str) -> String;

    /// Inverse of `public_url`. URLs that do not belong to this storer are
    /// returned unchanged.
    fn url_to_path(&self, url: &str) -> String;
}

#[derive(Clone, Debug)]
pub struct LocalStorer {
    base_path: PathBuf,
    base_url: String,
}

impl LocalStorer {
    pub const NAME: &'static str = "local";

    pub fn new(base_path: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Reject anything that could escape `base_path`.
    fn ensure_path_safe(path: &str) -> StorerResult<()> {
        let trimmed = path.trim_end_matches('/');
        let bad = trimmed.is_empty()
            || path.len() > MAX_PATH_LEN
            || path.starts_with('/')
            || trimmed.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
            || path
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
        if bad {
            return Err(StorerError::InvalidPath(path.to_string()));
        }
        Ok(())
    }

    fn full_path(&self, path: &str) -> StorerResult<PathBuf> {
        Self::ensure_path_safe(path)?;
        Ok(self.base_path.join(path.trim_end_matches('/')))
    }

    /// Remove empty directories from `start` upwards, stopping at the root.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl Storer for LocalStorer {
    fn info(&self) -> StorerInfo {
        StorerInfo {
            name: Self::NAME.to_string(),
            id: String::new(),
        }
    }

    /// Writes to a temporary sibling first, fsyncs, then renames into place.
    async fn put(&self, path: &str, data: Bytes, overwrite: bool) -> StorerResult<String> {
        let file_path = self.full_path(path)?;
        if !overwrite && fs::try_exists(&file_path).await? {
            return Err(StorerError::AlreadyExists(path.to_string()));
        }
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorerError::Io(io::Error::new(
                ErrorKind::Other,
                "storage path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let write = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(&data).await?;
            file.flush().await?;
            file.sync_all().await
        };
        if let Err(err) = write.await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorerError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorerError::Io(err));
            }
        }

        debug!(path, size_bytes = data.len(), "stored payload");
        Ok(self.public_url(path))
    }

    async fn get_stream(&self, path: &str) -> StorerResult<BoxStream<'static, io::Result<Bytes>>> {
        let file_path = self.full_path(path)?;
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorerError::NotFound(path.to_string())
            } else {
                StorerError::Io(err)
            }
        })?;
        Ok(ReaderStream::new(file).boxed())
    }

    async fn exists(&self, path: &str) -> StorerResult<bool> {
        let file_path = self.full_path(path)?;
        Ok(fs::try_exists(&file_path).await?)
    }

    async fn delete(&self, path: &str) -> StorerResult<()> {
        let file_path = self.full_path(path)?;
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("{} already missing", file_path.display());
            }
            Err(err) => return Err(StorerError::Io(err)),
        }
        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    async fn delete_dir(&self, path: &str) -> StorerResult<()> {
        let dir_path = self.full_path(path)?;
        match fs::remove_dir_all(&dir_path).await {
            Ok(_) => {
                debug!("removed directory {}", dir_path.display());
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorerError::Io(err)),
        }
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn url_to_path(&self, url: &str) -> String {
        url.strip_prefix(&self.base_url)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(url)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storer(dir: &tempfile::TempDir) -> LocalStorer {
        LocalStorer::new(dir.path(), "/files/")
    }

    #[tokio::test]
    async fn put_get_and_url_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let storer = storer(&dir);

        let url = storer
            .put("user/0/a.txt", Bytes::from_static(b"hello"), false)
            .await
            .unwrap();
        assert_eq!(url, "/files/user/0/a.txt");
        assert_eq!(storer.url_to_path(&url), "user/0/a.txt");
        assert_eq!(storer.url_to_path("https://cdn/x.png"), "https://cdn/x.png");
        assert_eq!(storer.get("user/0/a.txt").await.unwrap(), Bytes::from_static(b"hello"));
        assert!(storer.exists("user/0/a.txt").await.unwrap());
    }

    #[tokio::test]
    async fn put_without_overwrite_reports_existing() {
        let dir = tempfile::tempdir().unwrap();
        let storer = storer(&dir);
        storer
            .put("user/1/avatar.png", Bytes::from_static(b"one"), false)
            .await
            .unwrap();

        let err = storer
            .put("user/1/avatar.png", Bytes::from_static(b"two"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, StorerError::AlreadyExists(_)));

        storer
            .put("user/1/avatar.png", Bytes::from_static(b"two"), true)
            .await
            .unwrap();
        assert_eq!(storer.get("user/1/avatar.png").await.unwrap(), Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let storer = storer(&dir);
        for bad in ["", "/etc/passwd", "../x", "a/../../x", "a//b", "a\\b"] {
            let err = storer.put(bad, Bytes::new(), true).await.unwrap_err();
            assert!(matches!(err, StorerError::InvalidPath(_)), "{bad}");
        }
    }

    #[tokio::test]
    async fn delete_and_delete_dir_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storer = storer(&dir);
        storer
            .put("config/0/x.png", Bytes::from_static(b"x"), false)
            .await
            .unwrap();
        storer.delete("config/0/x.png").await.unwrap();
        storer.delete("config/0/x.png").await.unwrap();
        assert!(!dir.path().join("config").exists());

        storer
            .put("user/0/y.png", Bytes::from_static(b"y"), false)
            .await
            .unwrap();
        storer.delete_dir("user/0/").await.unwrap();
        storer.delete_dir("user/0/").await.unwrap();
        assert!(!dir.path().join("user/0").exists());
        assert!(matches!(
            storer.get("user/0/y.png").await.unwrap_err(),
            StorerError::NotFound(_)
        ));
    }
}

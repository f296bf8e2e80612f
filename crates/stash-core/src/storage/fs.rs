//! Local filesystem byte storage.

use super::{ByteStorage, StorageError, StorageResult, key_components};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument};

/// Stores each file at `<root>/<path>`.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Create a backend rooted at `root`. The folder is created on first upload.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full on-disk location for a storage key.
    pub fn resolve(&self, path: &str) -> StorageResult<PathBuf> {
        let mut full = self.root.clone();
        for part in key_components(path)? {
            full.push(part);
        }
        Ok(full)
    }

    fn map_not_found(path: &str, e: std::io::Error) -> StorageError {
        if e.kind() == ErrorKind::NotFound {
            StorageError::NotFound(path.to_string())
        } else {
            StorageError::Io(e)
        }
    }

    /// Remove empty directories from `dir` upwards, stopping below the root.
    async fn prune_empty_parents(&self, mut dir: &Path) {
        while dir != self.root.as_path() && dir.starts_with(&self.root) {
            // Fails on non-empty directories, which ends the walk.
            if fs::remove_dir(dir).await.is_err() {
                break;
            }
            debug!(dir = %dir.display(), "Removed empty directory");
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
    }
}

#[async_trait]
impl ByteStorage for FsStorage {
    #[instrument(skip(self, reader), fields(backend = "filesystem"))]
    async fn put(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> StorageResult<u64> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(&full).await?;
        let written = tokio::io::copy(reader, &mut file).await?;
        file.flush().await?;
        debug!(bytes = written, "Stored file");
        Ok(written)
    }

    #[instrument(skip(self, writer), fields(backend = "filesystem"))]
    async fn get(
        &self,
        path: &str,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> StorageResult<u64> {
        let full = self.resolve(path)?;
        let mut file = fs::File::open(&full)
            .await
            .map_err(|e| Self::map_not_found(path, e))?;
        let copied = tokio::io::copy(&mut file, writer).await?;
        writer.flush().await?;
        Ok(copied)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, path: &str) -> StorageResult<()> {
        let full = self.resolve(path)?;
        fs::remove_file(&full)
            .await
            .map_err(|e| Self::map_not_found(path, e))?;
        if let Some(parent) = full.parent() {
            self.prune_empty_parents(parent).await;
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn put_str(storage: &FsStorage, path: &str, data: &str) -> u64 {
        storage.put(path, &mut data.as_bytes()).await.unwrap()
    }

    #[tokio::test]
    async fn test_put_get() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path().join("root"));

        assert_eq!(put_str(&storage, "a/b/c.txt", "hello").await, 5);

        let mut out = Vec::new();
        let copied = storage.get("a/b/c.txt", &mut out).await.unwrap();
        assert_eq!(copied, 5);
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn test_put_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());

        put_str(&storage, "f.txt", "a much longer body").await;
        put_str(&storage, "f.txt", "short").await;

        let on_disk = std::fs::read(dir.path().join("f.txt")).unwrap();
        assert_eq!(on_disk, b"short");
    }

    #[tokio::test]
    async fn test_get_missing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let mut out = Vec::new();
        assert!(matches!(
            storage.get("nope.txt", &mut out).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_prunes_empty_parents() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        let storage = FsStorage::new(&root);

        put_str(&storage, "a/b/c.txt", "x").await;
        put_str(&storage, "a/keep.txt", "y").await;

        storage.delete("a/b/c.txt").await.unwrap();

        assert!(!root.join("a/b").exists());
        assert!(root.join("a/keep.txt").exists());

        storage.delete("a/keep.txt").await.unwrap();
        assert!(!root.join("a").exists());
        assert!(root.exists(), "Root folder itself is never pruned");
    }

    #[tokio::test]
    async fn test_delete_missing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        assert!(matches!(
            storage.delete("ghost.txt").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path().join("root"));
        let result = storage.put("../escape.txt", &mut &b"x"[..]).await;
        assert!(matches!(result, Err(StorageError::InvalidPath(_))));
        assert!(!dir.path().join("escape.txt").exists());
    }
}

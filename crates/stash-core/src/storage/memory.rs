//! In-memory byte storage.

use super::{ByteStorage, StorageError, StorageResult, key_components};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Keeps file bytes in a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: DashMap<String, Vec<u8>>,
    fail_deletes: AtomicBool,
    deletes: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Make subsequent deletes fail with an I/O error.
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Number of delete calls that removed bytes.
    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ByteStorage for MemoryStorage {
    async fn put(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> StorageResult<u64> {
        key_components(path)?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        let len = data.len() as u64;
        self.objects.insert(path.to_string(), data);
        Ok(len)
    }

    async fn get(
        &self,
        path: &str,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> StorageResult<u64> {
        // Copy out before awaiting so no map shard is held across the write.
        let data = self
            .objects
            .get(path)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        writer.write_all(&data).await?;
        writer.flush().await?;
        Ok(data.len() as u64)
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other(
                "deletes disabled",
            )));
        }
        self.objects
            .remove(path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.put("a/b.txt", &mut &b"abc"[..]).await.unwrap(), 3);
        assert!(storage.contains("a/b.txt"));

        let mut out = Vec::new();
        assert_eq!(storage.get("a/b.txt", &mut out).await.unwrap(), 3);
        assert_eq!(out, b"abc");

        storage.delete("a/b.txt").await.unwrap();
        assert!(storage.is_empty());
        assert_eq!(storage.delete_count(), 1);
        assert!(matches!(
            storage.delete("a/b.txt").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failing_deletes_keep_bytes() {
        let storage = MemoryStorage::new();
        storage.put("x", &mut &b"1"[..]).await.unwrap();
        storage.set_fail_deletes(true);
        assert!(matches!(storage.delete("x").await, Err(StorageError::Io(_))));
        assert!(storage.contains("x"));
    }
}

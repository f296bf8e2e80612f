//! Physical byte storage for uploaded files.
//!
//! The record store never touches bytes itself; it only asks a [`ByteStorage`]
//! to delete them once a file record has been fully released. Two backends are
//! provided: [`FsStorage`] under a root folder, and [`MemoryStorage`].

mod fs;
mod memory;

pub use fs::FsStorage;
pub use memory::MemoryStorage;

use async_trait::async_trait;
use relative_path::{Component, RelativePath};
use std::fmt;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Byte storage keyed by file path.
#[async_trait]
pub trait ByteStorage: Send + Sync + fmt::Debug {
    /// Store everything `reader` yields at `path`, replacing existing bytes.
    async fn put(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> StorageResult<u64>;

    /// Copy the bytes at `path` into `writer`.
    async fn get(
        &self,
        path: &str,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> StorageResult<u64>;

    /// Remove the bytes at `path`.
    async fn delete(&self, path: &str) -> StorageResult<()>;

    /// Short backend identifier for logs.
    fn backend_name(&self) -> &'static str;
}

/// Validate a storage key and return its components.
///
/// Keys are relative, `/`-separated and made only of normal components, so
/// they can never resolve outside the storage root.
pub fn key_components(path: &str) -> StorageResult<Vec<&str>> {
    if path.is_empty() || path.starts_with('/') || path.contains('\\') {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    let mut parts = Vec::new();
    for component in RelativePath::new(path).components() {
        match component {
            Component::Normal(name) => parts.push(name),
            Component::CurDir | Component::ParentDir => {
                return Err(StorageError::InvalidPath(path.to_string()));
            }
        }
    }
    if parts.is_empty() {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_keys() {
        assert_eq!(key_components("a.txt").unwrap(), ["a.txt"]);
        assert_eq!(key_components("a/b/c.txt").unwrap(), ["a", "b", "c.txt"]);
    }

    #[test]
    fn test_traversal_rejected() {
        for bad in ["", "/etc/passwd", "../x", "a/../../x", "./a", "a\\b", "."] {
            assert!(
                matches!(key_components(bad), Err(StorageError::InvalidPath(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}

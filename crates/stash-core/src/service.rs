//! File operations that span metadata and bytes.

use crate::error::StoreError;
use crate::storage::{ByteStorage, StorageError, key_components};
use crate::store::{FileMetadata, NewFile, PendingDeletion, RecordStore};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, instrument, warn};

/// Errors from [`FileService`] operations.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ServiceError {
    pub fn is_not_found(&self) -> bool {
        match self {
            ServiceError::Store(e) => e.is_not_found(),
            ServiceError::Storage(e) => matches!(e, StorageError::NotFound(_)),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Couples the record store with byte storage.
#[derive(Debug, Clone)]
pub struct FileService {
    store: Arc<RecordStore>,
    storage: Arc<dyn ByteStorage>,
}

impl FileService {
    pub fn new(store: Arc<RecordStore>, storage: Arc<dyn ByteStorage>) -> Self {
        Self { store, storage }
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Store bytes, then record their metadata.
    ///
    /// If recording is rejected the bytes are removed again. A persist failure
    /// is not a rejection: the record is live in memory, so its bytes stay.
    #[instrument(level = "debug", skip(self, file, reader), fields(path = %file.path))]
    pub async fn upload(
        &self,
        file: NewFile,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ServiceResult<FileMetadata> {
        key_components(&file.path)?;
        let path = file.path.clone();
        let written = self.storage.put(&path, reader).await?;
        debug!(bytes = written, "Bytes stored");

        match self.store.add_file(file).await {
            Ok(metadata) => Ok(metadata),
            Err(e @ StoreError::PersistFailure(_)) => Err(e.into()),
            Err(e) => {
                if let Err(cleanup) = self.storage.delete(&path).await {
                    warn!(error = %cleanup, "Failed to remove bytes of rejected upload");
                }
                Err(e.into())
            }
        }
    }

    pub async fn metadata(&self, path: &str) -> ServiceResult<FileMetadata> {
        Ok(self.store.get_metadata(path).await?)
    }

    /// Stream a file into `writer`, holding its record lock throughout.
    #[instrument(level = "debug", skip(self, writer))]
    pub async fn download(
        &self,
        path: &str,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> ServiceResult<(FileMetadata, u64)> {
        let download = self.store.get_file_for_download(path).await?;
        let copied = self.storage.get(path, writer).await?;
        let metadata = download.metadata().clone();
        drop(download);
        Ok((metadata, copied))
    }

    /// Remove the record; bytes follow through the drain pipeline.
    pub async fn delete(&self, path: &str) -> ServiceResult<PendingDeletion> {
        Ok(self.store.remove_file(path).await?)
    }
}

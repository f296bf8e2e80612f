//! Metadata-indexed record store for the stash file-storage service.
//!
//! The store tracks user accounts and uploaded-file metadata, persists both as a
//! single JSON snapshot, and coordinates concurrent access between downloads,
//! mutations, and a background worker that physically removes deleted files.
//!
//! # Architecture
//!
//! - [`snapshot`]: the durable document and the I/O it is read from / written to
//! - [`index`]: O(1) lookup tables derived from the snapshot
//! - [`locks`]: per-file read-write locks, kept beside (not inside) the records
//! - [`store`]: [`RecordStore`], the structural lock and every user/file operation
//! - [`drain`]: the deletion queue and its single consuming worker
//! - [`shutdown`]: request admission and the ordered teardown sequence
//! - [`service`]: uploads and downloads that touch both metadata and bytes
//!
//! The collaborators the store consumes live behind traits:
//! [`storage::ByteStorage`], [`credentials::PasswordHasher`] and
//! [`snapshot::SnapshotIo`].
//!
//! # Example
//!
//! ```ignore
//! let config = StashConfig::load(Some(Path::new("stash.toml")))?;
//! let storage: Arc<dyn ByteStorage> = Arc::new(FsStorage::new(&config.storage.folder));
//! let (queue, worker) = DeletionPipeline::start(storage.clone(), config.drain.queue_capacity);
//!
//! let store = RecordStore::load(
//!     Arc::new(FileSnapshotIo::new(&config.database.filename)),
//!     Arc::new(ScryptHasher::default()),
//!     queue.clone(),
//! )
//! .await?
//! .into_shared();
//!
//! let coordinator = ShutdownCoordinator::new(queue, worker, config.shutdown.grace_period);
//! // ... serve requests, each holding `coordinator.admit()?` ...
//! let report = coordinator.shutdown().await;
//! ```

pub mod config;
pub mod credentials;
pub mod drain;
pub mod error;
pub mod index;
pub mod locks;
pub mod service;
pub mod shutdown;
pub mod snapshot;
pub mod storage;
pub mod store;

pub use config::StashConfig;
pub use credentials::{PasswordHasher, ScryptHasher};
pub use drain::{DeletionPipeline, DeletionQueue, DrainReport, DrainWorker};
pub use error::{
    ConfigError, CredentialError, RecordKind, StorageError, StoreError, StoreResult,
};
pub use service::{FileService, ServiceError};
pub use shutdown::{RequestTicket, ShutdownCoordinator, ShutdownReport};
pub use snapshot::{FileSnapshotIo, MemorySnapshotIo, SnapshotIo};
pub use storage::{ByteStorage, FsStorage, MemoryStorage};
pub use store::{FileDownload, FileMetadata, NewFile, PendingDeletion, RecordStore};

//! Wiring of the record store, byte storage and shutdown coordinator.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use stash_core::{
    ByteStorage, DeletionPipeline, FileService, FileSnapshotIo, FsStorage, RecordStore,
    RequestTicket, ScryptHasher, ShutdownCoordinator, StashConfig,
};

/// A running store, ready to serve one command.
pub struct App {
    pub store: Arc<RecordStore>,
    pub service: FileService,
    coordinator: ShutdownCoordinator,
}

impl App {
    #[instrument(level = "debug", skip_all, fields(db = %config.database.filename.display()))]
    pub async fn open(config: &StashConfig) -> Result<Self> {
        let storage: Arc<dyn ByteStorage> = Arc::new(FsStorage::new(&config.storage.folder));
        let (queue, worker) = DeletionPipeline::start(storage.clone(), config.drain.queue_capacity);

        let io = Arc::new(FileSnapshotIo::new(config.database.filename.clone()));
        let store = RecordStore::load(io, Arc::new(ScryptHasher::default()), queue.clone())
            .await
            .with_context(|| {
                format!(
                    "Failed to load database {}",
                    config.database.filename.display()
                )
            })?
            .into_shared();

        debug!(
            users = store.user_count().await,
            files = store.file_count().await,
            "Store loaded"
        );

        Ok(Self {
            service: FileService::new(store.clone(), storage),
            store,
            coordinator: ShutdownCoordinator::new(queue, worker, config.shutdown.grace_period),
        })
    }

    pub fn admit(&self) -> Result<RequestTicket> {
        Ok(self.coordinator.admit()?)
    }

    /// Stop admitting work, finish pending deletions and stop the drain worker.
    pub async fn close(self) {
        let report = self.coordinator.shutdown().await;
        if report.timed_out {
            warn!(abandoned = report.abandoned, "Shutdown grace period expired");
        }
        if report.drain.failed > 0 {
            warn!(
                failed = report.drain.failed,
                "Some deleted files could not be removed from storage"
            );
        }
        info!(purged = report.drain.purged, "Store closed");
    }
}

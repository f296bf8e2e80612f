//! Common test utilities for record store integration tests.

#![allow(dead_code)]

use stash_core::{
    ByteStorage, DeletionPipeline, FileService, MemorySnapshotIo, MemoryStorage, NewFile,
    RecordStore, ScryptHasher, ShutdownCoordinator, SnapshotIo,
};
use std::sync::Arc;
use std::time::Duration;

pub const TEST_PASSWORD: &str = "correct horse battery";

/// Cheap scrypt parameters; production cost is far too slow for test loops.
pub fn fast_hasher() -> Arc<ScryptHasher> {
    Arc::new(ScryptHasher::with_cost(4))
}

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A fully wired store over in-memory collaborators.
pub struct Harness {
    pub store: Arc<RecordStore>,
    pub storage: Arc<MemoryStorage>,
    pub io: Arc<MemorySnapshotIo>,
    pub service: FileService,
    pub coordinator: ShutdownCoordinator,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_io(Arc::new(MemorySnapshotIo::new())).await
    }

    pub async fn with_io(io: Arc<MemorySnapshotIo>) -> Self {
        init_tracing();
        let storage = Arc::new(MemoryStorage::new());
        let (queue, worker) = DeletionPipeline::start(storage.clone(), 4);
        let snapshot_io: Arc<dyn SnapshotIo> = io.clone();
        let store = RecordStore::load(snapshot_io, fast_hasher(), queue.clone())
            .await
            .expect("store should load")
            .into_shared();
        let byte_storage: Arc<dyn ByteStorage> = storage.clone();
        let service = FileService::new(store.clone(), byte_storage);
        let coordinator = ShutdownCoordinator::new(queue, worker, Duration::from_secs(5));
        Self {
            store,
            storage,
            io,
            service,
            coordinator,
        }
    }

    /// Upload `body` at `path` as "admin".
    pub async fn upload(&self, path: &str, body: &[u8]) {
        let mut reader = body;
        self.service
            .upload(NewFile::new(path, "text/plain", "admin"), &mut reader)
            .await
            .expect("upload should succeed");
    }
}

//! Deletion drain pipeline.
//!
//! Deleted file records travel through a bounded queue to a single worker
//! that removes their bytes from [`ByteStorage`]. Each entry carries the
//! record's write guard, so the bytes are removed only after every download
//! of that record has finished, and the guard is released only once the
//! physical delete has returned.
//!
//! # Shutdown handshake
//!
//! Producers [`reserve`](DeletionQueue::reserve) a [`DrainPermit`] before they
//! start waiting for a record's write lock. A permit holds the read side of the
//! queue's gate until it is published or dropped. [`close`](DeletionQueue::close)
//! takes the write side, which waits for every outstanding permit, then drops
//! the sender. The worker drains whatever is left and exits with a
//! [`DrainReport`].

use crate::error::{StoreError, StoreResult};
use crate::locks::RecordWriteGuard;
use crate::snapshot::FileRecord;
use crate::storage::ByteStorage;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A logically deleted record waiting for its bytes to be removed.
#[derive(Debug)]
pub struct PurgeEntry {
    record: FileRecord,
    _exclusive: RecordWriteGuard,
}

impl PurgeEntry {
    pub(crate) fn new(record: FileRecord, exclusive: RecordWriteGuard) -> Self {
        Self {
            record,
            _exclusive: exclusive,
        }
    }

    pub fn record(&self) -> &FileRecord {
        &self.record
    }
}

type Gate = RwLock<Option<mpsc::Sender<PurgeEntry>>>;

/// Producer side of the pipeline. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DeletionQueue {
    gate: Arc<Gate>,
    closing: CancellationToken,
}

/// Consumer side: the handle of the background worker task.
#[derive(Debug)]
pub struct DrainWorker {
    handle: JoinHandle<DrainReport>,
}

/// What the worker did before it exited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries whose bytes were removed.
    pub purged: usize,
    /// Entries whose delete call failed; their bytes may remain.
    pub failed: usize,
}

/// A reserved slot in the queue.
///
/// While a permit exists the queue cannot finish closing.
#[derive(Debug)]
pub struct DrainPermit {
    gate: OwnedRwLockReadGuard<Option<mpsc::Sender<PurgeEntry>>>,
}

/// Constructor for the queue/worker pair.
pub struct DeletionPipeline;

impl DeletionPipeline {
    /// Spawn the drain worker on the current Tokio runtime.
    ///
    /// `capacity` is the number of entries that may wait for the worker; zero
    /// is treated as one.
    pub fn start(storage: Arc<dyn ByteStorage>, capacity: usize) -> (DeletionQueue, DrainWorker) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queue = DeletionQueue {
            gate: Arc::new(RwLock::new(Some(tx))),
            closing: CancellationToken::new(),
        };
        info!(
            backend = storage.backend_name(),
            capacity = capacity.max(1),
            "Starting drain worker"
        );
        let handle = tokio::spawn(run_worker(storage, rx));
        (queue, DrainWorker { handle })
    }
}

async fn run_worker(
    storage: Arc<dyn ByteStorage>,
    mut rx: mpsc::Receiver<PurgeEntry>,
) -> DrainReport {
    let mut report = DrainReport::default();
    while let Some(entry) = rx.recv().await {
        let path = entry.record().path.as_str();
        match storage.delete(path).await {
            Ok(()) => {
                report.purged += 1;
                debug!(path = %path, "Purged file bytes");
            }
            Err(e) => {
                report.failed += 1;
                warn!(path = %path, error = %e, "Failed to purge file bytes");
            }
        }
        // Dropping the entry releases the record's write guard.
        drop(entry);
    }
    info!(
        purged = report.purged,
        failed = report.failed,
        "Drain worker finished"
    );
    report
}

impl DeletionQueue {
    /// Reserve a slot without waiting.
    ///
    /// Fails with [`StoreError::ShuttingDown`] once closing has begun.
    pub fn reserve(&self) -> StoreResult<DrainPermit> {
        if self.closing.is_cancelled() {
            return Err(StoreError::ShuttingDown);
        }
        // A queued or active writer means close() is underway.
        let gate = self
            .gate
            .clone()
            .try_read_owned()
            .map_err(|_| StoreError::ShuttingDown)?;
        if gate.is_none() {
            return Err(StoreError::ShuttingDown);
        }
        Ok(DrainPermit { gate })
    }

    /// Stop accepting entries.
    ///
    /// Waits for every outstanding [`DrainPermit`] to be published or dropped,
    /// then closes the channel so the worker can drain and exit. Idempotent.
    pub async fn close(&self) {
        self.closing.cancel();
        let mut gate = self.gate.write().await;
        if gate.take().is_some() {
            info!("Deletion queue closed");
        }
    }

    /// True once [`close`](Self::close) has been called.
    pub fn is_closing(&self) -> bool {
        self.closing.is_cancelled()
    }

    /// Token cancelled when the queue starts closing.
    pub fn closing_token(&self) -> CancellationToken {
        self.closing.clone()
    }
}

impl DrainPermit {
    /// Hand an entry to the worker, waiting for queue space if needed.
    pub async fn publish(self, entry: PurgeEntry) -> StoreResult<()> {
        let Some(tx) = self.gate.as_ref() else {
            return Err(StoreError::ShuttingDown);
        };
        tx.send(entry).await.map_err(|e| {
            error!(path = %e.0.record().path, "Drain worker is gone, entry dropped");
            StoreError::ShuttingDown
        })
    }
}

impl DrainWorker {
    /// Wait for the worker to drain the queue and exit.
    ///
    /// Only returns after [`DeletionQueue::close`] has been called.
    pub async fn join(self) -> DrainReport {
        match self.handle.await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Drain worker task failed");
                DrainReport::default()
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

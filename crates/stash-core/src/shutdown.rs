//! Ordered shutdown.
//!
//! The coordinator admits requests until shutdown begins, then tears down in
//! order: stop admitting, give in-flight requests up to the grace period,
//! close the deletion queue (waiting for deletions already under way), and
//! wait for the drain worker to finish.

use crate::drain::{DeletionQueue, DrainReport, DrainWorker};
use crate::error::{StoreError, StoreResult};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tracing::{info, warn};

/// Proof that a request was admitted. Counts as in-flight work until dropped.
#[derive(Debug)]
pub struct RequestTicket {
    _token: TaskTrackerToken,
}

/// Outcome of [`ShutdownCoordinator::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// The grace period expired before every request finished.
    pub timed_out: bool,
    /// Requests still in flight when the grace period expired.
    pub abandoned: usize,
    /// What the drain worker did.
    pub drain: DrainReport,
}

#[derive(Debug)]
pub struct ShutdownCoordinator {
    accepting: CancellationToken,
    in_flight: TaskTracker,
    queue: DeletionQueue,
    worker: Mutex<Option<DrainWorker>>,
    grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(queue: DeletionQueue, worker: DrainWorker, grace: Duration) -> Self {
        Self {
            accepting: CancellationToken::new(),
            in_flight: TaskTracker::new(),
            queue,
            worker: Mutex::new(Some(worker)),
            grace,
        }
    }

    /// Admit a request, or refuse it once shutdown has begun.
    pub fn admit(&self) -> StoreResult<RequestTicket> {
        if self.accepting.is_cancelled() {
            return Err(StoreError::ShuttingDown);
        }
        Ok(RequestTicket {
            _token: self.in_flight.token(),
        })
    }

    /// Number of admitted requests that have not finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.accepting.is_cancelled()
    }

    /// Token cancelled as soon as shutdown begins, for accept loops to watch.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.accepting.clone()
    }

    /// Run the shutdown sequence.
    ///
    /// Only the wait for in-flight requests is bounded; closing the queue and
    /// joining the worker wait as long as it takes. Calling this twice is
    /// harmless; the second report has an empty drain summary.
    pub async fn shutdown(&self) -> ShutdownReport {
        info!(in_flight = self.in_flight.len(), "Shutdown started");
        self.accepting.cancel();
        self.in_flight.close();

        let mut report = ShutdownReport::default();
        if tokio::time::timeout(self.grace, self.in_flight.wait())
            .await
            .is_err()
        {
            report.timed_out = true;
            report.abandoned = self.in_flight.len();
            warn!(
                remaining = report.abandoned,
                grace = ?self.grace,
                "Grace period expired with requests still in flight"
            );
        }

        self.queue.close().await;

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            report.drain = worker.join().await;
        }

        info!(
            purged = report.drain.purged,
            failed = report.drain.failed,
            timed_out = report.timed_out,
            "Shutdown complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drain::DeletionPipeline;
    use crate::storage::MemoryStorage;
    use std::sync::Arc;

    fn coordinator(grace: Duration) -> ShutdownCoordinator {
        let (queue, worker) = DeletionPipeline::start(Arc::new(MemoryStorage::new()), 4);
        ShutdownCoordinator::new(queue, worker, grace)
    }

    #[tokio::test]
    async fn test_admit_until_shutdown() {
        let coordinator = coordinator(Duration::from_secs(1));
        let ticket = coordinator.admit().unwrap();
        assert_eq!(coordinator.in_flight(), 1);
        drop(ticket);
        assert_eq!(coordinator.in_flight(), 0);

        let report = coordinator.shutdown().await;
        assert!(!report.timed_out);
        assert!(coordinator.is_shutting_down());
        assert!(matches!(coordinator.admit(), Err(StoreError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_waits_for_in_flight_requests() {
        let coordinator = Arc::new(coordinator(Duration::from_secs(5)));
        let ticket = coordinator.admit().unwrap();

        let request = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(ticket);
        });

        let report = coordinator.shutdown().await;
        assert!(!report.timed_out);
        assert_eq!(coordinator.in_flight(), 0);
        request.await.unwrap();
    }

    #[tokio::test]
    async fn test_grace_period_expires() {
        let coordinator = coordinator(Duration::from_millis(50));
        let _stuck = coordinator.admit().unwrap();

        let report = coordinator.shutdown().await;
        assert!(report.timed_out);
        assert_eq!(report.abandoned, 1);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let coordinator = coordinator(Duration::from_millis(10));
        coordinator.shutdown().await;
        let second = coordinator.shutdown().await;
        assert_eq!(second, ShutdownReport::default());
    }

    #[tokio::test]
    async fn test_token_signals_shutdown() {
        let coordinator = coordinator(Duration::from_millis(10));
        let token = coordinator.shutdown_token();
        assert!(!token.is_cancelled());
        coordinator.shutdown().await;
        assert!(token.is_cancelled());
    }
}

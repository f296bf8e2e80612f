//! Shutdown ordering: admission, pending deletions, and the drain worker.

mod common;

use common::{Harness, TEST_PASSWORD, fast_hasher, init_tracing};
use stash_core::{
    DeletionPipeline, FileService, FileSnapshotIo, FsStorage, NewFile, RecordStore,
    ShutdownCoordinator, StoreError,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::timeout;

#[tokio::test]
async fn test_delete_after_shutdown_leaves_bytes() {
    let h = Harness::new().await;
    h.upload("keep.txt", b"still here").await;

    let report = h.coordinator.shutdown().await;
    assert_eq!(report.drain.purged, 0);

    let pending = h.store.remove_file("keep.txt").await.unwrap();
    assert!(matches!(
        pending.completion().await,
        Err(StoreError::ShuttingDown)
    ));
    assert!(h.store.get_metadata("keep.txt").await.unwrap_err().is_not_found());
    assert!(h.storage.contains("keep.txt"));
}

#[tokio::test]
async fn test_shutdown_waits_for_delete_blocked_on_download() {
    let h = Arc::new(Harness::new().await);
    h.upload("slow.bin", b"streaming...").await;

    let download = h.store.get_file_for_download("slow.bin").await.unwrap();
    let _pending = h.store.remove_file("slow.bin").await.unwrap();

    let shutdown = tokio::spawn({
        let h = h.clone();
        async move { h.coordinator.shutdown().await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        !shutdown.is_finished(),
        "shutdown must wait for the pending deletion"
    );
    assert!(h.storage.contains("slow.bin"));

    drop(download);
    let report = timeout(Duration::from_secs(2), shutdown)
        .await
        .expect("shutdown should finish once the download ends")
        .unwrap();

    assert_eq!(report.drain.purged, 1);
    assert!(!h.storage.contains("slow.bin"));
}

#[tokio::test]
async fn test_admission_closes_before_drain() {
    let h = Harness::new().await;
    let ticket = h.coordinator.admit().unwrap();
    assert_eq!(h.coordinator.in_flight(), 1);

    let shutdown = h.coordinator.shutdown();
    tokio::pin!(shutdown);

    // Shutdown is blocked on the ticket; new requests are already refused.
    assert!(
        timeout(Duration::from_millis(50), &mut shutdown)
            .await
            .is_err()
    );
    assert!(matches!(h.coordinator.admit(), Err(StoreError::ShuttingDown)));

    drop(ticket);
    let report = shutdown.await;
    assert!(!report.timed_out);
}

#[tokio::test]
async fn test_full_lifecycle_on_disk() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let bytes_root = dir.path().join("storage");

    let storage = Arc::new(FsStorage::new(&bytes_root));
    let (queue, worker) = DeletionPipeline::start(storage.clone(), 2);
    let store = RecordStore::load(
        Arc::new(FileSnapshotIo::new(dir.path().join("stash.db"))),
        fast_hasher(),
        queue.clone(),
    )
    .await
    .unwrap()
    .into_shared();
    let service = FileService::new(store.clone(), storage);
    let coordinator = ShutdownCoordinator::new(queue, worker, Duration::from_secs(1));

    {
        let _ticket = coordinator.admit().unwrap();
        store.add_user("admin", TEST_PASSWORD).await.unwrap();
        service
            .upload(
                NewFile::new("a/b/c.txt", "text/plain", "admin"),
                &mut &b"payload"[..],
            )
            .await
            .unwrap();
        service
            .upload(
                NewFile::new("a/keep.txt", "text/plain", "admin"),
                &mut &b"payload"[..],
            )
            .await
            .unwrap();
        service.delete("a/b/c.txt").await.unwrap();
    }

    let report = coordinator.shutdown().await;
    assert!(!report.timed_out);
    assert_eq!(report.drain.purged, 1);
    assert_eq!(report.drain.failed, 0);

    assert!(!bytes_root.join("a/b").exists());
    assert!(bytes_root.join("a/keep.txt").exists());
}

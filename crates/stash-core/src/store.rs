//! The record store.
//!
//! [`RecordStore`] owns the snapshot, the index derived from it, and the
//! structural lock that serializes every change to either. Mutations take the
//! write side, apply the change to snapshot and index together, persist, and
//! release. Lookups take the read side.
//!
//! File records additionally have their own locks (see [`crate::locks`]):
//! downloads hold the read side for as long as they stream bytes, and a delete
//! only hands a record to the drain pipeline once it holds the write side.

use crate::credentials::{CredentialError, PasswordHasher};
use crate::drain::{DeletionQueue, DrainPermit, PurgeEntry};
use crate::error::{MIN_PASSWORD_LEN, StoreError, StoreResult};
use crate::index::{Index, dedup_keys};
use crate::locks::{FileLockTable, RecordLock, RecordReadGuard};
use crate::snapshot::{FileRecord, Snapshot, SnapshotIo, UserRecord};
use chrono::Utc;
use std::io;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroizing;

/// Owned copy of a file record's metadata.
pub type FileMetadata = FileRecord;

/// Metadata for a file being added; the store stamps the creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFile {
    pub path: String,
    pub content_type: String,
    pub uploader: String,
}

impl NewFile {
    pub fn new(
        path: impl Into<String>,
        content_type: impl Into<String>,
        uploader: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            content_type: content_type.into(),
            uploader: uploader.into(),
        }
    }
}

/// A file checked out for download.
///
/// Holds the read side of the record's lock until dropped, which keeps a
/// concurrent delete from removing the bytes mid-transfer.
#[derive(Debug)]
pub struct FileDownload {
    metadata: FileMetadata,
    _shared: RecordReadGuard,
}

impl FileDownload {
    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub fn path(&self) -> &str {
        &self.metadata.path
    }
}

/// The asynchronous half of a file deletion.
///
/// Await [`completion`](Self::completion) to learn whether the record reached
/// the drain pipeline, or drop the handle to let it finish in the background.
#[derive(Debug)]
pub struct PendingDeletion {
    path: String,
    phase: Phase,
}

#[derive(Debug)]
enum Phase {
    Scheduled(JoinHandle<StoreResult<()>>),
    Refused,
}

impl PendingDeletion {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// True if the drain pipeline refused the record at delete time.
    pub fn is_refused(&self) -> bool {
        matches!(self.phase, Phase::Refused)
    }

    /// Wait until the record has been handed to the drain pipeline.
    ///
    /// Fails with [`StoreError::ShuttingDown`] if the pipeline closed first.
    /// The bytes themselves are removed later by the drain worker.
    pub async fn completion(self) -> StoreResult<()> {
        match self.phase {
            Phase::Refused => Err(StoreError::ShuttingDown),
            Phase::Scheduled(handle) => match handle.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(_) => Err(StoreError::ShuttingDown),
            },
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    snapshot: Snapshot,
    index: Index,
}

/// User and file metadata, persisted as one snapshot.
#[derive(Debug)]
pub struct RecordStore {
    state: RwLock<StoreState>,
    locks: FileLockTable,
    io: Arc<dyn SnapshotIo>,
    hasher: Arc<dyn PasswordHasher>,
    queue: DeletionQueue,
}

impl RecordStore {
    /// Load the snapshot from `io` and build the index.
    ///
    /// A missing snapshot is bootstrapped by writing an empty one and reading
    /// it back.
    #[instrument(level = "debug", skip_all)]
    pub async fn load(
        io: Arc<dyn SnapshotIo>,
        hasher: Arc<dyn PasswordHasher>,
        queue: DeletionQueue,
    ) -> StoreResult<Self> {
        let store = Self {
            state: RwLock::new(StoreState::default()),
            locks: FileLockTable::new(),
            io,
            hasher,
            queue,
        };
        store.reload().await?;
        Ok(store)
    }

    /// Wrap the store for sharing between tasks.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Re-read the snapshot and rebuild the index and file locks.
    ///
    /// Records that survive the reload keep their file lock, so downloads
    /// already in progress still hold off a later delete.
    #[instrument(level = "debug", skip(self))]
    pub async fn reload(&self) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let mut snapshot = self.read_or_bootstrap().await?;

        let dropped = dedup_keys(&mut snapshot);
        if dropped > 0 {
            warn!(dropped, "Snapshot contained duplicate keys, kept the last of each");
        }

        state.index = Index::rebuild(&snapshot);
        self.locks
            .reset(snapshot.files.iter().map(|f| f.path.as_str()));
        info!(
            users = snapshot.users.len(),
            files = snapshot.files.len(),
            "Snapshot loaded"
        );
        state.snapshot = snapshot;
        Ok(())
    }

    async fn read_or_bootstrap(&self) -> StoreResult<Snapshot> {
        match self.read_bytes().await {
            Ok(bytes) => Snapshot::decode(&bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No snapshot found, writing an empty one");
                self.persist(&Snapshot::default()).await?;
                let bytes = self.read_bytes().await.map_err(StoreError::Unreadable)?;
                Snapshot::decode(&bytes)
            }
            Err(e) => Err(StoreError::Unreadable(e)),
        }
    }

    async fn read_bytes(&self) -> io::Result<Vec<u8>> {
        let io = self.io.clone();
        tokio::task::spawn_blocking(move || io.read_all())
            .await
            .map_err(|e| io::Error::other(format!("snapshot read task failed: {e}")))?
    }

    async fn persist(&self, snapshot: &Snapshot) -> StoreResult<()> {
        let bytes = snapshot.encode()?;
        let io = self.io.clone();
        tokio::task::spawn_blocking(move || io.write_all(&bytes))
            .await
            .map_err(|e| io::Error::other(format!("snapshot write task failed: {e}")))
            .and_then(|written| written)
            .map_err(|e| {
                warn!(error = %e, "Snapshot persist failed, in-memory state kept");
                StoreError::PersistFailure(e)
            })
    }

    /// Salt (unless given) and hash a password on the blocking pool.
    async fn derive_digest(
        &self,
        password: &str,
        salt: Option<String>,
    ) -> StoreResult<(String, String)> {
        let hasher = self.hasher.clone();
        let raw = Zeroizing::new(password.to_string());
        let derived = tokio::task::spawn_blocking(move || {
            let salt = match salt {
                Some(salt) => salt,
                None => hasher.derive_salt()?,
            };
            let digest = hasher.hash(&raw, &salt)?;
            Ok::<_, CredentialError>((salt, digest))
        })
        .await
        .map_err(|e| CredentialError::Derivation(format!("hashing task failed: {e}")))?;
        Ok(derived?)
    }

    // ---------------------------------------------------------------- users

    /// Create a user with a freshly salted password digest.
    #[instrument(level = "debug", skip(self, password))]
    pub async fn add_user(&self, username: &str, password: &str) -> StoreResult<()> {
        check_password_len(password)?;
        if self.state.read().await.index.user(username).is_some() {
            return Err(StoreError::AlreadyExists(username.to_string()));
        }

        let (salt, digest) = self.derive_digest(password, None).await?;

        let mut guard = self.state.write().await;
        let StoreState { snapshot, index } = &mut *guard;
        // Re-check: another task may have added the name while we hashed.
        if index.user(username).is_some() {
            return Err(StoreError::AlreadyExists(username.to_string()));
        }
        snapshot.users.push(UserRecord {
            username: username.to_string(),
            salt,
            digest,
        });
        index.insert_user(username.to_string(), snapshot.users.len() - 1);

        self.persist(snapshot).await?;
        info!(username = %username, "User added");
        Ok(())
    }

    /// Remove a user. The last remaining user cannot be removed.
    #[instrument(level = "debug", skip(self))]
    pub async fn remove_user(&self, username: &str) -> StoreResult<()> {
        let mut guard = self.state.write().await;
        let StoreState { snapshot, index } = &mut *guard;

        if index.user(username).is_none() {
            return Err(StoreError::user_not_found(username));
        }
        if index.user_count() <= 1 {
            return Err(StoreError::LastUserProtected);
        }
        if let Some(pos) = index.remove_user(username) {
            snapshot.users.remove(pos);
        }

        self.persist(snapshot).await?;
        info!(username = %username, "User removed");
        Ok(())
    }

    /// Replace a user's digest, keeping the existing salt.
    #[instrument(level = "debug", skip(self, password))]
    pub async fn update_user_password(&self, username: &str, password: &str) -> StoreResult<()> {
        let mut guard = self.state.write().await;
        let pos = guard
            .index
            .user(username)
            .ok_or_else(|| StoreError::user_not_found(username))?;
        check_password_len(password)?;

        let salt = guard.snapshot.users[pos].salt.clone();
        let (_, digest) = self.derive_digest(password, Some(salt)).await?;
        guard.snapshot.users[pos].digest = digest;

        self.persist(&guard.snapshot).await?;
        info!(username = %username, "Password updated");
        Ok(())
    }

    /// True iff `username` exists and `password` matches its digest.
    ///
    /// Never fails: lookup misses and hashing errors both yield `false`.
    #[instrument(level = "debug", skip(self, password))]
    pub async fn check_password(&self, username: &str, password: &str) -> bool {
        let (salt, digest) = {
            let state = self.state.read().await;
            match state.index.user(username) {
                Some(pos) => {
                    let user = &state.snapshot.users[pos];
                    (user.salt.clone(), user.digest.clone())
                }
                None => {
                    debug!("Unknown user");
                    return false;
                }
            }
        };

        let hasher = self.hasher.clone();
        let raw = Zeroizing::new(password.to_string());
        tokio::task::spawn_blocking(move || hasher.verify(&raw, &salt, &digest))
            .await
            .unwrap_or(false)
    }

    /// Usernames in snapshot order.
    pub async fn list_users(&self) -> Vec<String> {
        let state = self.state.read().await;
        state
            .snapshot
            .users
            .iter()
            .map(|u| u.username.clone())
            .collect()
    }

    pub async fn user_count(&self) -> usize {
        self.state.read().await.index.user_count()
    }

    // ---------------------------------------------------------------- files

    /// Record a file, replacing any existing record at the same path.
    ///
    /// A replaced record gets a fresh lock; downloads of the previous record
    /// keep the old one. The previous bytes are not scheduled for deletion.
    #[instrument(level = "debug", skip(self, file), fields(path = %file.path))]
    pub async fn add_file(&self, file: NewFile) -> StoreResult<FileMetadata> {
        let record = FileRecord {
            path: file.path,
            content_type: file.content_type,
            uploader: file.uploader,
            created_at: Utc::now(),
        };

        let mut guard = self.state.write().await;
        let StoreState { snapshot, index } = &mut *guard;

        let replaced = match index.file(&record.path) {
            Some(pos) => {
                snapshot.files[pos] = record.clone();
                true
            }
            None => {
                snapshot.files.push(record.clone());
                index.insert_file(record.path.clone(), snapshot.files.len() - 1);
                false
            }
        };
        self.locks.install(&record.path);

        self.persist(snapshot).await?;
        info!(uploader = %record.uploader, replaced, "File recorded");
        Ok(record)
    }

    /// Owned copy of a file's metadata.
    pub async fn get_metadata(&self, path: &str) -> StoreResult<FileMetadata> {
        let state = self.state.read().await;
        let pos = state
            .index
            .file(path)
            .ok_or_else(|| StoreError::file_not_found(path))?;
        Ok(state.snapshot.files[pos].clone())
    }

    /// Check a file out for download.
    ///
    /// The file lock is acquired while the structural read lock is still held,
    /// so a delete cannot slip in between lookup and acquisition. Only a delete
    /// takes the write side, and it detaches the lock from the table first, so
    /// a lock found here is never write-held and this does not wait.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_file_for_download(&self, path: &str) -> StoreResult<FileDownload> {
        let state = self.state.read().await;
        let pos = state
            .index
            .file(path)
            .ok_or_else(|| StoreError::file_not_found(path))?;
        let lock = self
            .locks
            .get(path)
            .ok_or_else(|| StoreError::file_not_found(path))?;
        let shared = lock.read_owned().await;
        let metadata = state.snapshot.files[pos].clone();
        drop(state);

        debug!("File checked out for download");
        Ok(FileDownload {
            metadata,
            _shared: shared,
        })
    }

    /// Delete a file record.
    ///
    /// The record disappears from lookups before this returns. Its bytes are
    /// queued for removal in the background once all downloads of it have
    /// finished; the returned handle reports whether that hand-off succeeded.
    #[instrument(level = "debug", skip(self))]
    pub async fn remove_file(&self, path: &str) -> StoreResult<PendingDeletion> {
        let mut guard = self.state.write().await;
        let StoreState { snapshot, index } = &mut *guard;

        let pos = index
            .remove_file(path)
            .ok_or_else(|| StoreError::file_not_found(path))?;
        let record = snapshot.files.remove(pos);
        let lock = self
            .locks
            .detach(path)
            .unwrap_or_else(|| Arc::new(RwLock::new(())));
        let permit = self.queue.reserve();

        let persisted = self.persist(snapshot).await;
        drop(guard);

        let phase = match permit {
            Ok(permit) => Phase::Scheduled(tokio::spawn(purge_when_released(record, lock, permit))),
            Err(e) => {
                warn!(path = %path, error = %e, "File removed but its bytes will not be purged");
                Phase::Refused
            }
        };
        persisted?;

        info!(path = %path, "File removed");
        Ok(PendingDeletion {
            path: path.to_string(),
            phase,
        })
    }

    /// All file metadata in snapshot order.
    pub async fn list_files(&self) -> Vec<FileMetadata> {
        self.state.read().await.snapshot.files.clone()
    }

    pub async fn file_count(&self) -> usize {
        self.state.read().await.index.file_count()
    }

    // ---------------------------------------------------------------- misc

    /// Copy of the current in-memory snapshot.
    pub async fn snapshot(&self) -> Snapshot {
        self.state.read().await.snapshot.clone()
    }

    /// True if the index describes exactly the records in the snapshot.
    pub async fn is_index_consistent(&self) -> bool {
        let state = self.state.read().await;
        state.index.matches(&state.snapshot)
    }

    /// The deletion queue this store publishes to.
    pub fn deletion_queue(&self) -> &DeletionQueue {
        &self.queue
    }
}

fn check_password_len(password: &str) -> StoreResult<()> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(StoreError::PasswordTooShort {
            min: MIN_PASSWORD_LEN,
        });
    }
    Ok(())
}

/// Second phase of a delete: wait out downloads, then hand off to the worker.
async fn purge_when_released(
    record: FileRecord,
    lock: RecordLock,
    permit: DrainPermit,
) -> StoreResult<()> {
    let exclusive = lock.write_owned().await;
    debug!(path = %record.path, "Downloads released, queueing bytes for removal");
    let path = record.path.clone();
    permit
        .publish(PurgeEntry::new(record, exclusive))
        .await
        .inspect_err(|e| warn!(path = %path, error = %e, "Could not queue file for purge"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::ScryptHasher;
    use crate::drain::DeletionPipeline;
    use crate::snapshot::MemorySnapshotIo;
    use crate::storage::MemoryStorage;

    async fn store_with(io: Arc<MemorySnapshotIo>) -> RecordStore {
        let (queue, _worker) = DeletionPipeline::start(Arc::new(MemoryStorage::new()), 4);
        RecordStore::load(io, Arc::new(ScryptHasher::with_cost(4)), queue)
            .await
            .unwrap()
    }

    async fn empty_store() -> RecordStore {
        store_with(Arc::new(MemorySnapshotIo::new())).await
    }

    #[tokio::test]
    async fn test_load_bootstraps_missing_snapshot() {
        let io = Arc::new(MemorySnapshotIo::new());
        let store = store_with(io.clone()).await;

        assert_eq!(store.user_count().await, 0);
        assert_eq!(io.write_count(), 1);
        assert_eq!(Snapshot::decode(&io.bytes().unwrap()).unwrap(), Snapshot::default());
    }

    #[tokio::test]
    async fn test_load_corrupt_snapshot() {
        let io = Arc::new(MemorySnapshotIo::with_bytes("{ nope"));
        let (queue, _worker) = DeletionPipeline::start(Arc::new(MemoryStorage::new()), 1);
        let result = RecordStore::load(io, Arc::new(ScryptHasher::with_cost(4)), queue).await;
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_password_too_short() {
        let store = empty_store().await;
        let result = store.add_user("admin", "1234567").await;
        assert!(matches!(result, Err(StoreError::PasswordTooShort { min: 8 })));
        assert_eq!(store.user_count().await, 0);
    }

    #[tokio::test]
    async fn test_add_user_duplicate() {
        let store = empty_store().await;
        store.add_user("admin", "12345678").await.unwrap();
        let before = store.snapshot().await;

        let result = store.add_user("admin", "abcdefgh").await;
        assert!(matches!(result, Err(StoreError::AlreadyExists(name)) if name == "admin"));
        assert_eq!(store.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_check_password() {
        let store = empty_store().await;
        store.add_user("admin", "12345678").await.unwrap();

        assert!(store.check_password("admin", "12345678").await);
        assert!(!store.check_password("admin", "87654321").await);
        assert!(!store.check_password("nobody", "12345678").await);
    }

    #[tokio::test]
    async fn test_update_password_keeps_salt() {
        let store = empty_store().await;
        store.add_user("admin", "12345678").await.unwrap();
        let salt_before = store.snapshot().await.users[0].salt.clone();

        store.update_user_password("admin", "new-password").await.unwrap();

        assert_eq!(store.snapshot().await.users[0].salt, salt_before);
        assert!(store.check_password("admin", "new-password").await);
        assert!(!store.check_password("admin", "12345678").await);
    }

    #[tokio::test]
    async fn test_update_password_errors() {
        let store = empty_store().await;
        store.add_user("admin", "12345678").await.unwrap();

        assert!(
            store
                .update_user_password("ghost", "short")
                .await
                .unwrap_err()
                .is_not_found()
        );
        assert!(matches!(
            store.update_user_password("admin", "short").await,
            Err(StoreError::PasswordTooShort { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_user_checks_existence_first() {
        let store = empty_store().await;
        store.add_user("admin", "12345678").await.unwrap();

        assert!(store.remove_user("ghost").await.unwrap_err().is_not_found());
        assert!(matches!(
            store.remove_user("admin").await,
            Err(StoreError::LastUserProtected)
        ));
    }

    #[tokio::test]
    async fn test_add_file_replaces_in_place() {
        let store = empty_store().await;
        store
            .add_file(NewFile::new("a.txt", "text/plain", "admin"))
            .await
            .unwrap();
        store
            .add_file(NewFile::new("b.txt", "text/plain", "admin"))
            .await
            .unwrap();
        store
            .add_file(NewFile::new("a.txt", "image/png", "bob"))
            .await
            .unwrap();

        let files = store.list_files().await;
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "a.txt");
        assert_eq!(files[0].content_type, "image/png");
        assert_eq!(files[0].uploader, "bob");
        assert!(store.is_index_consistent().await);
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_memory_change() {
        let io = Arc::new(MemorySnapshotIo::new());
        let store = store_with(io.clone()).await;
        io.set_fail_writes(true);

        let result = store
            .add_file(NewFile::new("a.txt", "text/plain", "admin"))
            .await;
        assert!(matches!(result, Err(StoreError::PersistFailure(_))));
        assert_eq!(store.get_metadata("a.txt").await.unwrap().uploader, "admin");

        // Disk still holds the bootstrap snapshot.
        let on_disk = Snapshot::decode(&io.bytes().unwrap()).unwrap();
        assert!(on_disk.files.is_empty());
    }

    #[tokio::test]
    async fn test_reload_picks_up_external_changes() {
        let io = Arc::new(MemorySnapshotIo::new());
        let store = store_with(io.clone()).await;
        store
            .add_file(NewFile::new("a.txt", "text/plain", "admin"))
            .await
            .unwrap();

        io.write_all(&Snapshot::default().encode().unwrap()).unwrap();
        store.reload().await.unwrap();

        assert!(store.get_metadata("a.txt").await.unwrap_err().is_not_found());
        assert_eq!(store.file_count().await, 0);
    }

    #[tokio::test]
    async fn test_remove_file_after_close_is_refused() {
        let store = empty_store().await;
        store
            .add_file(NewFile::new("a.txt", "text/plain", "admin"))
            .await
            .unwrap();
        store.deletion_queue().close().await;

        let pending = store.remove_file("a.txt").await.unwrap();
        assert!(pending.is_refused());
        assert!(matches!(
            pending.completion().await,
            Err(StoreError::ShuttingDown)
        ));
        assert!(store.get_metadata("a.txt").await.unwrap_err().is_not_found());
    }
}

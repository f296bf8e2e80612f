//! Per-file read-write locks.
//!
//! Each live file record has its own lock, kept in a side table keyed by path
//! rather than inside the serializable record. Downloads hold the read side;
//! the second phase of a delete holds the write side, so it only proceeds once
//! every download of that record has finished.
//!
//! # Lifecycle
//!
//! - A lock is **installed** whenever a record is added or replaced. Replacing
//!   installs a fresh lock, so downloads of the previous record keep their own.
//! - A lock is **detached** when its record is removed. The caller keeps the
//!   returned `Arc` and acquires the write side on it.
//! - Locks are never persisted. [`FileLockTable::reset`] brings the table in
//!   line with a freshly loaded snapshot: surviving paths keep their lock.
//!
//! # Ordering
//!
//! The table itself is only mutated while the store's structural write lock is
//! held. File locks are acquired after looking up the record, never the other
//! way around, and a read guard is never upgraded.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// The lock guarding one file record.
pub type RecordLock = Arc<RwLock<()>>;

/// Shared access to one file record, held for the duration of a download.
pub type RecordReadGuard = OwnedRwLockReadGuard<()>;

/// Exclusive access to one file record, held while its bytes are removed.
pub type RecordWriteGuard = OwnedRwLockWriteGuard<()>;

/// Side table of per-file locks, keyed by path.
#[derive(Debug, Default)]
pub struct FileLockTable {
    locks: DashMap<String, RecordLock>,
}

impl FileLockTable {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Install a fresh lock for `path`, replacing any previous one.
    ///
    /// Guards on the previous lock are unaffected.
    pub fn install(&self, path: &str) -> RecordLock {
        let lock = Arc::new(RwLock::new(()));
        self.locks.insert(path.to_string(), lock.clone());
        lock
    }

    /// The current lock for `path`, if the record is live.
    pub fn get(&self, path: &str) -> Option<RecordLock> {
        self.locks.get(path).map(|entry| entry.value().clone())
    }

    /// Remove the lock for `path` from the table and hand it to the caller.
    pub fn detach(&self, path: &str) -> Option<RecordLock> {
        self.locks.remove(path).map(|(_, lock)| lock)
    }

    /// Make the table hold exactly one lock per path in `paths`.
    ///
    /// Paths already present keep their lock, so guards held by downloads stay
    /// attached to the record. New paths get a fresh lock and paths not listed
    /// are dropped.
    pub fn reset<'a, I>(&self, paths: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let live: HashSet<&str> = paths.into_iter().collect();
        self.locks.retain(|path, _| live.contains(path.as_str()));
        for path in live {
            self.locks
                .entry(path.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(())));
        }
    }

    /// Acquire the read side of the current lock for `path`.
    ///
    /// Returns `None` if no record is live at `path`.
    pub async fn read(&self, path: &str) -> Option<RecordReadGuard> {
        let lock = self.get(path)?;
        Some(lock.read_owned().await)
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

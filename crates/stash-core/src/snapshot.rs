//! The durable snapshot: every user and file record, serialized as one unit.
//!
//! [`Snapshot`] is the in-memory document; [`SnapshotIo`] moves its encoded
//! bytes to and from durable storage. The encoding is JSON and carries no
//! schema version.

use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

/// A user account as persisted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    /// Base64 salt.
    pub salt: String,
    /// Base64 digest of the salted password.
    #[serde(rename = "password")]
    pub digest: String,
}

impl fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserRecord")
            .field("username", &self.username)
            .field("salt", &"[REDACTED]")
            .field("digest", &"[REDACTED]")
            .finish()
    }
}

/// Metadata of an uploaded file as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    #[serde(rename = "content-type")]
    pub content_type: String,
    pub uploader: String,
    /// Written as RFC 3339. Older snapshots may hold the legacy display form.
    #[serde(rename = "created", deserialize_with = "created_at::deserialize")]
    pub created_at: DateTime<Utc>,
}

mod created_at {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, de};

    /// Display layout used by earlier versions, e.g. `Jan 2, 2006 3:04 PM`.
    /// It carries no zone and is read as UTC.
    const LEGACY_FORMAT: &str = "%b %d, %Y %I:%M %p";

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid created time: {raw:?}")))
    }

    pub(super) fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
            return Some(at.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, LEGACY_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }
}

/// All records, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub users: Vec<UserRecord>,
    #[serde(default)]
    pub files: Vec<FileRecord>,
}

impl Snapshot {
    /// Encode the snapshot.
    ///
    /// Encoding plain strings and timestamps cannot fail; an error here would
    /// mean a broken serializer and is reported as a persistence failure.
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| StoreError::PersistFailure(io::Error::new(io::ErrorKind::InvalidData, e)))
    }

    /// Decode a snapshot, failing with [`StoreError::Corrupt`].
    pub fn decode(bytes: &[u8]) -> StoreResult<Self> {
        serde_json::from_slice(bytes).map_err(StoreError::Corrupt)
    }
}

/// Durable storage for encoded snapshot bytes.
///
/// A missing snapshot must be reported as [`io::ErrorKind::NotFound`] so the
/// store can bootstrap an empty one.
pub trait SnapshotIo: Send + Sync + fmt::Debug {
    /// Read the complete encoded snapshot.
    fn read_all(&self) -> io::Result<Vec<u8>>;

    /// Replace the stored snapshot with `bytes` as a single unit.
    fn write_all(&self, bytes: &[u8]) -> io::Result<()>;
}

/// Snapshot stored in a single file on disk.
///
/// Writes go to a temporary sibling and are renamed into place, so readers
/// never observe a partially written snapshot.
#[derive(Debug, Clone)]
pub struct FileSnapshotIo {
    path: PathBuf,
}

impl FileSnapshotIo {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }
}

impl SnapshotIo for FileSnapshotIo {
    fn read_all(&self) -> io::Result<Vec<u8>> {
        std::fs::read(&self.path)
    }

    fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        let dir = self.parent_dir();
        std::fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Snapshot kept in memory, for embedding and tests.
///
/// Starts empty (reads fail with `NotFound`) unless seeded. Writes can be made
/// to fail to exercise persistence error paths.
#[derive(Debug, Default)]
pub struct MemorySnapshotIo {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    bytes: Option<Vec<u8>>,
    fail_writes: bool,
    writes: usize,
}

impl MemorySnapshotIo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-existing snapshot bytes.
    pub fn with_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                bytes: Some(bytes.into()),
                ..MemoryState::default()
            }),
        }
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// The currently stored bytes, if any.
    pub fn bytes(&self) -> Option<Vec<u8>> {
        self.lock().bytes.clone()
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A poisoned lock only means a panicking test thread; the data is still usable.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl SnapshotIo for MemorySnapshotIo {
    fn read_all(&self) -> io::Result<Vec<u8>> {
        self.lock()
            .bytes
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no snapshot stored"))
    }

    fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.lock();
        if state.fail_writes {
            return Err(io::Error::other("snapshot writes disabled"));
        }
        state.bytes = Some(bytes.to_vec());
        state.writes += 1;
        Ok(())
    }
}

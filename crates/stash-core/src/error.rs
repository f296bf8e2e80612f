//! Error types for the record store.
//!
//! [`StoreError`] is the single failure type of every [`RecordStore`](crate::RecordStore)
//! operation. Collaborator errors live next to their collaborators and are
//! re-exported here so callers can match on the full chain from one place.

use std::fmt;
use std::io;
use thiserror::Error;

pub use crate::config::ConfigError;
pub use crate::credentials::CredentialError;
pub use crate::storage::StorageError;

/// Minimum accepted raw password length, in bytes.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Which kind of record a lookup was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    User,
    File,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::User => f.write_str("user"),
            RecordKind::File => f.write_str("file"),
        }
    }
}

/// Errors returned by record store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No user or file record exists under the given key.
    #[error("{kind} {key} not found")]
    NotFound { kind: RecordKind, key: String },

    /// A user with this name already exists.
    #[error("user {0} already exists")]
    AlreadyExists(String),

    /// The only remaining user cannot be removed.
    #[error("last user cannot be removed")]
    LastUserProtected,

    /// The raw password is shorter than [`MIN_PASSWORD_LEN`].
    #[error("password must be at least {min} characters in length")]
    PasswordTooShort { min: usize },

    /// The snapshot bytes could not be decoded.
    #[error("snapshot is corrupt: {0}")]
    Corrupt(#[source] serde_json::Error),

    /// The snapshot could not be written to durable storage.
    ///
    /// The in-memory change that triggered the write has already been applied.
    #[error("failed to persist snapshot: {0}")]
    PersistFailure(#[source] io::Error),

    /// The snapshot could not be read from durable storage.
    #[error("failed to read snapshot: {0}")]
    Unreadable(#[source] io::Error),

    /// The deletion pipeline no longer accepts entries.
    #[error("application is shutting down")]
    ShuttingDown,

    /// Salt generation or password hashing failed.
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

impl StoreError {
    pub(crate) fn user_not_found(username: &str) -> Self {
        StoreError::NotFound {
            kind: RecordKind::User,
            key: username.to_string(),
        }
    }

    pub(crate) fn file_not_found(path: &str) -> Self {
        StoreError::NotFound {
            kind: RecordKind::File,
            key: path.to_string(),
        }
    }

    /// Returns true for [`StoreError::NotFound`] of either kind.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Result type for record store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        assert_eq!(
            StoreError::user_not_found("alex").to_string(),
            "user alex not found"
        );
        assert_eq!(
            StoreError::file_not_found("a/b.txt").to_string(),
            "file a/b.txt not found"
        );
    }

    #[test]
    fn test_is_not_found() {
        assert!(StoreError::file_not_found("x").is_not_found());
        assert!(!StoreError::LastUserProtected.is_not_found());
        assert!(!StoreError::ShuttingDown.is_not_found());
    }

    #[test]
    fn test_password_too_short_mentions_minimum() {
        let e = StoreError::PasswordTooShort {
            min: MIN_PASSWORD_LEN,
        };
        assert!(e.to_string().contains('8'));
    }
}

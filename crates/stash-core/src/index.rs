//! Key → position lookup tables over a [`Snapshot`].
//!
//! The index is derived data: it is never persisted, it is rebuilt in full
//! whenever a snapshot is loaded, and every structural mutation keeps it in
//! step with the snapshot lists it points into.

use crate::snapshot::Snapshot;
use std::collections::{HashMap, HashSet};

/// Username → position in `Snapshot::users`, path → position in `Snapshot::files`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Index {
    users: HashMap<String, usize>,
    files: HashMap<String, usize>,
}

impl Index {
    /// Build an index covering every record of `snapshot`.
    ///
    /// Keys must be unique; see [`dedup_keys`].
    pub fn rebuild(snapshot: &Snapshot) -> Self {
        let users = snapshot
            .users
            .iter()
            .enumerate()
            .map(|(pos, u)| (u.username.clone(), pos))
            .collect();
        let files = snapshot
            .files
            .iter()
            .enumerate()
            .map(|(pos, f)| (f.path.clone(), pos))
            .collect();
        Self { users, files }
    }

    pub fn user(&self, username: &str) -> Option<usize> {
        self.users.get(username).copied()
    }

    pub fn file(&self, path: &str) -> Option<usize> {
        self.files.get(path).copied()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub(crate) fn insert_user(&mut self, username: String, pos: usize) {
        self.users.insert(username, pos);
    }

    pub(crate) fn insert_file(&mut self, path: String, pos: usize) {
        self.files.insert(path, pos);
    }

    /// Forget `username`; positions after it shift down by one to match
    /// `Vec::remove` on the snapshot list.
    pub(crate) fn remove_user(&mut self, username: &str) -> Option<usize> {
        let pos = self.users.remove(username)?;
        shift_down(&mut self.users, pos);
        Some(pos)
    }

    /// Forget `path`; positions after it shift down by one.
    pub(crate) fn remove_file(&mut self, path: &str) -> Option<usize> {
        let pos = self.files.remove(path)?;
        shift_down(&mut self.files, pos);
        Some(pos)
    }

    /// True if this index describes exactly the records of `snapshot`.
    pub fn matches(&self, snapshot: &Snapshot) -> bool {
        self.users.len() == snapshot.users.len()
            && self.files.len() == snapshot.files.len()
            && snapshot
                .users
                .iter()
                .enumerate()
                .all(|(pos, u)| self.user(&u.username) == Some(pos))
            && snapshot
                .files
                .iter()
                .enumerate()
                .all(|(pos, f)| self.file(&f.path) == Some(pos))
    }
}

fn shift_down(map: &mut HashMap<String, usize>, removed: usize) {
    for pos in map.values_mut() {
        if *pos > removed {
            *pos -= 1;
        }
    }
}

/// Drop all but the last record for each duplicated username or path.
///
/// Returns how many records were dropped. A snapshot written by this crate
/// never contains duplicates; hand-edited ones might.
pub fn dedup_keys(snapshot: &mut Snapshot) -> usize {
    let before = snapshot.users.len() + snapshot.files.len();
    keep_last(&mut snapshot.users, |u| u.username.clone());
    keep_last(&mut snapshot.files, |f| f.path.clone());
    before - snapshot.users.len() - snapshot.files.len()
}

fn keep_last<T, F>(records: &mut Vec<T>, key: F)
where
    F: Fn(&T) -> String,
{
    let mut seen = HashSet::new();
    let mut keep: Vec<bool> = records.iter().rev().map(|r| seen.insert(key(r))).collect();
    keep.reverse();
    let mut flags = keep.into_iter();
    records.retain(|_| flags.next().unwrap_or(true));
}

//! Reconciliation: compare hashes on disk with the metadata store and decide,
//! per file, whether its indexed representation must be inserted, updated or
//! left alone.
//!
//! Files that are recorded in the store but no longer on disk get no decision;
//! removals are not propagated.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::db::{FileRecord, MetadataStore};
use crate::error::Result;

/// What to do with one candidate file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Recorded hash matches: no chunking, no index work.
    Skip,
    /// Path not recorded yet.
    Insert,
    /// Path recorded with a different hash.
    Update,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Skip => "skip",
            Action::Insert => "insert",
            Action::Update => "update",
        };
        f.write_str(s)
    }
}

/// Reconciler output for one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub path: PathBuf,
    pub content_hash: String,
    pub action: Action,
    /// Id of the existing record, for `Skip` and `Update`.
    pub file_id: Option<i64>,
}

impl Decision {
    /// Key under which this path is recorded in the metadata store
    pub fn key(&self) -> String {
        path_key(&self.path)
    }
}

/// Paths are recorded exactly as walked, rendered as a string.
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Load every file record keyed by path
pub fn known_files(store: &MetadataStore) -> Result<HashMap<String, FileRecord>> {
    Ok(store
        .list_files()?
        .into_iter()
        .map(|record| (record.path.clone(), record))
        .collect())
}

/// Decide an action for each candidate `(path, hash)`.
///
/// - not in `known` → `Insert`
/// - in `known` with another hash → `Update`
/// - in `known` with the same hash → `Skip`
///
/// Output follows input order. A path listed more than once yields a single
/// decision at the position of its first occurrence, computed from the hash of
/// its last occurrence.
pub fn decide(
    candidates: &[(PathBuf, String)],
    known: &HashMap<String, FileRecord>,
) -> Vec<Decision> {
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut decisions: Vec<Decision> = Vec::with_capacity(candidates.len());

    for (path, hash) in candidates {
        let key = path_key(path);
        let record = known.get(&key);

        let action = match record {
            None => Action::Insert,
            Some(stored) if stored.content_hash != *hash => Action::Update,
            Some(_) => Action::Skip,
        };
        let decision = Decision {
            path: path.clone(),
            content_hash: hash.clone(),
            action,
            file_id: record.map(|r| r.id),
        };

        match position.get(&key) {
            Some(&idx) => decisions[idx] = decision,
            None => {
                position.insert(key, decisions.len());
                decisions.push(decision);
            }
        }
    }

    decisions
}

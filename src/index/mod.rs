//! Content index abstraction.
//!
//! The [`ContentIndex`] trait is the only surface the ingestion pipeline and
//! the question-answering flow see. Entries are addressed by chunk id (the
//! SHA256 of the chunk text) and carry a small string metadata map; the
//! pipeline tags every entry with its `source` path.
//!
//! | Implementation | Purpose |
//! |----------------|---------|
//! | [`SqliteContentIndex`] | persistent, FTS5/BM25 ranked |
//! | [`InMemoryContentIndex`] | tests and throwaway runs |

pub mod memory;
pub mod sqlite;

use std::collections::BTreeMap;

use crate::error::{PkbError, Result};

pub use memory::InMemoryContentIndex;
pub use sqlite::SqliteContentIndex;

/// Per-entry metadata (e.g. `{"source": "notes/a.md"}`)
pub type Metadata = BTreeMap<String, String>;

/// Metadata key holding the path of the file an entry was derived from
pub const SOURCE_KEY: &str = "source";

/// A ranked entry returned by [`ContentIndex::similarity_search`]
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDocument {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    /// Relevance in 0.0-1.0, higher is better
    pub score: f32,
}

impl IndexedDocument {
    pub fn source(&self) -> Option<&str> {
        self.metadata.get(SOURCE_KEY).map(String::as_str)
    }
}

/// Searchable store of chunk texts keyed by id.
pub trait ContentIndex: Send {
    /// Store `texts[i]` under `ids[i]` with `metadatas[i]`, replacing any
    /// entry with the same id. Returns the stored ids in input order.
    fn add(&self, texts: &[String], ids: &[String], metadatas: &[Metadata]) -> Result<Vec<String>>;

    /// Remove entries by id. Unknown ids are ignored.
    fn delete(&self, ids: &[String]) -> Result<()>;

    /// Up to `k` entries ranked by relevance to `query`, best first.
    fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<IndexedDocument>>;
}

/// Metadata map tagging an entry with its source path
pub fn source_metadata(source: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(SOURCE_KEY.to_string(), source.to_string());
    metadata
}

/// Reject `add` calls whose parallel slices disagree in length
fn check_add_lengths(texts: &[String], ids: &[String], metadatas: &[Metadata]) -> Result<()> {
    if texts.len() != ids.len() || texts.len() != metadatas.len() {
        return Err(PkbError::InvalidInput(format!(
            "add() expects equal lengths, got {} texts, {} ids, {} metadatas",
            texts.len(),
            ids.len(),
            metadatas.len()
        )));
    }
    Ok(())
}

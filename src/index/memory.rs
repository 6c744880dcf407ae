//! In-memory [`ContentIndex`] for tests and throwaway runs.
//!
//! Entries sit in a `BTreeMap` behind a `RwLock`. Search scores an entry by
//! the fraction of distinct query terms it contains.

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use super::{check_add_lengths, ContentIndex, IndexedDocument, Metadata};
use crate::error::{PkbError, Result};

#[derive(Debug, Clone)]
struct StoredEntry {
    text: String,
    metadata: Metadata,
}

#[derive(Debug, Default)]
pub struct InMemoryContentIndex {
    entries: RwLock<BTreeMap<String, StoredEntry>>,
}

fn poisoned<T>(_: T) -> PkbError {
    PkbError::Index("in-memory index lock poisoned".to_string())
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

impl InMemoryContentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stored ids, sorted
    pub fn ids(&self) -> Vec<String> {
        self.entries
            .read()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries
            .read()
            .map(|e| e.contains_key(id))
            .unwrap_or(false)
    }

    pub fn get(&self, id: &str) -> Option<IndexedDocument> {
        let entries = self.entries.read().ok()?;
        entries.get(id).map(|entry| IndexedDocument {
            id: id.to_string(),
            text: entry.text.clone(),
            metadata: entry.metadata.clone(),
            score: 1.0,
        })
    }
}

impl ContentIndex for InMemoryContentIndex {
    fn add(&self, texts: &[String], ids: &[String], metadatas: &[Metadata]) -> Result<Vec<String>> {
        check_add_lengths(texts, ids, metadatas)?;
        let mut entries = self.entries.write().map_err(poisoned)?;
        for ((text, id), metadata) in texts.iter().zip(ids).zip(metadatas) {
            entries.insert(
                id.clone(),
                StoredEntry {
                    text: text.clone(),
                    metadata: metadata.clone(),
                },
            );
        }
        Ok(ids.to_vec())
    }

    fn delete(&self, ids: &[String]) -> Result<()> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        for id in ids {
            entries.remove(id);
        }
        Ok(())
    }

    fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<IndexedDocument>> {
        let query_terms = terms(query);
        if query_terms.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let entries = self.entries.read().map_err(poisoned)?;
        let mut scored: Vec<IndexedDocument> = entries
            .iter()
            .filter_map(|(id, entry)| {
                let entry_terms = terms(&entry.text);
                let hits = query_terms.intersection(&entry_terms).count();
                if hits == 0 {
                    return None;
                }
                Some(IndexedDocument {
                    id: id.clone(),
                    text: entry.text.clone(),
                    metadata: entry.metadata.clone(),
                    score: hits as f32 / query_terms.len() as f32,
                })
            })
            .collect();

        // BTreeMap iteration already orders ties by id; the sort is stable
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

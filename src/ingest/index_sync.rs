use std::collections::HashSet;

use super::chunker::Splitter;
use super::hasher::{hash_bytes, hash_str};
use super::reconcile::{Action, Decision};
use crate::db::MetadataStore;
use crate::error::{PkbError, Result};
use crate::index::{source_metadata, ContentIndex};

/// Chunk ids the file owned before an update that neither the new content
/// nor any other file still uses. These are removed from the index.
pub fn retired_chunk_ids(store: &MetadataStore, decision: &Decision) -> Result<Vec<String>> {
    let (Action::Update, Some(file_id)) = (decision.action, decision.file_id) else {
        return Ok(Vec::new());
    };

    let previous: Vec<String> = store
        .list_chunks(file_id)?
        .into_iter()
        .map(|chunk| chunk.id)
        .collect();
    let shared = store.chunk_ids_referenced_elsewhere(file_id, &previous)?;

    Ok(previous
        .into_iter()
        .filter(|id| !shared.contains(id))
        .collect())
}

/// Bring the content index in line with one INSERT/UPDATE decision.
///
/// Reads the file, splits it, and replaces its entries in the index: the ids
/// to be written are cleared and re-added tagged with the file's path, and
/// only after the add succeeded are `retired_ids` deleted. Whitespace-only
/// files produce no chunks.
///
/// Returns the chunk ids the metadata store must record. Nothing is written
/// to the index if the file cannot be read or no longer matches
/// `decision.content_hash`.
pub fn apply(
    index: &dyn ContentIndex,
    splitter: &dyn Splitter,
    decision: &Decision,
    retired_ids: &[String],
) -> Result<Vec<String>> {
    if decision.action == Action::Skip {
        return Err(PkbError::InvalidInput(format!(
            "index sync called for unchanged file {}",
            decision.path.display()
        )));
    }

    let bytes = std::fs::read(&decision.path).map_err(|source| PkbError::Read {
        path: decision.path.clone(),
        source,
    })?;
    if hash_bytes(&bytes) != decision.content_hash {
        return Err(PkbError::ChangedDuringIngest(decision.path.clone()));
    }
    let document = String::from_utf8(bytes).map_err(|e| PkbError::Read {
        path: decision.path.clone(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })?;

    let (texts, ids) = if document.trim().is_empty() {
        log::warn!("File {} is empty, nothing to index.", decision.path.display());
        (Vec::new(), Vec::new())
    } else {
        let mut seen = HashSet::new();
        let mut texts = Vec::new();
        let mut ids = Vec::new();
        for chunk in splitter.split(&document) {
            let id = hash_str(&chunk);
            if seen.insert(id.clone()) {
                texts.push(chunk);
                ids.push(id);
            }
        }
        log::info!("File {} has been split into {} chunks.", decision.path.display(), ids.len());
        (texts, ids)
    };

    if !ids.is_empty() {
        // Clear the ids about to be written so re-adding seen content never duplicates
        index.delete(&ids)?;

        let source = decision.key();
        let metadatas = vec![source_metadata(&source); ids.len()];
        let stored = index.add(&texts, &ids, &metadatas)?;
        if stored.len() != ids.len() {
            return Err(PkbError::Index(format!(
                "index stored {} of {} chunks for {}",
                stored.len(),
                ids.len(),
                source
            )));
        }
        log::info!("File {} has been ingested into the content index.", decision.path.display());
    }

    // Retired entries stay until the add succeeded: the metadata store still
    // records them if it did not.
    let retired: Vec<String> = retired_ids
        .iter()
        .filter(|id| !ids.contains(id))
        .cloned()
        .collect();
    if !retired.is_empty() {
        index.delete(&retired)?;
        log::debug!("Deleted {} retired entr(ies) for {}", retired.len(), decision.path.display());
    }

    Ok(ids)
}

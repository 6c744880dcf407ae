//! End-to-end ingestion: walk → hash → reconcile → sync index → commit.
//!
//! Files are processed one at a time. For each INSERT/UPDATE decision the
//! content index is brought up to date first and the metadata store is only
//! written once that succeeded, so a file whose sync failed stays unrecorded
//! (or keeps its old hash) and is picked up again by the next run.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

use super::chunker::Splitter;
use super::hasher::compute_file_hash;
use super::index_sync::{apply, retired_chunk_ids};
use super::reconcile::{decide, known_files, path_key, Action, Decision};
use super::walker::{walk, WalkOptions};
use crate::db::MetadataStore;
use crate::error::{PkbError, Result};
use crate::index::ContentIndex;

/// A file that could not be ingested in this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Per-run ingestion statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Distinct candidate files found by the walker
    pub discovered: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    /// Chunk entries written to the content index
    pub chunks_indexed: usize,
    pub failures: Vec<FileFailure>,
}

impl IngestReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    fn record_failure(&mut self, path: PathBuf, error: &PkbError) {
        log::error!("✗ {}: {}", path.display(), error);
        self.failures.push(FileFailure {
            path,
            error: error.to_string(),
        });
    }

    /// Log the run summary
    pub fn log_summary(&self) {
        log::info!("=== Ingestion Complete ===");
        log::info!("Files discovered: {}", self.discovered);
        log::info!("  New: {}", self.inserted);
        log::info!("  Modified: {}", self.updated);
        log::info!("  Unchanged (skipped): {}", self.skipped);
        log::info!("  Failed: {}", self.failed());
        log::info!("Chunks indexed: {}", self.chunks_indexed);
        if !self.failures.is_empty() {
            log::warn!("Some files failed to ingest. Check logs above for details.");
        }
    }
}

/// Ingest every supported file under `inputs`.
///
/// Per-file problems (see [`PkbError::is_per_file`]: unreadable file, content
/// changed mid-run, index or commit failure) are collected in
/// [`IngestReport::failures`] and do not stop the batch. Any other error, and
/// failing to load the known files, aborts the run. Returns
/// [`PkbError::AllFilesFailed`] when files were discovered and none of them
/// made it.
pub fn ingest_files(
    store: &mut MetadataStore,
    index: &dyn ContentIndex,
    splitter: &dyn Splitter,
    options: &WalkOptions,
    inputs: &[PathBuf],
) -> Result<IngestReport> {
    let start = Instant::now();
    let mut report = IngestReport::default();

    let files = walk(inputs, options);
    let mut distinct = HashSet::new();
    report.discovered = files.iter().filter(|f| distinct.insert(path_key(f))).count();
    log::info!("Found {} file(s) to consider", report.discovered);

    let mut candidates = Vec::with_capacity(files.len());
    let mut unreadable = HashSet::new();
    for path in files {
        match compute_file_hash(&path) {
            Ok(hash) => candidates.push((path, hash)),
            Err(e) if e.is_per_file() => {
                if unreadable.insert(path_key(&path)) {
                    report.record_failure(path, &e);
                }
            }
            Err(e) => return Err(e),
        }
    }

    let known = known_files(store)?;
    let decisions = decide(&candidates, &known);
    let pending = decisions.iter().filter(|d| d.action != Action::Skip).count();
    log::info!(
        "Classification: new={}, modified={}, unchanged (skip)={}",
        decisions.iter().filter(|d| d.action == Action::Insert).count(),
        decisions.iter().filter(|d| d.action == Action::Update).count(),
        decisions.len() - pending,
    );

    let mut processed = 0;
    for decision in &decisions {
        if decision.action == Action::Skip {
            report.skipped += 1;
            continue;
        }
        processed += 1;
        log::info!(
            "[{}/{}] {}: {}",
            processed,
            pending,
            decision.action,
            decision.path.display()
        );

        match sync_and_commit(store, index, splitter, decision) {
            Ok(chunk_count) => {
                report.chunks_indexed += chunk_count;
                match decision.action {
                    Action::Insert => report.inserted += 1,
                    Action::Update => report.updated += 1,
                    Action::Skip => {}
                }
                log::info!("✓ {} ({} chunks)", decision.path.display(), chunk_count);
            }
            Err(e) if e.is_per_file() => report.record_failure(decision.path.clone(), &e),
            Err(e) => {
                log::error!("Aborting ingestion at {}: {}", decision.path.display(), e);
                return Err(e);
            }
        }
    }

    log::info!("Time: {:?}", start.elapsed());
    if report.discovered > 0 && report.failed() >= report.discovered {
        return Err(PkbError::AllFilesFailed {
            failed: report.failed(),
        });
    }
    Ok(report)
}

/// One file's unit of work. The store is written only after the index sync
/// succeeded.
fn sync_and_commit(
    store: &mut MetadataStore,
    index: &dyn ContentIndex,
    splitter: &dyn Splitter,
    decision: &Decision,
) -> Result<usize> {
    let retired = retired_chunk_ids(store, decision)?;
    let chunk_ids = apply(index, splitter, decision, &retired)?;
    store.upsert_file(&decision.key(), &decision.content_hash, &chunk_ids)?;
    Ok(chunk_ids.len())
}

/// Run [`ingest_files`] and close the store on the way out, whatever the
/// outcome.
pub fn run_ingestion(
    mut store: MetadataStore,
    index: &dyn ContentIndex,
    splitter: &dyn Splitter,
    options: &WalkOptions,
    inputs: &[PathBuf],
) -> Result<IngestReport> {
    let outcome = ingest_files(&mut store, index, splitter, options, inputs);
    let closed = store.close();
    let report = outcome?;
    closed?;
    Ok(report)
}

/// Forget everything: remove every recorded chunk from the index, then drop
/// and recreate the metadata tables.
pub fn reset(store: &mut MetadataStore, index: &dyn ContentIndex) -> Result<()> {
    let ids = store.all_chunk_ids()?;
    if !ids.is_empty() {
        index.delete(&ids)?;
        log::info!("Removed {} chunk(s) from the content index", ids.len());
    }
    store.drop_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexedDocument, InMemoryContentIndex, Metadata};
    use crate::ingest::chunker::CharacterSplitter;
    use crate::ingest::hasher::{hash_bytes, hash_str};
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    /// Delegates to an in-memory index but can be told to reject writes
    #[derive(Default)]
    struct FlakyIndex {
        inner: InMemoryContentIndex,
        fail_adds: AtomicBool,
        misconfigured: AtomicBool,
    }

    impl ContentIndex for FlakyIndex {
        fn add(&self, texts: &[String], ids: &[String], metadatas: &[Metadata]) -> Result<Vec<String>> {
            if self.misconfigured.load(Ordering::SeqCst) {
                return Err(PkbError::Config("index backend not configured".to_string()));
            }
            if self.fail_adds.load(Ordering::SeqCst) {
                return Err(PkbError::Index("index unavailable".to_string()));
            }
            self.inner.add(texts, ids, metadatas)
        }

        fn delete(&self, ids: &[String]) -> Result<()> {
            self.inner.delete(ids)
        }

        fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<IndexedDocument>> {
            self.inner.similarity_search(query, k)
        }
    }

    const NOT_UTF8: &[u8] = &[0x66, 0x6f, 0xff, 0xfe, 0x6f];

    fn options() -> WalkOptions {
        WalkOptions::new([".git", "node_modules"], ["txt", "md"])
    }

    fn by_line(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).filter(|l| !l.is_empty()).collect()
    }

    fn ingest(
        store: &mut MetadataStore,
        index: &dyn ContentIndex,
        root: &Path,
    ) -> Result<IngestReport> {
        ingest_files(store, index, &CharacterSplitter::default(), &options(), &[root.to_path_buf()])
    }

    fn key(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    fn chunk_ids(store: &MetadataStore, path: &Path) -> Vec<String> {
        let record = store.find_file(&key(path)).unwrap().unwrap();
        store
            .list_chunks(record.id)
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect()
    }

    #[test]
    fn test_first_ingestion_records_hash_and_chunks() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.txt");
        fs::write(&path, "hello world").unwrap();
        let mut store = MetadataStore::open_in_memory().unwrap();
        let index = InMemoryContentIndex::new();

        let report = ingest(&mut store, &index, temp_dir.path()).unwrap();

        assert_eq!(report.discovered, 1);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.chunks_indexed, 1);
        let record = store.find_file(&key(&path)).unwrap().unwrap();
        assert_eq!(
            record.content_hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        let ids = chunk_ids(&store, &path);
        assert_eq!(ids, vec![hash_str("hello world")]);
        assert!(index.contains(&ids[0]));
    }

    #[test]
    fn test_rerun_over_unchanged_files_is_all_skip() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), "hello world").unwrap();
        fs::write(temp_dir.path().join("b.md"), "# notes\nsome text").unwrap();
        let mut store = MetadataStore::open_in_memory().unwrap();
        let index = InMemoryContentIndex::new();

        ingest(&mut store, &index, temp_dir.path()).unwrap();
        let files_before = store.list_files().unwrap();
        let chunks_before: Vec<_> = files_before
            .iter()
            .map(|f| store.list_chunks(f.id).unwrap())
            .collect();
        let ids_before = index.ids();

        let report = ingest(&mut store, &index, temp_dir.path()).unwrap();
        assert_eq!(report.skipped, 2);
        assert_eq!(report.inserted + report.updated, 0);
        assert_eq!(report.chunks_indexed, 0);

        let files_after = store.list_files().unwrap();
        let chunks_after: Vec<_> = files_after
            .iter()
            .map(|f| store.list_chunks(f.id).unwrap())
            .collect();
        assert_eq!(files_after, files_before);
        assert_eq!(chunks_after, chunks_before);
        assert!(chunks_after.iter().all(|chunks| !chunks.is_empty()));
        assert_eq!(index.ids(), ids_before);
    }

    #[test]
    fn test_modified_file_replaces_chunks() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.txt");
        fs::write(&path, "hello world").unwrap();
        let mut store = MetadataStore::open_in_memory().unwrap();
        let index = InMemoryContentIndex::new();
        ingest(&mut store, &index, temp_dir.path()).unwrap();
        let file_id = store.find_file(&key(&path)).unwrap().unwrap().id;

        fs::write(&path, "hello mars").unwrap();
        let report = ingest(&mut store, &index, temp_dir.path()).unwrap();

        assert_eq!(report.updated, 1);
        let record = store.find_file(&key(&path)).unwrap().unwrap();
        assert_eq!(record.id, file_id);
        assert_eq!(record.content_hash, hash_bytes(b"hello mars"));
        assert_eq!(chunk_ids(&store, &path), vec![hash_str("hello mars")]);
        assert!(!index.contains(&hash_str("hello world")));
        assert!(index.contains(&hash_str("hello mars")));
        assert_eq!(store.list_files().unwrap().len(), 1);
    }

    #[test]
    fn test_ignored_directories_are_not_ingested() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join(".git")).unwrap();
        fs::write(temp_dir.path().join(".git").join("config.txt"), "[core]").unwrap();
        fs::write(temp_dir.path().join("keep.txt"), "kept").unwrap();
        let mut store = MetadataStore::open_in_memory().unwrap();
        let index = InMemoryContentIndex::new();

        let report = ingest(&mut store, &index, temp_dir.path()).unwrap();
        assert_eq!(report.discovered, 1);
        let paths: Vec<String> = store.list_files().unwrap().into_iter().map(|f| f.path).collect();
        assert_eq!(paths, vec![key(&temp_dir.path().join("keep.txt"))]);
    }

    #[test]
    fn test_reset_then_ingest_starts_from_scratch() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), "alpha").unwrap();
        fs::write(temp_dir.path().join("b.txt"), "beta").unwrap();
        let mut store = MetadataStore::open_in_memory().unwrap();
        let index = InMemoryContentIndex::new();
        ingest(&mut store, &index, temp_dir.path()).unwrap();
        fs::remove_file(temp_dir.path().join("a.txt")).unwrap();

        reset(&mut store, &index).unwrap();
        assert!(store.list_files().unwrap().is_empty());
        assert!(store.all_chunk_ids().unwrap().is_empty());
        assert!(index.is_empty());

        let report = ingest(&mut store, &index, temp_dir.path()).unwrap();
        assert_eq!(report.inserted, 1);
        let files = store.list_files().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].id, 1);
        assert_eq!(index.ids(), vec![hash_str("beta")]);
    }

    #[test]
    fn test_undecodable_file_does_not_abort_batch() {
        let temp_dir = TempDir::new().unwrap();
        let good = temp_dir.path().join("good.txt");
        let bad = temp_dir.path().join("bad.txt");
        fs::write(&good, "fine").unwrap();
        fs::write(&bad, NOT_UTF8).unwrap();
        let mut store = MetadataStore::open_in_memory().unwrap();
        let index = InMemoryContentIndex::new();

        let report = ingest(&mut store, &index, temp_dir.path()).unwrap();

        assert_eq!(report.discovered, 2);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, bad);
        assert!(store.find_file(&key(&bad)).unwrap().is_none());
        assert!(store.find_file(&key(&good)).unwrap().is_some());
    }

    #[test]
    fn test_index_failure_leaves_store_untouched_and_retries() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.txt");
        fs::write(&path, "one").unwrap();
        let mut store = MetadataStore::open_in_memory().unwrap();
        let index = FlakyIndex::default();
        ingest(&mut store, &index, temp_dir.path()).unwrap();
        let before = store.find_file(&key(&path)).unwrap().unwrap();

        fs::write(&path, "two").unwrap();
        index.fail_adds.store(true, Ordering::SeqCst);
        let err = ingest(&mut store, &index, temp_dir.path()).unwrap_err();
        assert!(matches!(err, PkbError::AllFilesFailed { failed: 1 }));
        assert_eq!(store.find_file(&key(&path)).unwrap().unwrap(), before);
        assert_eq!(chunk_ids(&store, &path), vec![hash_str("one")]);
        assert!(index.inner.contains(&hash_str("one")));

        index.fail_adds.store(false, Ordering::SeqCst);
        let report = ingest(&mut store, &index, temp_dir.path()).unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(chunk_ids(&store, &path), vec![hash_str("two")]);
        assert_eq!(index.inner.ids(), vec![hash_str("two")]);
    }

    #[test]
    fn test_failed_update_then_revert_keeps_recorded_chunks_indexed() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.txt");
        fs::write(&path, "version one").unwrap();
        let mut store = MetadataStore::open_in_memory().unwrap();
        let index = FlakyIndex::default();
        ingest(&mut store, &index, temp_dir.path()).unwrap();

        fs::write(&path, "version two").unwrap();
        index.fail_adds.store(true, Ordering::SeqCst);
        assert!(ingest(&mut store, &index, temp_dir.path()).is_err());
        index.fail_adds.store(false, Ordering::SeqCst);

        fs::write(&path, "version one").unwrap();
        let report = ingest(&mut store, &index, temp_dir.path()).unwrap();

        assert_eq!(report.skipped, 1);
        let recorded = chunk_ids(&store, &path);
        assert_eq!(recorded, vec![hash_str("version one")]);
        assert!(recorded.iter().all(|id| index.inner.contains(id)));
    }

    #[test]
    fn test_non_per_file_error_aborts_batch() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), "first").unwrap();
        fs::write(temp_dir.path().join("b.txt"), "second").unwrap();
        let mut store = MetadataStore::open_in_memory().unwrap();
        let index = FlakyIndex::default();
        index.misconfigured.store(true, Ordering::SeqCst);

        let err = ingest(&mut store, &index, temp_dir.path()).unwrap_err();

        assert!(matches!(err, PkbError::Config(_)));
        assert!(store.list_files().unwrap().is_empty());
        assert!(index.inner.is_empty());
    }

    #[test]
    fn test_empty_file_is_recorded_and_then_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty.txt");
        fs::write(&path, "").unwrap();
        let mut store = MetadataStore::open_in_memory().unwrap();
        let index = InMemoryContentIndex::new();

        let report = ingest(&mut store, &index, temp_dir.path()).unwrap();
        assert_eq!(report.inserted, 1);
        assert!(chunk_ids(&store, &path).is_empty());
        assert!(index.is_empty());

        let report = ingest(&mut store, &index, temp_dir.path()).unwrap();
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn test_shared_chunk_survives_update_of_one_file() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("a.txt");
        let b = temp_dir.path().join("b.txt");
        fs::write(&a, "shared\nonly a").unwrap();
        fs::write(&b, "shared\nonly b").unwrap();
        let mut store = MetadataStore::open_in_memory().unwrap();
        let index = InMemoryContentIndex::new();
        let inputs = [temp_dir.path().to_path_buf()];
        ingest_files(&mut store, &index, &by_line, &options(), &inputs).unwrap();

        fs::write(&a, "rewritten").unwrap();
        ingest_files(&mut store, &index, &by_line, &options(), &inputs).unwrap();

        assert!(index.contains(&hash_str("shared")));
        assert!(index.contains(&hash_str("only b")));
        assert!(index.contains(&hash_str("rewritten")));
        assert!(!index.contains(&hash_str("only a")));
        assert_eq!(chunk_ids(&store, &a), vec![hash_str("rewritten")]);
    }

    #[test]
    fn test_all_failed_is_an_error_but_nothing_found_is_not() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = MetadataStore::open_in_memory().unwrap();
        let index = InMemoryContentIndex::new();

        let report = ingest(&mut store, &index, temp_dir.path()).unwrap();
        assert_eq!(report, IngestReport::default());

        fs::write(temp_dir.path().join("a.txt"), NOT_UTF8).unwrap();
        fs::write(temp_dir.path().join("b.txt"), NOT_UTF8).unwrap();
        let err = ingest(&mut store, &index, temp_dir.path()).unwrap_err();
        assert!(matches!(err, PkbError::AllFilesFailed { failed: 2 }));
        assert!(store.list_files().unwrap().is_empty());
    }

    #[test]
    fn test_run_ingestion_persists_and_closes() {
        let temp_dir = TempDir::new().unwrap();
        let docs = temp_dir.path().join("docs");
        fs::create_dir(&docs).unwrap();
        fs::write(docs.join("a.txt"), "persisted").unwrap();
        let db_path = temp_dir.path().join("cache").join("filecache.db");
        let index = InMemoryContentIndex::new();

        let store = MetadataStore::open(&db_path).unwrap();
        let report =
            run_ingestion(store, &index, &by_line, &options(), &[docs.clone()]).unwrap();
        assert_eq!(report.inserted, 1);

        let store = MetadataStore::open(&db_path).unwrap();
        assert_eq!(store.list_files().unwrap().len(), 1);
        let report = run_ingestion(store, &index, &by_line, &options(), &[docs]).unwrap();
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn test_run_ingestion_closes_store_on_failure() {
        let temp_dir = TempDir::new().unwrap();
        let bad = temp_dir.path().join("bad.txt");
        fs::write(&bad, NOT_UTF8).unwrap();
        let db_path = temp_dir.path().join("filecache.db");
        let store = MetadataStore::open(&db_path).unwrap();

        let err = run_ingestion(
            store,
            &InMemoryContentIndex::new(),
            &by_line,
            &options(),
            &[bad],
        )
        .unwrap_err();
        assert!(matches!(err, PkbError::AllFilesFailed { .. }));

        // The connection was released, so the database opens cleanly again
        let store = MetadataStore::open(&db_path).unwrap();
        assert!(store.list_files().unwrap().is_empty());
    }
}

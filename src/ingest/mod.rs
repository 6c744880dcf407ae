pub mod hasher;
pub mod walker;
pub mod chunker;
pub mod reconcile;
pub mod index_sync;
pub mod pipeline;

pub use hasher::{compute_file_hash, hash_bytes, hash_str};
pub use walker::{walk, WalkOptions};
pub use chunker::{CharacterSplitter, Splitter};
pub use reconcile::{decide, known_files, Action, Decision};
pub use index_sync::{apply, retired_chunk_ids};
pub use pipeline::{ingest_files, reset, run_ingestion, FileFailure, IngestReport};

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for PKB
#[derive(Error, Debug)]
pub enum PkbError {
    /// Directory traversal failures (unreadable entry, permission denied)
    #[error("Walk error at {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A candidate file could not be read for hashing or splitting
    #[error("Read error for {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File content no longer matches the hash it was reconciled with
    #[error("File changed during ingestion: {0}")]
    ChangedDuringIngest(PathBuf),

    /// Metadata store errors
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Metadata store used after `close()`
    #[error("Store error: metadata store is closed")]
    StoreClosed,

    /// Content index add/delete/search failures
    #[error("Index error: {0}")]
    Index(String),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// LLM API errors
    #[error("LLM error: {0}")]
    Llm(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Every discovered file failed to ingest
    #[error("All {failed} file(s) failed to ingest")]
    AllFilesFailed { failed: usize },
}

impl PkbError {
    /// Errors that abort a single file without aborting the batch.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            PkbError::Read { .. }
                | PkbError::ChangedDuringIngest(_)
                | PkbError::Index(_)
                | PkbError::Store(_)
        )
    }
}

/// Convenient Result type using PkbError
pub type Result<T> = std::result::Result<T, PkbError>;

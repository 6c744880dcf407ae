use rusqlite::Connection;
use std::path::{Path, PathBuf};
use crate::error::{Result, PkbError};

pub mod migrate;
pub mod store;

pub use store::{ChunkRecord, FileRecord, MetadataStore};

/// Connection pragmas shared by every database this crate opens.
///
/// WAL mode with NORMAL sync, foreign keys for chunk -> file integrity,
/// in-memory temp store and a 64MB page cache.
const CONNECTION_PRAGMAS: &str = "PRAGMA journal_mode = WAL; \
     PRAGMA synchronous = NORMAL; \
     PRAGMA foreign_keys = ON; \
     PRAGMA temp_store = MEMORY; \
     PRAGMA cache_size = -65536; \
     PRAGMA wal_autocheckpoint = 1000;";

/// Open a database connection with the standard pragmas, creating the
/// parent directory when it does not exist yet.
pub fn open_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            log::info!("No database found, creating one at: {}", path.display());
            std::fs::create_dir_all(parent).map_err(PkbError::Io)?;
        }
    }

    let conn = Connection::open(path)?;
    conn.execute_batch(CONNECTION_PRAGMAS)?;
    Ok(conn)
}

/// Open an in-memory database (tests and throwaway runs)
pub fn open_in_memory_connection() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(conn)
}

/// Sidecar files SQLite keeps next to a WAL-mode database.
pub fn wal_sidecars(path: &Path) -> [PathBuf; 2] {
    let mut wal = path.as_os_str().to_owned();
    wal.push("-wal");
    let mut shm = path.as_os_str().to_owned();
    shm.push("-shm");
    [PathBuf::from(wal), PathBuf::from(shm)]
}

/// Delete a leftover write-ahead log (and its shared-memory index) from a
/// previous run. No replay is attempted. Returns true if anything was removed.
pub fn remove_stale_wal(path: &Path) -> Result<bool> {
    let mut removed = false;
    for sidecar in wal_sidecars(path) {
        if sidecar.exists() {
            log::warn!("Removing stale write-ahead log: {}", sidecar.display());
            std::fs::remove_file(&sidecar).map_err(PkbError::Io)?;
            removed = true;
        }
    }
    Ok(removed)
}

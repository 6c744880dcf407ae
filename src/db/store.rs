//! Metadata store: which chunk ids the content index holds for each file.
//!
//! The store is the source of truth for "what is currently indexed". Every
//! write goes through [`MetadataStore::upsert_file`], which replaces a file's
//! hash and its chunk set in one transaction so the two never disagree.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, Row};

use super::migrate::{self, Migration};
use crate::error::{PkbError, Result};

/// Schema for the `files` / `chunks` tables
pub const METADATA_MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "001_files_and_chunks",
    sql: include_str!("../../migrations/metadata/001_files_and_chunks.sql"),
}];

/// Last-known ingested state of one source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: i64,
    pub path: String,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

/// One chunk id associated with a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    pub id: String,
    pub file_id: i64,
    pub created_at: DateTime<Utc>,
}

/// SQLite-backed metadata store
pub struct MetadataStore {
    conn: Option<Connection>,
    path: Option<PathBuf>,
}

impl MetadataStore {
    /// Open (or create) the store at `path`.
    ///
    /// A write-ahead log left behind by a previous process is discarded before
    /// opening: the store is rebuilt incrementally from disk on every run.
    pub fn open(path: &Path) -> Result<Self> {
        if path.exists() {
            log::info!("Using existing database at: {}", path.display());
        }
        super::remove_stale_wal(path)?;

        let mut conn = super::open_connection(path)?;
        migrate::run_migrations(&mut conn, METADATA_MIGRATIONS)?;
        log::info!("Metadata store initialized");

        Ok(Self {
            conn: Some(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a throwaway in-memory store
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = super::open_in_memory_connection()?;
        migrate::run_migrations(&mut conn, METADATA_MIGRATIONS)?;
        Ok(Self { conn: Some(conn), path: None })
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(PkbError::StoreClosed)
    }

    fn conn_mut(&mut self) -> Result<&mut Connection> {
        self.conn.as_mut().ok_or(PkbError::StoreClosed)
    }

    /// Insert `path` or overwrite its hash, and replace its chunk set.
    ///
    /// Runs in a single transaction: if any step fails nothing is written and
    /// the previous record (hash and chunks) stays intact. Duplicate ids in
    /// `chunk_ids` are stored once. Returns the file id.
    pub fn upsert_file(
        &mut self,
        path: &str,
        content_hash: &str,
        chunk_ids: &[String],
    ) -> Result<i64> {
        let conn = self.conn_mut()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO files (path, content_hash) VALUES (?1, ?2)
            ON CONFLICT(path) DO UPDATE SET content_hash = excluded.content_hash
            "#,
            params![path, content_hash],
        )?;

        let file_id: i64 = tx.query_row(
            "SELECT id FROM files WHERE path = ?1",
            params![path],
            |row| row.get(0),
        )?;

        tx.execute("DELETE FROM chunks WHERE file_id = ?1", params![file_id])?;

        {
            let mut stmt = tx.prepare("INSERT INTO chunks (id, file_id) VALUES (?1, ?2)")?;
            let mut seen = HashSet::new();
            for chunk_id in chunk_ids {
                if seen.insert(chunk_id.as_str()) {
                    stmt.execute(params![chunk_id, file_id])?;
                }
            }
        }

        tx.commit()?;
        log::debug!("Recorded {} with {} chunk(s) (file id {})", path, chunk_ids.len(), file_id);
        Ok(file_id)
    }

    /// All file records, ordered by id
    pub fn list_files(&self) -> Result<Vec<FileRecord>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, path, content_hash, created_at FROM files ORDER BY id")?;
        let files = stmt
            .query_map([], file_from_row)?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
        Ok(files)
    }

    /// Record for a single path, if it has been ingested
    pub fn find_file(&self, path: &str) -> Result<Option<FileRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, path, content_hash, created_at FROM files WHERE path = ?1")?;
        let mut rows = stmt.query(params![path])?;
        match rows.next()? {
            Some(row) => Ok(Some(file_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Chunk records of one file, in insertion order
    pub fn list_chunks(&self, file_id: i64) -> Result<Vec<ChunkRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, file_id, created_at FROM chunks WHERE file_id = ?1 ORDER BY rowid",
        )?;
        let chunks = stmt
            .query_map(params![file_id], |row| {
                Ok(ChunkRecord {
                    id: row.get(0)?,
                    file_id: row.get(1)?,
                    created_at: timestamp_from_row(row, 2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
        Ok(chunks)
    }

    /// The subset of `ids` that some file other than `file_id` also owns.
    pub fn chunk_ids_referenced_elsewhere(
        &self,
        file_id: i64,
        ids: &[String],
    ) -> Result<HashSet<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT 1 FROM chunks WHERE id = ?1 AND file_id != ?2 LIMIT 1")?;
        let mut shared = HashSet::new();
        for id in ids {
            if stmt.exists(params![id, file_id])? {
                shared.insert(id.clone());
            }
        }
        Ok(shared)
    }

    /// Every distinct chunk id in the store
    pub fn all_chunk_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT DISTINCT id FROM chunks ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
        Ok(ids)
    }

    /// Drop both tables (resetting the file id sequence) and recreate them empty
    pub fn drop_all(&mut self) -> Result<()> {
        log::info!("Dropping existing database tables.");
        let conn = self.conn_mut()?;
        migrate::reset_schema(conn, &["chunks", "files"], METADATA_MIGRATIONS)
    }

    /// Whether `close()` has already run
    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    /// Release the connection. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| PkbError::Store(e))?;
            match &self.path {
                Some(path) => log::debug!("Closed metadata store {}", path.display()),
                None => log::debug!("Closed in-memory metadata store"),
            }
        }
        Ok(())
    }
}

impl Drop for MetadataStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Failed to close metadata store: {}", e);
        }
    }
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        path: row.get(1)?,
        content_hash: row.get(2)?,
        created_at: timestamp_from_row(row, 3)?,
    })
}

/// SQLite's CURRENT_TIMESTAMP is `YYYY-MM-DD HH:MM:SS` in UTC
fn timestamp_from_row(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

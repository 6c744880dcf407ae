use std::path::Path;

use rusqlite::{params, Connection};

use super::{check_add_lengths, ContentIndex, IndexedDocument, Metadata};
use crate::db::migrate::{self, Migration};
use crate::error::{PkbError, Result};

/// Schema for the `entries` table and its FTS5 mirror
pub const INDEX_MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "001_entries",
    sql: include_str!("../../migrations/index/001_entries.sql"),
}];

fn index_err(e: impl std::fmt::Display) -> PkbError {
    PkbError::Index(e.to_string())
}

/// Content index persisted in its own SQLite database.
///
/// Entries live in `entries`; FTS5 triggers keep `entries_fts` in sync, and
/// `similarity_search` ranks by BM25.
pub struct SqliteContentIndex {
    conn: Connection,
}

impl SqliteContentIndex {
    pub fn open(path: &Path) -> Result<Self> {
        let mut conn = crate::db::open_connection(path).map_err(index_err)?;
        migrate::run_migrations(&mut conn, INDEX_MIGRATIONS).map_err(index_err)?;
        log::info!("Content index ready at {}", path.display());
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut conn = crate::db::open_in_memory_connection().map_err(index_err)?;
        migrate::run_migrations(&mut conn, INDEX_MIGRATIONS).map_err(index_err)?;
        Ok(Self { conn })
    }

    /// Number of stored entries
    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))
            .map_err(index_err)?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// All stored ids, sorted
    pub fn ids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM entries ORDER BY id")
            .map_err(index_err)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(index_err)?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
            .map_err(index_err)?;
        Ok(ids)
    }

    /// Fetch one entry by id (score is reported as 1.0)
    pub fn get(&self, id: &str) -> Result<Option<IndexedDocument>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, text, metadata_json FROM entries WHERE id = ?1")
            .map_err(index_err)?;
        let mut rows = stmt.query(params![id]).map_err(index_err)?;
        match rows.next().map_err(index_err)? {
            Some(row) => {
                let metadata_json: String = row.get(2).map_err(index_err)?;
                Ok(Some(IndexedDocument {
                    id: row.get(0).map_err(index_err)?,
                    text: row.get(1).map_err(index_err)?,
                    metadata: parse_metadata(&metadata_json)?,
                    score: 1.0,
                }))
            }
            None => Ok(None),
        }
    }
}

fn parse_metadata(json: &str) -> Result<Metadata> {
    serde_json::from_str(json).map_err(|e| PkbError::Index(format!("Invalid metadata JSON: {}", e)))
}

impl ContentIndex for SqliteContentIndex {
    fn add(&self, texts: &[String], ids: &[String], metadatas: &[Metadata]) -> Result<Vec<String>> {
        check_add_lengths(texts, ids, metadatas)?;

        let tx = self.conn.unchecked_transaction().map_err(index_err)?;
        {
            let mut stmt = tx
                .prepare(
                    r#"
                    INSERT INTO entries (id, text, metadata_json) VALUES (?1, ?2, ?3)
                    ON CONFLICT(id) DO UPDATE SET
                        text = excluded.text,
                        metadata_json = excluded.metadata_json
                    "#,
                )
                .map_err(index_err)?;

            for ((text, id), metadata) in texts.iter().zip(ids).zip(metadatas) {
                let metadata_json = serde_json::to_string(metadata).map_err(index_err)?;
                stmt.execute(params![id, text, metadata_json]).map_err(index_err)?;
            }
        }
        tx.commit().map_err(index_err)?;

        log::debug!("Indexed {} entr(ies)", ids.len());
        Ok(ids.to_vec())
    }

    fn delete(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let tx = self.conn.unchecked_transaction().map_err(index_err)?;
        let mut removed = 0;
        {
            let mut stmt = tx
                .prepare("DELETE FROM entries WHERE id = ?1")
                .map_err(index_err)?;
            for id in ids {
                removed += stmt.execute(params![id]).map_err(index_err)?;
            }
        }
        tx.commit().map_err(index_err)?;

        log::debug!("Deleted {} of {} requested entr(ies)", removed, ids.len());
        Ok(())
    }

    fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<IndexedDocument>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let Some(match_expr) = sanitize_fts5_query(query) else {
            return Ok(Vec::new());
        };

        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT e.id, e.text, e.metadata_json, bm25(entries_fts) AS raw_score
                FROM entries_fts
                JOIN entries e ON e.rowid = entries_fts.rowid
                WHERE entries_fts MATCH ?1
                ORDER BY raw_score, e.id
                LIMIT ?2
                "#,
            )
            .map_err(index_err)?;

        let mut rows = stmt
            .query(params![match_expr, k as i64])
            .map_err(index_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().map_err(index_err)? {
            let metadata_json: String = row.get(2).map_err(index_err)?;
            let raw_score: f64 = row.get(3).map_err(index_err)?;
            results.push(IndexedDocument {
                id: row.get(0).map_err(index_err)?,
                text: row.get(1).map_err(index_err)?,
                metadata: parse_metadata(&metadata_json)?,
                score: normalize_bm25_score(raw_score),
            });
        }

        Ok(results)
    }
}

/// Build an FTS5 MATCH expression from free text.
///
/// Every term is double-quoted (so punctuation cannot break the query syntax)
/// and terms are OR-ed together for recall. Stop words and one-character
/// terms are dropped unless nothing else is left. Returns None when the query
/// has no usable terms.
pub fn sanitize_fts5_query(query: &str) -> Option<String> {
    const STOP_WORDS: &[&str] = &[
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with",
        "by", "from", "as", "is", "are", "was", "were", "be", "been", "being", "have",
        "has", "had", "do", "does", "did", "will", "would", "should", "could", "what",
        "which", "who", "where", "when", "why", "how", "this", "that", "these", "those",
    ];

    let terms: Vec<&str> = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .collect();

    let significant: Vec<&str> = terms
        .iter()
        .copied()
        .filter(|t| t.chars().count() >= 2 && !STOP_WORDS.contains(&t.to_lowercase().as_str()))
        .collect();

    let chosen = if significant.is_empty() { terms } else { significant };
    if chosen.is_empty() {
        return None;
    }

    Some(
        chosen
            .iter()
            .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

/// Map a BM25 score (negative, lower is better) into 0-1, higher is better.
pub fn normalize_bm25_score(raw_score: f64) -> f32 {
    if raw_score.is_nan() || raw_score.is_infinite() {
        return 0.0;
    }
    (1.0 / (1.0 + raw_score.exp())) as f32
}

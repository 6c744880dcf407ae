use rusqlite::{Connection, params};
use crate::error::Result;

/// A schema migration compiled into the binary
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

/// Create schema_migrations table if it doesn't exist
fn ensure_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get list of applied migrations
pub fn get_applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    ensure_migrations_table(conn)?;
    let mut stmt = conn.prepare("SELECT name FROM schema_migrations ORDER BY version")?;
    let names: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(names)
}

/// Run all pending migrations, each in its own transaction
pub fn run_migrations(conn: &mut Connection, migrations: &[Migration]) -> Result<()> {
    ensure_migrations_table(conn)?;

    let applied = get_applied_migrations(conn)?;
    let mut pending: Vec<&Migration> = migrations
        .iter()
        .filter(|m| !applied.iter().any(|name| name == m.name))
        .collect();
    pending.sort_by_key(|m| m.version);

    for migration in pending {
        log::debug!("Applying migration: {} (version {})", migration.name, migration.version);

        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![migration.version, migration.name],
        )?;
        tx.commit()?;

        log::info!("Migration {} applied successfully", migration.name);
    }

    Ok(())
}

/// Drop the given tables and forget every applied migration, then re-run
/// `migrations` so the schema is recreated empty.
pub fn reset_schema(
    conn: &mut Connection,
    tables: &[&str],
    migrations: &[Migration],
) -> Result<()> {
    ensure_migrations_table(conn)?;

    let tx = conn.transaction()?;
    for table in tables {
        tx.execute_batch(&format!("DROP TABLE IF EXISTS {};", table))?;
    }
    tx.execute("DELETE FROM schema_migrations", [])?;
    tx.commit()?;

    run_migrations(conn, migrations)
}

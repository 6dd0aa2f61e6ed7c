//! Database migrations.
//!
//! Migrations are run in order and tracked in the `migrations` table.

use crate::StorageResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> StorageResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;

    if current_version >= CURRENT_VERSION {
        return Ok(());
    }

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_logs(conn)?;
    }
    if current_version < 2 {
        migrate_v2_settings(conn)?;
    }

    info!("Migrations complete");
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: persisted log records.
///
/// `id` gives the insertion order used for FIFO batching and eviction.
/// `batch_id` is set while the row belongs to an in-flight batch.
fn migrate_v1_logs(conn: &Connection) -> StorageResult<()> {
    info!("Applying migration v1: logs table");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            log_id TEXT NOT NULL UNIQUE,
            storage_key TEXT NOT NULL,
            batch_id TEXT,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_logs_storage_key_id
            ON logs(storage_key, id);
        CREATE INDEX IF NOT EXISTS idx_logs_batch_id
            ON logs(batch_id) WHERE batch_id IS NOT NULL;
        ",
    )?;

    record_migration(conn, 1, "logs")
}

/// V2: process-wide keyed settings (persisted channel flags).
fn migrate_v2_settings(conn: &Connection) -> StorageResult<()> {
    info!("Applying migration v2: settings table");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;

    record_migration(conn, 2, "settings")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn test_migrations_run_successfully() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables = table_names(&conn);
        assert!(tables.contains(&"logs".to_string()));
        assert!(tables.contains(&"settings".to_string()));
        assert!(tables.contains(&"migrations".to_string()));
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let (version, rows): (i32, i64) = conn
            .query_row("SELECT MAX(version), COUNT(*) FROM migrations", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();

        assert_eq!(version, CURRENT_VERSION);
        assert_eq!(rows, CURRENT_VERSION as i64);
    }

    #[test]
    fn test_logs_table_columns() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let columns: Vec<String> = conn
            .prepare("PRAGMA table_info(logs)")
            .unwrap()
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        for expected in ["id", "log_id", "storage_key", "batch_id", "payload", "created_at"] {
            assert!(columns.contains(&expected.to_string()), "missing column {}", expected);
        }
    }
}

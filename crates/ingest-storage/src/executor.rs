//! Async SQLite executor using a dedicated background thread.
//!
//! Every store operation is sent to one thread that owns the connection:
//! - callers await results without blocking a runtime worker
//! - queries execute in FIFO order, so writes from different channels never
//!   interleave inside a transaction
//! - only SQL and row mapping run inside [`AsyncDatabase::call`]; record
//!   (de)serialization happens on the caller's side

use crate::{migrations, StorageError, StorageResult};
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

/// Convert a tokio_rusqlite::Error to StorageError.
fn from_tokio_rusqlite(e: tokio_rusqlite::Error) -> StorageError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => StorageError::Sqlite(e),
        tokio_rusqlite::Error::Close(_) => StorageError::Connection("Connection closed".to_string()),
        other => StorageError::Connection(other.to_string()),
    }
}

/// Async SQLite database with a dedicated executor thread.
#[derive(Clone)]
pub struct AsyncDatabase {
    conn: Connection,
    path: String,
}

impl AsyncDatabase {
    /// Open a database at the given path.
    ///
    /// Creates the file if needed, enables WAL with full fsync, caps the file
    /// at `max_size_bytes`, and runs pending migrations.
    pub async fn open(path: &Path, max_size_bytes: u64) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path.to_string_lossy().to_string();
        info!(path = %path_str, "Opening log database");

        let conn = Connection::open(path)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        Self::initialize(conn, path_str, max_size_bytes).await
    }

    /// Open a private in-memory database. Contents vanish with the handle.
    pub async fn open_in_memory(max_size_bytes: u64) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        Self::initialize(conn, ":memory:".to_string(), max_size_bytes).await
    }

    async fn initialize(conn: Connection, path: String, max_size_bytes: u64) -> StorageResult<Self> {
        let db = Self { conn, path };

        db.call(move |conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = FULL;
                PRAGMA busy_timeout = 5000;
                ",
            )?;

            let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
            let max_pages = (max_size_bytes as i64 / page_size.max(1)).max(1);
            // The pragma echoes the effective limit as a row.
            let applied: i64 = conn.query_row(
                &format!("PRAGMA max_page_count = {}", max_pages),
                [],
                |row| row.get(0),
            )?;
            debug!(page_size, max_pages = applied, "Applied database size ceiling");

            migrations::run_migrations(conn)
        })
        .await?;

        info!(path = %db.path, "Log database initialized");
        Ok(db)
    }

    /// Execute a closure on the database connection.
    ///
    /// The closure runs on the dedicated SQLite thread. Keep it to SQL and
    /// lightweight row mapping; anything heavier stalls every other caller.
    pub async fn call<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&mut rusqlite::Connection) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        // Our result travels inside tokio_rusqlite's Ok; its own Err only
        // reports executor failures.
        let outer_result = self
            .conn
            .call(move |conn| Ok(f(conn)))
            .await;

        match outer_result {
            Ok(inner) => inner,
            Err(e) => Err(from_tokio_rusqlite(e)),
        }
    }

    /// Execute a closure that returns a rusqlite::Result.
    pub async fn call_sqlite<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| Ok(f(conn)?))
            .await
            .map_err(from_tokio_rusqlite)
    }

    /// Get the database file path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Check the database by running an integrity check.
    pub async fn health_check(&self) -> StorageResult<()> {
        let result: String = self
            .call_sqlite(|conn| conn.query_row("PRAGMA quick_check", [], |row| row.get(0)))
            .await?;
        if result != "ok" {
            return Err(StorageError::Connection(format!(
                "integrity check failed: {}",
                result
            )));
        }
        debug!("Database health check passed");
        Ok(())
    }

    /// Close the connection after pending operations finish.
    pub async fn close(self) -> StorageResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to close database: {:?}", e)))?;
        info!(path = %self.path, "Log database closed");
        Ok(())
    }
}

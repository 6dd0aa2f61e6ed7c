//! Standalone query functions over a `&Connection`.
//!
//! Each function is a single logical step; callers compose them inside a
//! transaction when several must apply atomically.

use crate::StorageResult;
use ingest_core::{BatchId, LogId};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

/// A stored row as returned by [`select_available`].
pub struct StoredRow {
    pub row_id: i64,
    pub payload: String,
}

/// An evicted row.
pub struct EvictedRow {
    pub log_id: LogId,
    pub batched: bool,
}

// ==========================================
// Logs
// ==========================================

pub fn insert_log(
    conn: &Connection,
    key: &str,
    log_id: &LogId,
    payload: &str,
    created_at: &str,
) -> StorageResult<()> {
    conn.prepare_cached(
        "INSERT INTO logs (log_id, storage_key, batch_id, payload, created_at)
         VALUES (?1, ?2, NULL, ?3, ?4)",
    )?
    .execute(params![log_id.as_str(), key, payload, created_at])?;
    Ok(())
}

/// Delete the `count` oldest rows of `key`, marked or not.
pub fn evict_oldest(conn: &Connection, key: &str, count: usize) -> StorageResult<Vec<EvictedRow>> {
    if count == 0 {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare_cached(
        "SELECT id, log_id, batch_id IS NOT NULL FROM logs
         WHERE storage_key = ?1 ORDER BY id ASC LIMIT ?2",
    )?;
    let rows: Vec<(i64, String, bool)> = stmt
        .query_map(params![key, count as i64], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?
        .collect::<Result<_, _>>()?;

    let mut delete = conn.prepare_cached("DELETE FROM logs WHERE id = ?1")?;
    let mut evicted = Vec::with_capacity(rows.len());
    for (row_id, log_id, batched) in rows {
        delete.execute(params![row_id])?;
        evicted.push(EvictedRow {
            log_id: LogId::from_string(log_id),
            batched,
        });
    }
    Ok(evicted)
}

pub fn count_for_key(conn: &Connection, key: &str) -> StorageResult<usize> {
    let count: i64 = conn
        .prepare_cached("SELECT COUNT(*) FROM logs WHERE storage_key = ?1")?
        .query_row(params![key], |row| row.get(0))?;
    Ok(count as usize)
}

pub fn count_available(conn: &Connection, key: &str) -> StorageResult<usize> {
    let count: i64 = conn
        .prepare_cached(
            "SELECT COUNT(*) FROM logs WHERE storage_key = ?1 AND batch_id IS NULL",
        )?
        .query_row(params![key], |row| row.get(0))?;
    Ok(count as usize)
}

/// Oldest unmarked rows of `key`.
pub fn select_available(conn: &Connection, key: &str, limit: usize) -> StorageResult<Vec<StoredRow>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, payload FROM logs
         WHERE storage_key = ?1 AND batch_id IS NULL
         ORDER BY id ASC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![key, limit as i64], |row| {
            Ok(StoredRow {
                row_id: row.get(0)?,
                payload: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn mark_rows(conn: &Connection, row_ids: &[i64], batch_id: &BatchId) -> StorageResult<()> {
    let mut stmt = conn.prepare_cached("UPDATE logs SET batch_id = ?1 WHERE id = ?2")?;
    for row_id in row_ids {
        stmt.execute(params![batch_id.as_str(), row_id])?;
    }
    Ok(())
}

pub fn delete_batch(conn: &Connection, key: &str, batch_id: &BatchId) -> StorageResult<Vec<LogId>> {
    let ids: Vec<String> = conn
        .prepare_cached(
            "SELECT log_id FROM logs WHERE storage_key = ?1 AND batch_id = ?2 ORDER BY id ASC",
        )?
        .query_map(params![key, batch_id.as_str()], |row| row.get(0))?
        .collect::<Result<_, _>>()?;

    conn.prepare_cached("DELETE FROM logs WHERE storage_key = ?1 AND batch_id = ?2")?
        .execute(params![key, batch_id.as_str()])?;

    Ok(ids.into_iter().map(LogId::from_string).collect())
}

pub fn delete_logs(conn: &Connection, key: &str, log_ids: &[LogId]) -> StorageResult<usize> {
    if log_ids.is_empty() {
        return Ok(0);
    }
    let placeholders = vec!["?"; log_ids.len()].join(", ");
    let sql = format!(
        "DELETE FROM logs WHERE storage_key = ? AND log_id IN ({})",
        placeholders
    );
    let values = std::iter::once(key).chain(log_ids.iter().map(LogId::as_str));
    Ok(conn.execute(&sql, params_from_iter(values))?)
}

pub fn release_batch(conn: &Connection, key: &str, batch_id: &BatchId) -> StorageResult<usize> {
    Ok(conn
        .prepare_cached("UPDATE logs SET batch_id = NULL WHERE storage_key = ?1 AND batch_id = ?2")?
        .execute(params![key, batch_id.as_str()])?)
}

/// Clear every batch mark. Used at open: no batch survives a restart.
pub fn release_all_batches(conn: &Connection) -> StorageResult<usize> {
    Ok(conn.execute("UPDATE logs SET batch_id = NULL WHERE batch_id IS NOT NULL", [])?)
}

pub fn delete_all(conn: &Connection, key: &str) -> StorageResult<usize> {
    Ok(conn
        .prepare_cached("DELETE FROM logs WHERE storage_key = ?1")?
        .execute(params![key])?)
}

// ==========================================
// Settings
// ==========================================

pub fn get_setting(conn: &Connection, key: &str) -> StorageResult<Option<String>> {
    Ok(conn
        .prepare_cached("SELECT value FROM settings WHERE key = ?1")?
        .query_row(params![key], |row| row.get(0))
        .optional()?)
}

pub fn set_setting(conn: &Connection, key: &str, value: &str) -> StorageResult<()> {
    conn.prepare_cached(
        "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )?
    .execute(params![key, value])?;
    Ok(())
}

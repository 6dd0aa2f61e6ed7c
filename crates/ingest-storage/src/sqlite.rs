//! SQLite-backed log store.

use crate::executor::AsyncDatabase;
use crate::queries::{self, EvictedRow};
use crate::store::{LogStore, SaveReceipt, SettingsStore, StoreConfig};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use ingest_core::{BatchId, LogBatch, LogId, LogRecord};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

/// Durable store shared by every channel of a process.
///
/// All I/O goes through one [`AsyncDatabase`] executor thread. Each operation
/// commits before returning.
pub struct SqliteLogStore {
    db: AsyncDatabase,
    config: StoreConfig,
    /// Set once SQLite reports corruption. Saves are refused afterwards.
    degraded: AtomicBool,
}

impl SqliteLogStore {
    /// Open (or create) the store at `path`.
    ///
    /// Batch marks left behind by a previous process are released, so every
    /// surviving record becomes loadable again.
    pub async fn open(path: &Path, config: StoreConfig) -> StorageResult<Self> {
        let db = AsyncDatabase::open(path, config.max_database_bytes).await?;
        Self::from_database(db, config).await
    }

    /// Open a non-durable in-memory store with SQLite semantics.
    pub async fn open_in_memory(config: StoreConfig) -> StorageResult<Self> {
        let db = AsyncDatabase::open_in_memory(config.max_database_bytes).await?;
        Self::from_database(db, config).await
    }

    async fn from_database(db: AsyncDatabase, config: StoreConfig) -> StorageResult<Self> {
        let released = db.call(|conn| queries::release_all_batches(conn)).await?;
        if released > 0 {
            info!(count = released, "Released batch marks from previous run");
        }

        Ok(Self {
            db,
            config,
            degraded: AtomicBool::new(false),
        })
    }

    pub fn database(&self) -> &AsyncDatabase {
        &self.db
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Whether the store gave up on writes after detecting corruption.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    fn observe<T>(&self, result: StorageResult<T>) -> StorageResult<T> {
        if let Err(e) = &result {
            if e.is_corruption() && !self.degraded.swap(true, Ordering::AcqRel) {
                error!(error = %e, path = %self.db.path(), "Log database corrupt; discarding writes");
            }
        }
        result
    }

    async fn insert(
        &self,
        key: &str,
        log_id: &LogId,
        payload: &str,
        created_at: &str,
        extra_evictions: usize,
    ) -> StorageResult<Vec<EvictedRow>> {
        let capacity = self.config.capacity_for(key);
        let key = key.to_string();
        let log_id = log_id.clone();
        let payload = payload.to_string();
        let created_at = created_at.to_string();

        self.db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let existing = queries::count_for_key(&tx, &key)?;
                let overflow = (existing + 1).saturating_sub(capacity) + extra_evictions;
                let evicted = queries::evict_oldest(&tx, &key, overflow)?;
                queries::insert_log(&tx, &key, &log_id, &payload, &created_at)?;
                tx.commit()?;
                Ok(evicted)
            })
            .await
    }
}

#[async_trait]
impl LogStore for SqliteLogStore {
    async fn save(&self, key: &str, record: &LogRecord) -> StorageResult<SaveReceipt> {
        if self.is_degraded() {
            return Err(StorageError::Degraded);
        }

        let payload = serde_json::to_string(record)?;
        let created_at = record.created_at().to_rfc3339();

        let evicted = match self.insert(key, record.id(), &payload, &created_at, 0).await {
            Err(e) if e.is_full() => {
                warn!(storage_key = %key, "Log database full; evicting oldest record and retrying");
                self.insert(key, record.id(), &payload, &created_at, 1).await
            }
            other => other,
        };
        let evicted = self.observe(evicted)?;

        if !evicted.is_empty() {
            warn!(
                storage_key = %key,
                count = evicted.len(),
                "Bucket at capacity; evicted oldest records"
            );
        }

        Ok(SaveReceipt {
            log_id: record.id().clone(),
            evicted_unbatched: evicted.iter().filter(|row| !row.batched).count(),
            evicted: evicted.into_iter().map(|row| row.log_id).collect(),
        })
    }

    async fn delete_logs(&self, key: &str, log_ids: &[LogId]) -> StorageResult<usize> {
        let key = key.to_string();
        let log_ids = log_ids.to_vec();
        let result = self
            .db
            .call(move |conn| queries::delete_logs(conn, &key, &log_ids))
            .await;
        self.observe(result)
    }

    async fn delete_batch(&self, key: &str, batch_id: &BatchId) -> StorageResult<Vec<LogId>> {
        let key = key.to_string();
        let batch_id = batch_id.clone();
        let result = self
            .db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let deleted = queries::delete_batch(&tx, &key, &batch_id)?;
                tx.commit()?;
                Ok(deleted)
            })
            .await;
        self.observe(result)
    }

    async fn load_batch(&self, key: &str, max_count: usize) -> StorageResult<Option<LogBatch>> {
        if max_count == 0 {
            return Ok(None);
        }

        let batch_id = BatchId::new();
        let rows = {
            let key = key.to_string();
            let batch_id = batch_id.clone();
            let result = self
                .db
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let rows = queries::select_available(&tx, &key, max_count)?;
                    let row_ids: Vec<i64> = rows.iter().map(|row| row.row_id).collect();
                    queries::mark_rows(&tx, &row_ids, &batch_id)?;
                    tx.commit()?;
                    Ok(rows)
                })
                .await;
            self.observe(result)?
        };

        if rows.is_empty() {
            return Ok(None);
        }

        let mut records = Vec::with_capacity(rows.len());
        let mut unreadable = Vec::new();
        for row in rows {
            match serde_json::from_str::<LogRecord>(&row.payload) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(storage_key = %key, row_id = row.row_id, error = %e, "Dropping unreadable record");
                    unreadable.push(row.row_id);
                }
            }
        }

        if !unreadable.is_empty() {
            self.db
                .call_sqlite(move |conn| {
                    let mut stmt = conn.prepare_cached("DELETE FROM logs WHERE id = ?1")?;
                    for row_id in unreadable {
                        stmt.execute([row_id])?;
                    }
                    Ok(())
                })
                .await?;
        }

        if records.is_empty() {
            return Ok(None);
        }

        debug!(storage_key = %key, batch_id = %batch_id, count = records.len(), "Loaded batch");
        Ok(Some(LogBatch {
            batch_id,
            storage_key: key.to_string(),
            records,
        }))
    }

    async fn release_batch(&self, key: &str, batch_id: &BatchId) -> StorageResult<usize> {
        let key = key.to_string();
        let batch_id = batch_id.clone();
        let result = self
            .db
            .call(move |conn| queries::release_batch(conn, &key, &batch_id))
            .await;
        self.observe(result)
    }

    async fn delete_all(&self, key: &str) -> StorageResult<usize> {
        let key = key.to_string();
        let result = self
            .db
            .call(move |conn| queries::delete_all(conn, &key))
            .await;
        self.observe(result)
    }

    async fn count_for_key(&self, key: &str) -> StorageResult<usize> {
        let key = key.to_string();
        let result = self
            .db
            .call(move |conn| queries::count_for_key(conn, &key))
            .await;
        self.observe(result)
    }

    async fn count_available(&self, key: &str) -> StorageResult<usize> {
        let key = key.to_string();
        let result = self
            .db
            .call(move |conn| queries::count_available(conn, &key))
            .await;
        self.observe(result)
    }
}

#[async_trait]
impl SettingsStore for SqliteLogStore {
    async fn get_bool(&self, key: &str) -> StorageResult<Option<bool>> {
        let key = key.to_string();
        let value = self
            .db
            .call(move |conn| queries::get_setting(conn, &key))
            .await?;
        Ok(value.map(|v| v == "true"))
    }

    async fn set_bool(&self, key: &str, value: bool) -> StorageResult<()> {
        let key = key.to_string();
        self.db
            .call(move |conn| queries::set_setting(conn, &key, if value { "true" } else { "false" }))
            .await
    }
}

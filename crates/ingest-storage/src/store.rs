//! Store contracts shared by the SQLite and in-memory implementations.

use crate::StorageResult;
use async_trait::async_trait;
use ingest_core::{BatchId, LogBatch, LogId, LogRecord, StorageSettings};
use std::collections::HashMap;

/// Sizing policy of a log store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Row ceiling for keys without an override.
    pub bucket_capacity: usize,
    /// Per-key row ceilings.
    pub capacity_overrides: HashMap<String, usize>,
    /// Ceiling for the whole database file. Ignored by the memory store.
    pub max_database_bytes: u64,
}

impl StoreConfig {
    /// Row ceiling for `key`. Never less than one.
    pub fn capacity_for(&self, key: &str) -> usize {
        self.capacity_overrides
            .get(key)
            .copied()
            .unwrap_or(self.bucket_capacity)
            .max(1)
    }

    pub fn with_capacity(mut self, key: impl Into<String>, capacity: usize) -> Self {
        self.capacity_overrides.insert(key.into(), capacity);
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StorageSettings::default().into()
    }
}

impl From<StorageSettings> for StoreConfig {
    fn from(settings: StorageSettings) -> Self {
        Self {
            bucket_capacity: settings.bucket_capacity,
            capacity_overrides: HashMap::new(),
            max_database_bytes: settings.max_database_bytes,
        }
    }
}

/// Outcome of a successful save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReceipt {
    pub log_id: LogId,
    /// Rows removed to keep the key under its ceiling, oldest first.
    pub evicted: Vec<LogId>,
    /// How many of the evicted rows were not part of an in-flight batch.
    pub evicted_unbatched: usize,
}

/// Durable, keyed record store.
///
/// Every key is an independent FIFO bucket. Rows handed out by
/// [`load_batch`](LogStore::load_batch) stay marked with their batch id until
/// the batch is deleted or released, and are never returned by another load
/// in the meantime.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Persist a record under `key`, evicting the oldest rows of that key
    /// first when it is at its ceiling.
    async fn save(&self, key: &str, record: &LogRecord) -> StorageResult<SaveReceipt>;

    /// Delete specific records. Returns the number of rows removed.
    async fn delete_logs(&self, key: &str, log_ids: &[LogId]) -> StorageResult<usize>;

    /// Delete every record marked with `batch_id`. Deleting an unknown batch
    /// is not an error and returns an empty list.
    async fn delete_batch(&self, key: &str, batch_id: &BatchId) -> StorageResult<Vec<LogId>>;

    /// Load up to `max_count` unmarked records, oldest first, and mark them
    /// with a fresh batch id. Returns `None` when nothing is available.
    async fn load_batch(&self, key: &str, max_count: usize) -> StorageResult<Option<LogBatch>>;

    /// Clear the mark of `batch_id` so its records can be loaded again.
    async fn release_batch(&self, key: &str, batch_id: &BatchId) -> StorageResult<usize>;

    /// Delete every record of `key`, marked or not.
    async fn delete_all(&self, key: &str) -> StorageResult<usize>;

    /// Whether `load_batch` would return something for `key`.
    async fn has_available_batch(&self, key: &str) -> StorageResult<bool> {
        Ok(self.count_available(key).await? > 0)
    }

    /// All rows of `key`, including marked ones.
    async fn count_for_key(&self, key: &str) -> StorageResult<usize>;

    /// Rows of `key` not marked by a batch.
    async fn count_available(&self, key: &str) -> StorageResult<usize>;
}

/// Process-wide keyed settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_bool(&self, key: &str) -> StorageResult<Option<bool>>;

    async fn set_bool(&self, key: &str, value: bool) -> StorageResult<()>;
}

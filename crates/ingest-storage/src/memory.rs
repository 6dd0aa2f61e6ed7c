//! In-memory log store.
//!
//! Same contract as the SQLite store without durability. Operations never
//! yield, which keeps tests running on a paused clock deterministic.

use crate::store::{LogStore, SaveReceipt, SettingsStore, StoreConfig};
use crate::StorageResult;
use async_trait::async_trait;
use ingest_core::{BatchId, LogBatch, LogId, LogRecord};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

struct StoredLog {
    record: LogRecord,
    batch_id: Option<BatchId>,
}

#[derive(Default)]
struct State {
    buckets: HashMap<String, VecDeque<StoredLog>>,
    settings: HashMap<String, bool>,
}

/// Non-durable store backed by per-key FIFO queues.
pub struct MemoryLogStore {
    config: StoreConfig,
    state: Mutex<State>,
}

impl MemoryLogStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
        }
    }

    /// Snapshot of every record under `key`, oldest first.
    pub fn records(&self, key: &str) -> Vec<LogRecord> {
        self.state
            .lock()
            .buckets
            .get(key)
            .map(|bucket| bucket.iter().map(|log| log.record.clone()).collect())
            .unwrap_or_default()
    }
}

impl Default for MemoryLogStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn save(&self, key: &str, record: &LogRecord) -> StorageResult<SaveReceipt> {
        let capacity = self.config.capacity_for(key);
        let mut state = self.state.lock();
        let bucket = state.buckets.entry(key.to_string()).or_default();

        let mut evicted = Vec::new();
        let mut evicted_unbatched = 0;
        while bucket.len() >= capacity {
            match bucket.pop_front() {
                Some(oldest) => {
                    if oldest.batch_id.is_none() {
                        evicted_unbatched += 1;
                    }
                    evicted.push(oldest.record.id().clone());
                }
                None => break,
            }
        }

        bucket.push_back(StoredLog {
            record: record.clone(),
            batch_id: None,
        });

        if !evicted.is_empty() {
            tracing::warn!(
                storage_key = %key,
                count = evicted.len(),
                "Bucket at capacity; evicted oldest records"
            );
        }

        Ok(SaveReceipt {
            log_id: record.id().clone(),
            evicted,
            evicted_unbatched,
        })
    }

    async fn delete_logs(&self, key: &str, log_ids: &[LogId]) -> StorageResult<usize> {
        let mut state = self.state.lock();
        let Some(bucket) = state.buckets.get_mut(key) else {
            return Ok(0);
        };
        let before = bucket.len();
        bucket.retain(|log| !log_ids.contains(log.record.id()));
        Ok(before - bucket.len())
    }

    async fn delete_batch(&self, key: &str, batch_id: &BatchId) -> StorageResult<Vec<LogId>> {
        let mut state = self.state.lock();
        let Some(bucket) = state.buckets.get_mut(key) else {
            return Ok(Vec::new());
        };
        let mut deleted = Vec::new();
        bucket.retain(|log| {
            if log.batch_id.as_ref() == Some(batch_id) {
                deleted.push(log.record.id().clone());
                false
            } else {
                true
            }
        });
        Ok(deleted)
    }

    async fn load_batch(&self, key: &str, max_count: usize) -> StorageResult<Option<LogBatch>> {
        let mut state = self.state.lock();
        let Some(bucket) = state.buckets.get_mut(key) else {
            return Ok(None);
        };

        let batch_id = BatchId::new();
        let records: Vec<LogRecord> = bucket
            .iter_mut()
            .filter(|log| log.batch_id.is_none())
            .take(max_count)
            .map(|log| {
                log.batch_id = Some(batch_id.clone());
                log.record.clone()
            })
            .collect();

        if records.is_empty() {
            return Ok(None);
        }

        Ok(Some(LogBatch {
            batch_id,
            storage_key: key.to_string(),
            records,
        }))
    }

    async fn release_batch(&self, key: &str, batch_id: &BatchId) -> StorageResult<usize> {
        let mut state = self.state.lock();
        let Some(bucket) = state.buckets.get_mut(key) else {
            return Ok(0);
        };
        let mut released = 0;
        for log in bucket.iter_mut() {
            if log.batch_id.as_ref() == Some(batch_id) {
                log.batch_id = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn delete_all(&self, key: &str) -> StorageResult<usize> {
        Ok(self
            .state
            .lock()
            .buckets
            .remove(key)
            .map(|bucket| bucket.len())
            .unwrap_or(0))
    }

    async fn count_for_key(&self, key: &str) -> StorageResult<usize> {
        Ok(self
            .state
            .lock()
            .buckets
            .get(key)
            .map(VecDeque::len)
            .unwrap_or(0))
    }

    async fn count_available(&self, key: &str) -> StorageResult<usize> {
        Ok(self
            .state
            .lock()
            .buckets
            .get(key)
            .map(|bucket| bucket.iter().filter(|log| log.batch_id.is_none()).count())
            .unwrap_or(0))
    }
}

#[async_trait]
impl SettingsStore for MemoryLogStore {
    async fn get_bool(&self, key: &str) -> StorageResult<Option<bool>> {
        Ok(self.state.lock().settings.get(key).copied())
    }

    async fn set_bool(&self, key: &str, value: bool) -> StorageResult<()> {
        self.state.lock().settings.insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(n: u64) -> LogRecord {
        LogRecord::new("event", json!({ "n": n }))
    }

    #[tokio::test]
    async fn test_batches_never_share_records() {
        let store = MemoryLogStore::default();
        for n in 0..5 {
            store.save("a/default", &record(n)).await.unwrap();
        }

        let first = store.load_batch("a/default", 2).await.unwrap().unwrap();
        let second = store.load_batch("a/default", 2).await.unwrap().unwrap();
        for id in first.log_ids() {
            assert!(!second.log_ids().contains(&id));
        }
        assert_eq!(store.count_available("a/default").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_batch_then_release_unknown_is_noop() {
        let store = MemoryLogStore::default();
        store.save("a/default", &record(0)).await.unwrap();
        let batch = store.load_batch("a/default", 10).await.unwrap().unwrap();

        assert_eq!(store.delete_batch("a/default", &batch.batch_id).await.unwrap().len(), 1);
        assert!(store.delete_batch("a/default", &batch.batch_id).await.unwrap().is_empty());
        assert_eq!(store.release_batch("a/default", &batch.batch_id).await.unwrap(), 0);
        assert!(store.delete_batch("missing", &BatchId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ceiling_is_per_key() {
        let store = MemoryLogStore::new(StoreConfig::default().with_capacity("small/default", 2));
        let records: Vec<LogRecord> = (0..3).map(record).collect();
        for r in &records {
            store.save("small/default", r).await.unwrap();
            store.save("large/default", r).await.unwrap();
        }

        let remaining: Vec<LogId> = store
            .records("small/default")
            .iter()
            .map(|r| r.id().clone())
            .collect();
        assert_eq!(remaining, vec![records[1].id().clone(), records[2].id().clone()]);
        assert_eq!(store.count_for_key("large/default").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_has_available_batch_tracks_marks() {
        let store = MemoryLogStore::default();
        assert!(!store.has_available_batch("a/default").await.unwrap());

        store.save("a/default", &record(0)).await.unwrap();
        assert!(store.has_available_batch("a/default").await.unwrap());

        let batch = store.load_batch("a/default", 10).await.unwrap().unwrap();
        assert!(!store.has_available_batch("a/default").await.unwrap());

        store.release_batch("a/default", &batch.batch_id).await.unwrap();
        assert!(store.has_available_batch("a/default").await.unwrap());
    }
}

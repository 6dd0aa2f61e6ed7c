//! Disabling, deleting, re-enabling, and persistence failures.

use super::harness::{
    config, ids, key, record, records, settle, spawn_channel, storage_key, FailingStore,
    HoldingSender, RecordingDelegate, Reply, TestPipeline,
};
use crate::{ChannelServices, DropReason};
use ingest_core::LogRecord;
use ingest_storage::{LogStore, MemoryLogStore, SettingsStore};
use serde_json::json;
use std::sync::Arc;

#[tokio::test(start_paused = true)]
async fn disabled_channel_drops_records_and_persists_flag() {
    let pipeline = TestPipeline::new(vec![]);
    let channel = pipeline.channel(config(1, 5, 3));

    channel.set_enabled(false, false).await.unwrap();
    let dropped = record(0);
    channel.enqueue(dropped.clone());
    settle().await;

    assert_eq!(
        pipeline.delegate.dropped(),
        vec![(dropped.id().clone(), DropReason::ChannelDisabled)]
    );
    assert_eq!(pipeline.transport.attempts(), 0);
    assert_eq!(
        pipeline.store.get_bool(&key().enabled_setting_key()).await.unwrap(),
        Some(false)
    );
}

#[tokio::test(start_paused = true)]
async fn disable_with_delete_then_enable_leaves_empty_channel() {
    let pipeline = TestPipeline::new(vec![Reply::Hang]);
    let channel = pipeline.channel(config(2, 60, 3));

    for r in records(3) {
        channel.enqueue(r);
    }
    settle().await;
    assert_eq!(pipeline.transport.attempts(), 1);
    assert_eq!(pipeline.sender.pending_call_count(), 1);

    channel.set_enabled(false, true).await.unwrap();
    assert!(pipeline.store.records(&storage_key()).is_empty());
    assert_eq!(pipeline.sender.pending_call_count(), 0);

    channel.set_enabled(true, false).await.unwrap();
    let status = channel.status().await.unwrap();
    assert!(status.enabled);
    assert_eq!(status.items_count, 0);
    assert_eq!(status.pending_batches, 0);
    assert!(!status.timer_armed);
    assert!(pipeline.delegate.succeeded().is_empty());
    assert!(pipeline.delegate.failed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn disable_without_delete_releases_in_flight_batch() {
    let pipeline = TestPipeline::new(vec![Reply::Hang]);
    let channel = pipeline.channel(config(2, 60, 3));
    let records = records(2);

    for r in &records {
        channel.enqueue(r.clone());
    }
    settle().await;
    let first_batch = pipeline.transport.batch_ids()[0].clone();

    channel.set_enabled(false, false).await.unwrap();
    assert_eq!(pipeline.sender.pending_call_count(), 0);
    assert_eq!(
        pipeline.store.count_available(&storage_key()).await.unwrap(),
        2
    );
    assert_eq!(channel.status().await.unwrap().items_count, 2);

    channel.set_enabled(true, false).await.unwrap();
    settle().await;

    let batch_ids = pipeline.transport.batch_ids();
    assert_eq!(batch_ids.len(), 2);
    assert_ne!(batch_ids[1], first_batch);
    let succeeded = pipeline.delegate.succeeded();
    assert_eq!(succeeded.len(), 1);
    assert_eq!(succeeded[0].0, batch_ids[1]);
    assert!(pipeline.store.records(&storage_key()).is_empty());
}

#[tokio::test(start_paused = true)]
async fn persisted_disabled_flag_is_restored() {
    let pipeline = TestPipeline::new(vec![]);
    pipeline
        .store
        .set_bool(&key().enabled_setting_key(), false)
        .await
        .unwrap();

    let channel = pipeline.channel(config(1, 5, 3));
    assert!(!channel.status().await.unwrap().enabled);
}

#[tokio::test(start_paused = true)]
async fn persistence_failure_discards_until_reenabled() {
    let pipeline = TestPipeline::new(vec![]);
    let store = Arc::new(FailingStore::default());
    let delegate = RecordingDelegate::new();
    let services = ChannelServices::new(store.clone(), pipeline.sender.clone());
    let channel = spawn_channel(services, config(1, 5, 3), &delegate);

    store.set_fail_saves(true);
    let failed = record(0);
    channel.enqueue(failed.clone());
    settle().await;

    store.set_fail_saves(false);
    let discarded = record(1);
    channel.enqueue(discarded.clone());
    settle().await;

    let dropped = delegate.dropped();
    assert_eq!(dropped.len(), 2);
    assert_eq!(dropped[0].0, *failed.id());
    assert!(matches!(dropped[0].1, DropReason::PersistenceFailure(_)));
    assert_eq!(dropped[1], (discarded.id().clone(), DropReason::Discarding));
    assert!(channel.status().await.unwrap().discard_logs);

    channel.set_enabled(true, false).await.unwrap();
    channel.enqueue(record(2));
    settle().await;

    assert!(!channel.status().await.unwrap().discard_logs);
    assert_eq!(delegate.succeeded().len(), 1);
    assert_eq!(store.count_for_key(&storage_key()).await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn record_without_type_is_rejected() {
    let pipeline = TestPipeline::new(vec![]);
    let channel = pipeline.channel(config(1, 5, 3));

    let invalid = LogRecord::new("  ", json!({}));
    channel.enqueue(invalid.clone());
    settle().await;

    assert_eq!(
        pipeline.delegate.dropped(),
        vec![(invalid.id().clone(), DropReason::InvalidRecord)]
    );
    assert_eq!(pipeline.store.count_for_key(&storage_key()).await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn late_completion_after_purge_leaves_new_records_alone() {
    let store = Arc::new(MemoryLogStore::default());
    let sender = Arc::new(HoldingSender::default());
    let delegate = RecordingDelegate::new();
    let services = ChannelServices::new(store.clone(), sender.clone());
    let channel = spawn_channel(services, config(2, 60, 3), &delegate);

    for r in records(2) {
        channel.enqueue(r);
    }
    settle().await;
    let stale = sender.call_ids();
    assert_eq!(stale.len(), 1);

    channel.set_enabled(false, true).await.unwrap();
    assert_eq!(sender.cancelled(), stale);
    channel.set_enabled(true, false).await.unwrap();

    let fresh = records(2);
    for r in &fresh {
        channel.enqueue(r.clone());
    }
    settle().await;
    assert_eq!(sender.call_ids().len(), 2);
    let before = channel.status().await.unwrap();
    assert_eq!(before.pending_batches, 1);

    // The purged batch's handler fires after all.
    sender.deliver(&stale[0]);
    settle().await;

    let after = channel.status().await.unwrap();
    assert_eq!(after.pending_batches, 1);
    assert_eq!(after.items_count, before.items_count);
    assert!(delegate.succeeded().is_empty());
    assert!(delegate.failed().is_empty());
    assert_eq!(ids(&store.records(&storage_key())), ids(&fresh));
}

//! Pending batch ceiling.

use super::harness::{config, records, settle, storage_key, Reply, TestPipeline};
use ingest_storage::LogStore;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn pending_batches_never_exceed_limit() {
    let pipeline = TestPipeline::new(vec![Reply::Hang; 4]);
    let channel = pipeline.channel(config(1, 5, 2));

    for r in records(4) {
        channel.enqueue(r);
    }
    settle().await;

    assert_eq!(pipeline.transport.attempts(), 2);
    let status = channel.status().await.unwrap();
    assert_eq!(status.pending_batches, 2);
    assert!(status.pending_batch_queue_full);
    assert_eq!(status.items_count, 2);
    assert!(!status.timer_armed);

    channel.flush().await.unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(pipeline.transport.attempts(), 2);
    assert_eq!(
        pipeline.store.count_available(&storage_key()).await.unwrap(),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn freed_slots_are_refilled_in_order() {
    let delayed = Reply::Delayed(Duration::from_secs(1), 200);
    let pipeline = TestPipeline::new(vec![delayed.clone(), delayed.clone(), delayed.clone(), delayed]);
    let channel = pipeline.channel(config(1, 5, 2));
    let records = records(4);

    for r in &records {
        channel.enqueue(r.clone());
    }
    settle().await;
    assert_eq!(pipeline.transport.attempts(), 2);

    tokio::time::sleep(Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(pipeline.transport.attempts(), 4);

    tokio::time::sleep(Duration::from_secs(1)).await;
    settle().await;

    let delivered: Vec<_> = pipeline
        .delegate
        .succeeded()
        .into_iter()
        .flat_map(|(_, ids)| ids)
        .collect();
    assert_eq!(delivered.len(), 4);
    for r in &records {
        assert!(delivered.contains(r.id()));
    }
    assert!(pipeline.store.records(&storage_key()).is_empty());
    let status = channel.status().await.unwrap();
    assert_eq!(status.pending_batches, 0);
    assert!(!status.pending_batch_queue_full);
}

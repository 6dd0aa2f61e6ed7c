//! Sender suspension as seen by channels.

use super::harness::{config, ids, record, settle, storage_key, Reply, TestPipeline, GROUP};
use ingest_core::Priority;
use ingest_sender::{NetworkStatus, Sender, TransportError};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn connectivity_loss_mid_retry_resumes_with_one_attempt() {
    let pipeline = TestPipeline::new(vec![
        Reply::Status(503),
        Reply::Error(TransportError::NoConnectivity("network down".to_string())),
        Reply::Status(200),
    ]);
    let manager = pipeline.manager();
    manager.set_channel_configuration(Priority::Default, config(1, 5, 3));
    let record = record(0);

    manager.process_log(record.clone(), Priority::Default, GROUP);
    settle().await;
    assert_eq!(pipeline.transport.attempts(), 1);

    // The retry after the first interval finds the network gone.
    tokio::time::sleep(Duration::from_secs(10)).await;
    settle().await;
    assert_eq!(pipeline.transport.attempts(), 2);
    assert!(pipeline.sender.is_suspended());
    // The sender keeps its offline state to itself.
    assert_eq!(pipeline.reachability.status(), NetworkStatus::Reachable);

    // The network monitor then reports the outage.
    pipeline.reachability.set_status(NetworkStatus::Unreachable);
    settle().await;

    let status = manager
        .channel_status(GROUP, Priority::Default)
        .await
        .unwrap()
        .unwrap();
    assert!(status.sender_suspended);
    assert_eq!(status.pending_batches, 1);

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(pipeline.transport.attempts(), 2);

    pipeline.reachability.set_status(NetworkStatus::Reachable);
    settle().await;

    let batch_ids = pipeline.transport.batch_ids();
    assert_eq!(batch_ids.len(), 3);
    assert!(batch_ids.iter().all(|id| *id == batch_ids[0]));
    assert_eq!(pipeline.delegate.will_send_count(), 1);

    let succeeded = pipeline.delegate.succeeded();
    assert_eq!(succeeded.len(), 1);
    assert_eq!(succeeded[0].1, vec![record.id().clone()]);
    assert!(pipeline.store.records(&storage_key()).is_empty());

    let status = manager
        .channel_status(GROUP, Priority::Default)
        .await
        .unwrap()
        .unwrap();
    assert!(!status.sender_suspended);
}

#[tokio::test(start_paused = true)]
async fn transport_offline_without_outage_report_retries_after_first_interval() {
    let pipeline = TestPipeline::new(vec![Reply::Error(TransportError::NoConnectivity(
        "network down".to_string(),
    ))]);
    let manager = pipeline.manager();
    manager.set_channel_configuration(Priority::Default, config(1, 5, 3));
    let record = record(0);

    manager.process_log(record.clone(), Priority::Default, GROUP);
    settle().await;
    assert_eq!(pipeline.transport.attempts(), 1);
    assert!(pipeline.sender.is_suspended());

    tokio::time::sleep(Duration::from_secs(10)).await;
    settle().await;
    assert_eq!(pipeline.transport.attempts(), 2);
    assert!(!pipeline.sender.is_suspended());

    let succeeded = pipeline.delegate.succeeded();
    assert_eq!(succeeded.len(), 1);
    assert_eq!(succeeded[0].1, vec![record.id().clone()]);
    assert!(pipeline.delegate.failed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn records_arriving_offline_are_sent_on_reconnect() {
    let pipeline = TestPipeline::new(vec![]);
    let manager = pipeline.manager();
    manager.set_channel_configuration(Priority::Default, config(2, 5, 3));
    let channel = manager.get_or_create_channel(Priority::Default, GROUP);
    settle().await;

    pipeline.reachability.set_status(NetworkStatus::Unreachable);
    settle().await;
    assert!(channel.status().await.unwrap().sender_suspended);

    let records = vec![record(0), record(1), record(2)];
    for r in &records {
        manager.process_log(r.clone(), Priority::Default, GROUP);
    }
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(pipeline.transport.attempts(), 0);
    let status = channel.status().await.unwrap();
    assert_eq!(status.items_count, 3);
    assert!(!status.timer_armed);

    pipeline.reachability.set_status(NetworkStatus::Reachable);
    settle().await;
    assert_eq!(pipeline.transport.batch_sizes(), vec![2]);

    // The remainder waits for the flush interval.
    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;
    assert_eq!(pipeline.transport.batch_sizes(), vec![2, 1]);

    let delivered: Vec<_> = pipeline
        .delegate
        .succeeded()
        .into_iter()
        .flat_map(|(_, ids)| ids)
        .collect();
    assert_eq!(delivered, ids(&records));
}

#[tokio::test(start_paused = true)]
async fn explicit_suspend_holds_records_until_resume() {
    let pipeline = TestPipeline::new(vec![]);
    let manager = pipeline.manager();
    manager.set_channel_configuration(Priority::High, config(1, 1, 6));

    manager.suspend();
    manager.process_log(record(0), Priority::High, GROUP);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(pipeline.transport.attempts(), 0);

    let status = manager
        .channel_status(GROUP, Priority::High)
        .await
        .unwrap()
        .unwrap();
    assert!(status.sender_suspended);
    assert_eq!(status.items_count, 1);

    manager.resume();
    settle().await;
    assert_eq!(pipeline.transport.attempts(), 1);
    assert_eq!(pipeline.delegate.succeeded().len(), 1);
}

//! Recovery from the SQLite store across restarts.
//!
//! These run on real time: SQLite work happens on the store's own thread.

use super::harness::{
    config, ids, key, records, sender_config, spawn_channel, storage_key, wait_for, RecordingDelegate,
    Reply, ScriptedTransport,
};
use crate::ChannelServices;
use ingest_sender::{HttpSender, Reachability, Sender};
use ingest_storage::{LogStore, SettingsStore, SqliteLogStore, StoreConfig};
use std::sync::Arc;
use tempfile::tempdir;

fn sender(transport: Arc<ScriptedTransport>) -> Arc<HttpSender> {
    Arc::new(HttpSender::new(sender_config(&[1]), transport, Reachability::default()).unwrap())
}

#[tokio::test]
async fn stored_records_are_sent_after_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("logs.sqlite");
    let records = records(2);

    {
        let store = Arc::new(SqliteLogStore::open(&path, StoreConfig::default()).await.unwrap());
        let transport = ScriptedTransport::new(vec![]);
        let sender = sender(transport.clone());
        sender.suspend();

        let delegate = RecordingDelegate::new();
        let channel = spawn_channel(
            ChannelServices::new(store.clone(), sender.clone()),
            config(2, 3600, 3),
            &delegate,
        );
        for r in &records {
            channel.enqueue(r.clone());
        }
        assert_eq!(channel.status().await.unwrap().items_count, 2);
        channel.shutdown().await.unwrap();
        assert_eq!(transport.attempts(), 0);
    }

    let store = Arc::new(SqliteLogStore::open(&path, StoreConfig::default()).await.unwrap());
    assert_eq!(store.count_available(&storage_key()).await.unwrap(), 2);

    let transport = ScriptedTransport::new(vec![]);
    let delegate = RecordingDelegate::new();
    let _channel = spawn_channel(
        ChannelServices::new(store.clone(), sender(transport.clone())),
        config(2, 3600, 3),
        &delegate,
    );

    wait_for("delivery after restart", || delegate.succeeded().len() == 1).await;
    assert_eq!(delegate.succeeded()[0].1, ids(&records));
    assert_eq!(transport.attempts(), 1);
    assert_eq!(store.count_for_key(&storage_key()).await.unwrap(), 0);
}

#[tokio::test]
async fn in_flight_batch_is_resent_after_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("logs.sqlite");
    let records = records(2);

    {
        let store = Arc::new(SqliteLogStore::open(&path, StoreConfig::default()).await.unwrap());
        let transport = ScriptedTransport::new(vec![Reply::Hang]);
        let delegate = RecordingDelegate::new();
        let channel = spawn_channel(
            ChannelServices::new(store.clone(), sender(transport.clone())),
            config(2, 3600, 3),
            &delegate,
        );
        for r in &records {
            channel.enqueue(r.clone());
        }
        assert_eq!(channel.status().await.unwrap().pending_batches, 1);
        wait_for("first attempt", || transport.attempts() == 1).await;
        assert_eq!(store.count_available(&storage_key()).await.unwrap(), 0);
        channel.shutdown().await.unwrap();
    }

    // Reopening releases the batch marks left by the interrupted run.
    let store = Arc::new(SqliteLogStore::open(&path, StoreConfig::default()).await.unwrap());
    assert_eq!(store.count_available(&storage_key()).await.unwrap(), 2);

    let transport = ScriptedTransport::new(vec![]);
    let delegate = RecordingDelegate::new();
    let _channel = spawn_channel(
        ChannelServices::new(store.clone(), sender(transport.clone())),
        config(2, 3600, 3),
        &delegate,
    );

    wait_for("delivery after restart", || delegate.succeeded().len() == 1).await;
    assert_eq!(delegate.succeeded()[0].1, ids(&records));
}

#[tokio::test]
async fn disabled_flag_survives_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("logs.sqlite");

    {
        let store = Arc::new(SqliteLogStore::open(&path, StoreConfig::default()).await.unwrap());
        let delegate = RecordingDelegate::new();
        let channel = spawn_channel(
            ChannelServices::new(store.clone(), sender(ScriptedTransport::new(vec![]))),
            config(2, 3600, 3),
            &delegate,
        );
        channel.set_enabled(false, false).await.unwrap();
        channel.shutdown().await.unwrap();
    }

    let store = Arc::new(SqliteLogStore::open(&path, StoreConfig::default()).await.unwrap());
    assert_eq!(
        store.get_bool(&key().enabled_setting_key()).await.unwrap(),
        Some(false)
    );

    let delegate = RecordingDelegate::new();
    let channel = spawn_channel(
        ChannelServices::new(store, sender(ScriptedTransport::new(vec![]))),
        config(2, 3600, 3),
        &delegate,
    );
    assert!(!channel.status().await.unwrap().enabled);
}

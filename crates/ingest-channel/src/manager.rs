//! Log manager: routes records to channels and fans out control calls.

use crate::channel::{ChannelHandle, ChannelService, ChannelServices, ChannelStatus};
use crate::delegate::ChannelDelegate;
use crate::error::{ChannelError, ChannelResult};
use ingest_core::{
    ChannelConfiguration, ChannelKey, DelegateId, GroupId, LogRecord, Paths, PipelineConfig,
    Priority,
};
use ingest_sender::{
    HttpSender, Reachability, ReqwestTransport, Sender, SenderConfig, SenderDelegate,
};
use ingest_storage::{LogStore, SettingsStore, SqliteLogStore, StoreConfig};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Entry point for producers.
///
/// Channels are created lazily on the first record for a
/// `(priority, group)` pair and live until [`LogManager::shutdown`].
pub struct LogManager {
    inner: Arc<ManagerInner>,
    suspension_delegate: DelegateId,
}

struct ManagerInner {
    runtime: Handle,
    services: ChannelServices,
    channels: RwLock<HashMap<ChannelKey, ChannelHandle>>,
    configurations: RwLock<HashMap<Priority, ChannelConfiguration>>,
    enabled: AtomicBool,
}

/// Forwards sender suspension to every channel.
struct SuspensionRelay {
    manager: Weak<ManagerInner>,
}

impl SenderDelegate for SuspensionRelay {
    fn on_suspended(&self) {
        if let Some(inner) = self.manager.upgrade() {
            for channel in inner.channels.read().values() {
                channel.sender_suspended();
            }
        }
    }

    fn on_resumed(&self) {
        if let Some(inner) = self.manager.upgrade() {
            for channel in inner.channels.read().values() {
                channel.sender_resumed();
            }
        }
    }
}

impl LogManager {
    /// Create a manager over an existing store and sender, with the built-in
    /// channel configuration for every priority. Must be called within a
    /// Tokio runtime.
    pub fn new<S>(store: Arc<S>, sender: Arc<dyn Sender>) -> ChannelResult<Self>
    where
        S: LogStore + SettingsStore + 'static,
    {
        let configurations = Priority::ALL
            .iter()
            .map(|p| (*p, ChannelConfiguration::for_priority(*p)))
            .collect();
        Self::with_services(ChannelServices::new(store, sender), configurations)
    }

    /// Wire the SQLite store, HTTP transport, and sender from configuration.
    pub async fn from_config(
        config: &PipelineConfig,
        paths: &Paths,
        reachability: Reachability,
    ) -> ChannelResult<Self> {
        config.validate()?;
        paths.ensure_dirs()?;

        let store = Arc::new(
            SqliteLogStore::open(&paths.database_file(), StoreConfig::from(config.storage.clone()))
                .await?,
        );
        let transport = Arc::new(ReqwestTransport::new(config.request_timeout())?);
        let sender = Arc::new(HttpSender::new(
            SenderConfig::from_pipeline(config)?,
            transport,
            reachability,
        )?);

        let configurations = Priority::ALL
            .iter()
            .map(|p| (*p, config.channel_configuration(*p)))
            .collect();
        Self::with_services(ChannelServices::new(store, sender), configurations)
    }

    fn with_services(
        services: ChannelServices,
        configurations: HashMap<Priority, ChannelConfiguration>,
    ) -> ChannelResult<Self> {
        let runtime = Handle::try_current().map_err(|_| ChannelError::NoRuntime)?;

        let inner = Arc::new(ManagerInner {
            runtime,
            services,
            channels: RwLock::new(HashMap::new()),
            configurations: RwLock::new(configurations),
            enabled: AtomicBool::new(true),
        });

        let relay = Arc::new(SuspensionRelay {
            manager: Arc::downgrade(&inner),
        });
        let suspension_delegate = inner.services.sender.add_delegate(relay);

        info!("Log manager created");
        Ok(Self {
            inner,
            suspension_delegate,
        })
    }

    /// Route a record to its channel. Records are dropped while the manager
    /// is disabled.
    pub fn process_log(&self, record: LogRecord, priority: Priority, group: impl Into<GroupId>) {
        if !self.is_enabled() {
            debug!(log_id = %record.id(), "Log manager disabled; record dropped");
            return;
        }
        self.get_or_create_channel(priority, group).enqueue(record);
    }

    /// Get the channel for `(priority, group)`, starting it if needed.
    pub fn get_or_create_channel(&self, priority: Priority, group: impl Into<GroupId>) -> ChannelHandle {
        let key = ChannelKey::new(priority, group);

        {
            let channels = self.inner.channels.read();
            if let Some(channel) = channels.get(&key) {
                return channel.clone();
            }
        }

        let mut channels = self.inner.channels.write();
        if let Some(channel) = channels.get(&key) {
            return channel.clone();
        }

        let config = self.configuration(priority);
        let (service, handle) = ChannelService::new(key.clone(), config, self.inner.services.clone());
        self.inner.runtime.spawn(service.run());

        info!(channel = %key, "Created channel");
        channels.insert(key, handle.clone());
        handle
    }

    pub fn channel(&self, priority: Priority, group: impl Into<GroupId>) -> Option<ChannelHandle> {
        let key = ChannelKey::new(priority, group);
        self.inner.channels.read().get(&key).cloned()
    }

    pub fn channel_keys(&self) -> Vec<ChannelKey> {
        self.inner.channels.read().keys().cloned().collect()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Enable or disable every channel and the sender.
    pub async fn set_enabled(&self, enabled: bool, delete_data: bool) -> ChannelResult<()> {
        self.inner.enabled.store(enabled, Ordering::SeqCst);

        if enabled {
            self.inner.services.sender.set_enabled(true, false);
        }
        for channel in self.channels() {
            channel.set_enabled(enabled, delete_data).await?;
        }
        if !enabled {
            self.inner.services.sender.set_enabled(false, delete_data);
        }

        info!(enabled, delete_data, "Log manager enabled state changed");
        Ok(())
    }

    /// Enable or disable one channel. The flag is persisted, so it also
    /// applies after a restart.
    pub async fn set_channel_enabled(
        &self,
        enabled: bool,
        delete_data: bool,
        group: impl Into<GroupId>,
        priority: Priority,
    ) -> ChannelResult<()> {
        self.get_or_create_channel(priority, group)
            .set_enabled(enabled, delete_data)
            .await
    }

    pub fn set_log_url(&self, log_url: &str) -> ChannelResult<()> {
        self.inner.services.sender.set_log_url(log_url)?;
        Ok(())
    }

    /// Suspend delivery. Records keep being persisted.
    pub fn suspend(&self) {
        self.inner.services.sender.suspend();
    }

    pub fn resume(&self) {
        self.inner.services.sender.resume();
    }

    /// Register a delegate notified by every channel.
    pub fn add_delegate(&self, delegate: Arc<dyn ChannelDelegate>) -> DelegateId {
        self.inner.services.shared_delegates.add(delegate)
    }

    pub fn remove_delegate(&self, id: DelegateId) -> bool {
        self.inner.services.shared_delegates.remove(id)
    }

    /// Register a delegate on one channel only.
    pub fn add_channel_delegate(
        &self,
        delegate: Arc<dyn ChannelDelegate>,
        group: impl Into<GroupId>,
        priority: Priority,
    ) -> DelegateId {
        self.get_or_create_channel(priority, group).add_delegate(delegate)
    }

    pub fn remove_channel_delegate(
        &self,
        id: DelegateId,
        group: impl Into<GroupId>,
        priority: Priority,
    ) -> bool {
        self.channel(priority, group)
            .map(|channel| channel.remove_delegate(id))
            .unwrap_or(false)
    }

    /// Batching policy for channels of `priority` created from now on.
    pub fn set_channel_configuration(&self, priority: Priority, configuration: ChannelConfiguration) {
        self.inner.configurations.write().insert(priority, configuration);
    }

    pub fn configuration(&self, priority: Priority) -> ChannelConfiguration {
        self.inner
            .configurations
            .read()
            .get(&priority)
            .copied()
            .unwrap_or_else(|| ChannelConfiguration::for_priority(priority))
    }

    /// Hand every stored record of every channel to the sender.
    pub async fn flush_all(&self) -> ChannelResult<()> {
        for channel in self.channels() {
            channel.flush().await?;
        }
        Ok(())
    }

    pub async fn channel_status(
        &self,
        group: impl Into<GroupId>,
        priority: Priority,
    ) -> ChannelResult<Option<ChannelStatus>> {
        match self.channel(priority, group) {
            Some(channel) => Ok(Some(channel.status().await?)),
            None => Ok(None),
        }
    }

    /// Stop every channel and detach from the sender.
    pub async fn shutdown(&self) {
        self.inner.services.sender.remove_delegate(self.suspension_delegate);

        let channels: Vec<ChannelHandle> = self.inner.channels.write().drain().map(|(_, c)| c).collect();
        for channel in channels {
            if let Err(e) = channel.shutdown().await {
                warn!(channel = %channel.key(), error = %e, "Channel already stopped");
            }
        }
        info!("Log manager shut down");
    }

    fn channels(&self) -> Vec<ChannelHandle> {
        self.inner.channels.read().values().cloned().collect()
    }
}

impl Drop for LogManager {
    fn drop(&mut self) {
        self.inner.services.sender.remove_delegate(self.suspension_delegate);
    }
}

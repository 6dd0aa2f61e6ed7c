//! Per-(priority, group) channel actor.
//!
//! A [`ChannelService`] owns every piece of channel state and is driven by a
//! single task draining its mailbox. Producers, the flush timer, and the
//! sender's completion handlers all talk to it through [`ChannelCommand`]s,
//! so enqueue, flush, and completion handling never run concurrently for one
//! channel.
//!
//! ```text
//! enqueue ──> save ──> items_count >= batch_size ──> flush
//!                 └──> otherwise arm flush timer ──(fires)──> flush
//! flush ──> load_batch ──> pending ──> Sender::send_async
//! completion ──> delete_batch ──> delegates ──> flush again if rows remain
//! ```

use crate::delegate::{ChannelDelegate, DropReason};
use crate::error::{ChannelError, ChannelResult};
use ingest_core::{
    BatchId, ChannelConfiguration, ChannelKey, DelegateId, DelegateRegistry, LogBatch, LogId,
    LogRecord,
};
use ingest_sender::{SendCompletion, SendOutcome, Sender};
use ingest_storage::{LogStore, SettingsStore};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Messages processed by a channel task.
pub enum ChannelCommand {
    Enqueue(LogRecord),
    /// Drain every available batch, up to the pending ceiling.
    Flush {
        done: oneshot::Sender<()>,
    },
    FlushTimerFired {
        generation: u64,
    },
    SendCompleted(SendCompletion),
    SetEnabled {
        enabled: bool,
        delete_data: bool,
        done: oneshot::Sender<ChannelResult<()>>,
    },
    SenderSuspended,
    SenderResumed,
    Status(oneshot::Sender<ChannelStatus>),
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Point-in-time view of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStatus {
    pub key: ChannelKey,
    pub enabled: bool,
    /// The sender reported suspension.
    pub sender_suspended: bool,
    pub discard_logs: bool,
    /// Persisted records not yet handed out in a batch.
    pub items_count: usize,
    pub pending_batches: usize,
    pub pending_batch_queue_full: bool,
    pub timer_armed: bool,
}

impl ChannelStatus {
    /// True when the channel will not cut new batches.
    pub fn is_suspended(&self) -> bool {
        !self.enabled || self.sender_suspended
    }
}

/// Shared collaborators of every channel.
#[derive(Clone)]
pub struct ChannelServices {
    pub store: Arc<dyn LogStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub sender: Arc<dyn Sender>,
    /// Delegates notified by every channel, in addition to each channel's own.
    pub shared_delegates: Arc<DelegateRegistry<dyn ChannelDelegate>>,
}

impl ChannelServices {
    pub fn new<S>(store: Arc<S>, sender: Arc<dyn Sender>) -> Self
    where
        S: LogStore + SettingsStore + 'static,
    {
        Self {
            store: store.clone(),
            settings: store,
            sender,
            shared_delegates: Arc::new(DelegateRegistry::new()),
        }
    }
}

/// Cloneable handle to a running channel.
#[derive(Clone)]
pub struct ChannelHandle {
    key: ChannelKey,
    tx: mpsc::UnboundedSender<ChannelCommand>,
    delegates: Arc<DelegateRegistry<dyn ChannelDelegate>>,
}

impl ChannelHandle {
    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    /// Queue a record. Never fails from the caller's point of view.
    pub fn enqueue(&self, record: LogRecord) {
        if self.tx.send(ChannelCommand::Enqueue(record)).is_err() {
            warn!(channel = %self.key, "Channel closed; record dropped");
        }
    }

    /// Hand every available batch to the sender. Resolves once the batches
    /// are cut, not once they are delivered.
    pub async fn flush(&self) -> ChannelResult<()> {
        let (done, rx) = oneshot::channel();
        self.send(ChannelCommand::Flush { done })?;
        rx.await.map_err(|_| self.closed())
    }

    pub async fn set_enabled(&self, enabled: bool, delete_data: bool) -> ChannelResult<()> {
        let (done, rx) = oneshot::channel();
        self.send(ChannelCommand::SetEnabled {
            enabled,
            delete_data,
            done,
        })?;
        rx.await.map_err(|_| self.closed())?
    }

    pub fn sender_suspended(&self) {
        let _ = self.tx.send(ChannelCommand::SenderSuspended);
    }

    pub fn sender_resumed(&self) {
        let _ = self.tx.send(ChannelCommand::SenderResumed);
    }

    pub async fn status(&self) -> ChannelResult<ChannelStatus> {
        let (done, rx) = oneshot::channel();
        self.send(ChannelCommand::Status(done))?;
        rx.await.map_err(|_| self.closed())
    }

    pub fn add_delegate(&self, delegate: Arc<dyn ChannelDelegate>) -> DelegateId {
        self.delegates.add(delegate)
    }

    pub fn remove_delegate(&self, id: DelegateId) -> bool {
        self.delegates.remove(id)
    }

    /// Stop the channel task. In-flight calls are left to the sender;
    /// their rows stay marked until the store is reopened.
    pub async fn shutdown(&self) -> ChannelResult<()> {
        let (done, rx) = oneshot::channel();
        self.send(ChannelCommand::Shutdown { done })?;
        rx.await.map_err(|_| self.closed())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, command: ChannelCommand) -> ChannelResult<()> {
        self.tx.send(command).map_err(|_| self.closed())
    }

    fn closed(&self) -> ChannelError {
        ChannelError::Closed(self.key.to_string())
    }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("key", &self.key)
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct PendingBatch {
    batch_id: BatchId,
    log_ids: Vec<LogId>,
}

struct FlushTimer {
    generation: u64,
    task: JoinHandle<()>,
}

/// Channel state machine. Run it with [`ChannelService::run`].
pub struct ChannelService {
    key: ChannelKey,
    storage_key: String,
    config: ChannelConfiguration,
    services: ChannelServices,
    delegates: Arc<DelegateRegistry<dyn ChannelDelegate>>,
    rx: mpsc::UnboundedReceiver<ChannelCommand>,
    /// Held weakly so the task ends once every handle is dropped.
    mailbox: mpsc::WeakUnboundedSender<ChannelCommand>,

    enabled: bool,
    sender_suspended: bool,
    discard_logs: bool,
    items_count: usize,
    pending: Vec<PendingBatch>,
    pending_batch_queue_full: bool,
    timer: Option<FlushTimer>,
    timer_generation: u64,
}

impl ChannelService {
    pub fn new(
        key: ChannelKey,
        config: ChannelConfiguration,
        services: ChannelServices,
    ) -> (Self, ChannelHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let delegates = Arc::new(DelegateRegistry::new());

        let service = Self {
            storage_key: key.storage_key(),
            key: key.clone(),
            config,
            services,
            delegates: delegates.clone(),
            rx,
            mailbox: tx.downgrade(),
            enabled: true,
            sender_suspended: false,
            discard_logs: false,
            items_count: 0,
            pending: Vec::new(),
            pending_batch_queue_full: false,
            timer: None,
            timer_generation: 0,
        };

        let handle = ChannelHandle { key, tx, delegates };
        (service, handle)
    }

    /// Restore persisted state, then process commands until shutdown or
    /// until every handle is dropped.
    pub async fn run(mut self) {
        self.restore().await;

        while let Some(command) = self.rx.recv().await {
            match command {
                ChannelCommand::Enqueue(record) => self.enqueue(record).await,
                ChannelCommand::Flush { done } => {
                    self.flush_queue(true).await;
                    let _ = done.send(());
                }
                ChannelCommand::FlushTimerFired { generation } => {
                    self.on_timer_fired(generation).await
                }
                ChannelCommand::SendCompleted(completion) => {
                    self.on_send_completed(completion).await
                }
                ChannelCommand::SetEnabled {
                    enabled,
                    delete_data,
                    done,
                } => {
                    let result = self.set_enabled(enabled, delete_data).await;
                    let _ = done.send(result);
                }
                ChannelCommand::SenderSuspended => self.on_sender_suspended(),
                ChannelCommand::SenderResumed => self.on_sender_resumed().await,
                ChannelCommand::Status(reply) => {
                    let _ = reply.send(self.status());
                }
                ChannelCommand::Shutdown { done } => {
                    self.cancel_timer();
                    info!(channel = %self.key, pending = self.pending.len(), "Channel shut down");
                    let _ = done.send(());
                    return;
                }
            }
        }

        self.cancel_timer();
        debug!(channel = %self.key, "Channel handles dropped; task ending");
    }

    fn is_suspended(&self) -> bool {
        !self.enabled || self.sender_suspended
    }

    fn status(&self) -> ChannelStatus {
        ChannelStatus {
            key: self.key.clone(),
            enabled: self.enabled,
            sender_suspended: self.sender_suspended,
            discard_logs: self.discard_logs,
            items_count: self.items_count,
            pending_batches: self.pending.len(),
            pending_batch_queue_full: self.pending_batch_queue_full,
            timer_armed: self.timer.is_some(),
        }
    }

    async fn restore(&mut self) {
        let setting = self.key.enabled_setting_key();
        self.enabled = match self.services.settings.get_bool(&setting).await {
            Ok(value) => value.unwrap_or(true),
            Err(e) => {
                warn!(channel = %self.key, error = %e, "Failed to read enabled flag; assuming enabled");
                true
            }
        };
        self.sender_suspended = self.services.sender.is_suspended();
        self.items_count = self.count_available().await;

        info!(
            channel = %self.key,
            enabled = self.enabled,
            items = self.items_count,
            batch_size = self.config.batch_size_limit,
            "Channel started"
        );

        self.check_pending_logs().await;
    }

    async fn count_available(&self) -> usize {
        match self.services.store.count_available(&self.storage_key).await {
            Ok(count) => count,
            Err(e) => {
                warn!(channel = %self.key, error = %e, "Failed to count stored records");
                0
            }
        }
    }

    /// Flush a full batch now, or arm the timer for a partial one.
    async fn check_pending_logs(&mut self) {
        if self.is_suspended() {
            return;
        }
        if self.items_count >= self.config.batch_size_limit {
            self.flush_queue(false).await;
        } else if self.items_count > 0 && self.timer.is_none() {
            self.arm_timer();
        }
    }

    async fn enqueue(&mut self, record: LogRecord) {
        if !record.is_valid() {
            self.notify_dropped(&record, DropReason::InvalidRecord);
            return;
        }
        if !self.enabled {
            self.notify_dropped(&record, DropReason::ChannelDisabled);
            return;
        }
        if self.discard_logs {
            self.notify_dropped(&record, DropReason::Discarding);
            return;
        }

        for delegate in self.all_delegates() {
            delegate.on_enqueuing(&self.key, &record);
        }

        let receipt = match self.services.store.save(&self.storage_key, &record).await {
            Ok(receipt) => receipt,
            Err(e) => {
                error!(
                    channel = %self.key,
                    log_id = %record.id(),
                    error = %e,
                    "Failed to persist record; discarding further records"
                );
                self.discard_logs = true;
                self.notify_dropped(&record, DropReason::PersistenceFailure(e.to_string()));
                return;
            }
        };

        self.items_count = (self.items_count + 1).saturating_sub(receipt.evicted_unbatched);
        debug!(
            channel = %self.key,
            log_id = %receipt.log_id,
            items = self.items_count,
            "Record persisted"
        );
        if !receipt.evicted.is_empty() {
            self.notify_evicted(&receipt.evicted);
        }

        if self.items_count >= self.config.batch_size_limit {
            self.flush_queue(false).await;
        } else if self.timer.is_none() && !self.is_suspended() {
            self.arm_timer();
        }
    }

    /// Cut batches and hand them to the sender.
    ///
    /// The first batch is cut regardless of size. After that, batching
    /// continues while a full batch remains, or until the store runs dry
    /// when `drain` is set.
    async fn flush_queue(&mut self, drain: bool) {
        if self.is_suspended() || self.pending_batch_queue_full {
            debug!(
                channel = %self.key,
                suspended = self.is_suspended(),
                queue_full = self.pending_batch_queue_full,
                "Flush skipped"
            );
            return;
        }
        self.cancel_timer();

        let mut first = true;
        while !self.pending_batch_queue_full {
            if !first && !drain && self.items_count < self.config.batch_size_limit {
                break;
            }
            first = false;

            let batch = match self
                .services
                .store
                .load_batch(&self.storage_key, self.config.batch_size_limit)
                .await
            {
                Ok(Some(batch)) => batch,
                Ok(None) => {
                    self.items_count = 0;
                    break;
                }
                Err(e) => {
                    error!(channel = %self.key, error = %e, "Failed to load batch");
                    break;
                }
            };
            self.send_batch(batch);
            // The store may have dropped unreadable rows while cutting.
            self.items_count = self.count_available().await;
        }

        if self.items_count > 0 && !self.pending_batch_queue_full {
            self.arm_timer();
        }
    }

    fn send_batch(&mut self, batch: LogBatch) {
        self.pending.push(PendingBatch {
            batch_id: batch.batch_id.clone(),
            log_ids: batch.log_ids(),
        });
        if self.pending.len() >= self.config.pending_batches_limit {
            self.pending_batch_queue_full = true;
        }

        for delegate in self.all_delegates() {
            delegate.will_send(&self.key, &batch);
        }

        debug!(
            channel = %self.key,
            batch_id = %batch.batch_id,
            count = batch.len(),
            pending = self.pending.len(),
            "Sending batch"
        );

        let mailbox = self.mailbox.clone();
        self.services.sender.send_async(
            batch,
            Box::new(move |completion| {
                if let Some(tx) = mailbox.upgrade() {
                    let _ = tx.send(ChannelCommand::SendCompleted(completion));
                }
            }),
        );
    }

    async fn on_send_completed(&mut self, completion: SendCompletion) {
        let Some(index) = self
            .pending
            .iter()
            .position(|p| p.batch_id == completion.call_id)
        else {
            debug!(channel = %self.key, batch_id = %completion.call_id, "Ignoring completion for unknown batch");
            return;
        };
        let batch = self.pending.remove(index);

        if let Err(e) = self
            .services
            .store
            .delete_batch(&self.storage_key, &batch.batch_id)
            .await
        {
            warn!(channel = %self.key, batch_id = %batch.batch_id, error = %e, "Failed to delete sent batch");
        }
        self.pending_batch_queue_full = false;

        match &completion.outcome {
            SendOutcome::Delivered { status } => {
                debug!(channel = %self.key, batch_id = %batch.batch_id, status, "Batch delivered");
                for delegate in self.all_delegates() {
                    delegate.did_succeed(&self.key, &batch.batch_id, &batch.log_ids);
                }
            }
            SendOutcome::Failed(failure) => {
                warn!(channel = %self.key, batch_id = %batch.batch_id, error = %failure, "Batch discarded");
                for delegate in self.all_delegates() {
                    delegate.did_fail(&self.key, &batch.batch_id, &batch.log_ids, failure);
                }
            }
        }

        if self.is_suspended() {
            return;
        }
        match self
            .services
            .store
            .has_available_batch(&self.storage_key)
            .await
        {
            Ok(true) => self.flush_queue(false).await,
            Ok(false) => {}
            Err(e) => warn!(channel = %self.key, error = %e, "Failed to check for stored records"),
        }
    }

    async fn set_enabled(&mut self, enabled: bool, delete_data: bool) -> ChannelResult<()> {
        let setting = self.key.enabled_setting_key();

        if enabled {
            let was_enabled = self.enabled;
            self.enabled = true;
            self.discard_logs = false;
            self.services.settings.set_bool(&setting, true).await?;
            self.items_count = self.services.store.count_available(&self.storage_key).await?;
            if !was_enabled {
                info!(channel = %self.key, items = self.items_count, "Channel enabled");
            }
            self.check_pending_logs().await;
            return Ok(());
        }

        self.cancel_timer();
        self.enabled = false;
        self.services.settings.set_bool(&setting, false).await?;

        let cancelled: Vec<BatchId> = self.pending.drain(..).map(|p| p.batch_id).collect();
        self.pending_batch_queue_full = false;
        if !cancelled.is_empty() {
            self.services.sender.cancel_calls(&cancelled);
        }

        if delete_data {
            let deleted = self.services.store.delete_all(&self.storage_key).await?;
            self.items_count = 0;
            info!(channel = %self.key, deleted, "Channel disabled; stored records deleted");
        } else {
            for batch_id in &cancelled {
                self.services
                    .store
                    .release_batch(&self.storage_key, batch_id)
                    .await?;
            }
            self.items_count = self.services.store.count_available(&self.storage_key).await?;
            info!(
                channel = %self.key,
                cancelled = cancelled.len(),
                items = self.items_count,
                "Channel disabled"
            );
        }
        Ok(())
    }

    fn on_sender_suspended(&mut self) {
        if !self.sender_suspended {
            debug!(channel = %self.key, "Sender suspended");
        }
        self.sender_suspended = true;
        self.cancel_timer();
    }

    async fn on_sender_resumed(&mut self) {
        if self.sender_suspended {
            debug!(channel = %self.key, "Sender resumed");
        }
        self.sender_suspended = false;
        self.check_pending_logs().await;
    }

    async fn on_timer_fired(&mut self, generation: u64) {
        let current = matches!(&self.timer, Some(timer) if timer.generation == generation);
        if !current {
            return;
        }
        self.timer = None;
        self.flush_queue(false).await;
    }

    fn arm_timer(&mut self) {
        self.cancel_timer();
        let generation = self.timer_generation;
        let delay = self.config.flush_interval();
        let mailbox = self.mailbox.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = mailbox.upgrade() {
                let _ = tx.send(ChannelCommand::FlushTimerFired { generation });
            }
        });
        self.timer = Some(FlushTimer { generation, task });
    }

    /// Abort the running timer. Bumping the generation invalidates a firing
    /// that is already queued in the mailbox.
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.task.abort();
        }
        self.timer_generation = self.timer_generation.wrapping_add(1);
    }

    fn all_delegates(&self) -> Vec<Arc<dyn ChannelDelegate>> {
        let mut delegates = self.delegates.snapshot();
        delegates.extend(self.services.shared_delegates.snapshot());
        delegates
    }

    fn notify_dropped(&self, record: &LogRecord, reason: DropReason) {
        debug!(channel = %self.key, log_id = %record.id(), ?reason, "Record dropped");
        for delegate in self.all_delegates() {
            delegate.on_dropped(&self.key, record, &reason);
        }
    }

    fn notify_evicted(&self, log_ids: &[LogId]) {
        warn!(channel = %self.key, count = log_ids.len(), "Store at capacity; evicted oldest records");
        for delegate in self.all_delegates() {
            delegate.on_evicted(&self.key, log_ids);
        }
    }
}

//! Batch delivery with retry, backoff, and suspension.
//!
//! # Call lifecycle
//!
//! Every batch handed to [`Sender::send_async`] becomes a pending call keyed
//! by its batch id. A call runs one attempt at a time; each attempt is a
//! spawned task owning a [`CancellationToken`]. The token is checked under
//! the state lock before any result is applied, so a cancelled attempt can
//! never complete a call.
//!
//! ```text
//! send_async ──> attempt ──2xx──────────────> Delivered
//!                  │  ├──fatal 4xx──────────> Failed(Fatal)
//!                  │  ├──recoverable──> sleep(intervals[n-1]) ──> attempt
//!                  │  │                    └──exhausted──> Failed(RetriesExhausted)
//!                  │  └──no connectivity──> sender suspended, call kept
//!                  └── cancelled ─────────> handler dropped
//! ```
//!
//! The sender is suspended while any of three sources holds: an explicit
//! [`Sender::suspend`], the network being unreachable, or the sender being
//! disabled. Entering suspension cancels every attempt but keeps the calls;
//! leaving it replays them.

use crate::classify::{classify_attempt, retry_delay, AttemptOutcome};
use crate::reachability::{NetworkStatus, Reachability};
use crate::transport::{header_map, IngestRequest, Transport};
use crate::{SenderError, SenderResult};
use ingest_core::{BatchId, DelegateId, DelegateRegistry, LogBatch, PipelineConfig};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

const DEFAULT_OFFLINE_RECHECK: Duration = Duration::from_secs(10);

/// Identifier of a send call. Always the id of the batch being sent.
pub type CallId = BatchId;

/// Why a call ended without delivery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendFailure {
    /// The collector rejected the request itself; retrying cannot help.
    #[error("Collector rejected batch with HTTP {status}")]
    Fatal { status: u16 },

    /// Every retry interval was used up.
    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// Terminal result of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered { status: u16 },
    Failed(SendFailure),
}

impl SendOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, SendOutcome::Delivered { .. })
    }
}

/// Delivered to the completion handler exactly once per call, unless the
/// call is cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendCompletion {
    pub call_id: CallId,
    pub outcome: SendOutcome,
}

pub type CompletionHandler = Box<dyn FnOnce(SendCompletion) + Send + 'static>;

/// Observer of sender-wide suspension.
pub trait SenderDelegate: Send + Sync {
    fn on_suspended(&self) {}

    fn on_resumed(&self) {}
}

/// Network delivery contract used by channels.
pub trait Sender: Send + Sync {
    /// Start delivering `batch`. The returned id equals `batch.batch_id`.
    fn send_async(&self, batch: LogBatch, handler: CompletionHandler) -> CallId;

    /// Cancel calls. Their handlers are dropped without being invoked.
    fn cancel_calls(&self, call_ids: &[CallId]);

    fn suspend(&self);

    fn resume(&self);

    fn is_suspended(&self) -> bool;

    /// Disabling suspends the sender; with `delete_data` every pending call
    /// is also cancelled.
    fn set_enabled(&self, enabled: bool, delete_data: bool);

    /// Replace the collector base URL for later attempts.
    fn set_log_url(&self, log_url: &str) -> SenderResult<()>;

    fn add_delegate(&self, delegate: Arc<dyn SenderDelegate>) -> DelegateId;

    fn remove_delegate(&self, id: DelegateId) -> bool;
}

/// Sender configuration.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Collector base URL (scheme + authority).
    pub base_url: Url,
    /// Path appended to the base URL.
    pub api_path: String,
    /// Static headers sent with every request.
    pub headers: BTreeMap<String, String>,
    /// Query-string parameters sent with every request.
    pub query: BTreeMap<String, String>,
    /// Delay before each retry, in order.
    pub retry_intervals: Vec<Duration>,
}

impl SenderConfig {
    pub fn from_pipeline(config: &PipelineConfig) -> SenderResult<Self> {
        let sender = Self {
            base_url: Url::parse(&config.log_url)?,
            api_path: config.api_path.clone(),
            headers: config.headers.clone(),
            query: config.query.clone(),
            retry_intervals: config.retry_intervals(),
        };
        sender.validate()?;
        Ok(sender)
    }

    /// Reject header names or values that cannot go on the wire.
    pub fn validate(&self) -> SenderResult<()> {
        header_map(&self.headers)?;
        Ok(())
    }

    /// Pause before retrying after the transport reported no connectivity
    /// while the reachability service still reported the network up.
    fn offline_recheck_delay(&self) -> Duration {
        self.retry_intervals
            .first()
            .copied()
            .unwrap_or(DEFAULT_OFFLINE_RECHECK)
    }

    /// Full endpoint for `base_url`.
    fn endpoint(&self, base_url: &Url) -> SenderResult<Url> {
        let mut url = base_url.clone();
        if url.cannot_be_a_base() {
            return Err(SenderError::NotABase(base_url.to_string()));
        }
        url.set_path(&self.api_path);
        url.set_query(None);
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(self.query.iter());
        }
        Ok(url)
    }
}

/// Why the sender is suspended. Active only when no source holds.
#[derive(Debug, Default, Clone, Copy)]
struct Suspension {
    requested: bool,
    offline: bool,
    disabled: bool,
}

impl Suspension {
    fn any(&self) -> bool {
        self.requested || self.offline || self.disabled
    }
}

struct PendingCall {
    batch: Arc<LogBatch>,
    handler: Option<CompletionHandler>,
    /// Recoverable failures so far.
    failed_attempts: u32,
    /// Token of the running or scheduled attempt, if any.
    attempt: Option<CancellationToken>,
}

struct State {
    endpoint: Url,
    calls: HashMap<CallId, PendingCall>,
    suspension: Suspension,
    /// Pending exit from transport-detected offline mode.
    recheck: Option<JoinHandle<()>>,
}

enum Transition {
    None,
    Suspended,
    Resumed,
}

struct Inner {
    config: SenderConfig,
    transport: Arc<dyn Transport>,
    reachability: Reachability,
    runtime: Handle,
    state: Mutex<State>,
    delegates: DelegateRegistry<dyn SenderDelegate>,
}

/// HTTP implementation of [`Sender`].
pub struct HttpSender {
    inner: Arc<Inner>,
    reachability_task: JoinHandle<()>,
}

impl HttpSender {
    /// Create a sender. Must be called within a Tokio runtime.
    pub fn new(
        config: SenderConfig,
        transport: Arc<dyn Transport>,
        reachability: Reachability,
    ) -> SenderResult<Self> {
        let runtime = Handle::try_current().map_err(|_| SenderError::NoRuntime)?;
        config.validate()?;
        let endpoint = config.endpoint(&config.base_url)?;

        let mut network = reachability.subscribe();
        let offline = *network.borrow_and_update() == NetworkStatus::Unreachable;

        let inner = Arc::new(Inner {
            config,
            transport,
            reachability,
            runtime: runtime.clone(),
            state: Mutex::new(State {
                endpoint,
                calls: HashMap::new(),
                suspension: Suspension {
                    offline,
                    ..Suspension::default()
                },
                recheck: None,
            }),
            delegates: DelegateRegistry::new(),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let reachability_task = runtime.spawn(async move {
            while network.changed().await.is_ok() {
                let status = *network.borrow_and_update();
                let Some(inner) = weak.upgrade() else { break };
                inner.on_network_status(status);
            }
        });

        info!(endpoint = %inner.state.lock().endpoint, offline, "HTTP sender created");

        Ok(Self {
            inner,
            reachability_task,
        })
    }

    /// Number of calls not yet completed or cancelled.
    pub fn pending_call_count(&self) -> usize {
        self.inner.state.lock().calls.len()
    }

    /// Cancel every call and stop listening for reachability changes.
    pub fn shutdown(&self) {
        self.reachability_task.abort();
        let mut state = self.inner.state.lock();
        if let Some(task) = state.recheck.take() {
            task.abort();
        }
        for (_, call) in state.calls.drain() {
            if let Some(token) = call.attempt {
                token.cancel();
            }
        }
        info!("HTTP sender shut down");
    }
}

impl Drop for HttpSender {
    fn drop(&mut self) {
        self.reachability_task.abort();
        if let Some(task) = self.inner.state.lock().recheck.take() {
            task.abort();
        }
    }
}

impl Sender for HttpSender {
    fn send_async(&self, batch: LogBatch, handler: CompletionHandler) -> CallId {
        let call_id = batch.batch_id.clone();
        let mut state = self.inner.state.lock();

        let call = PendingCall {
            batch: Arc::new(batch),
            handler: Some(handler),
            failed_attempts: 0,
            attempt: None,
        };
        if let Some(previous) = state.calls.insert(call_id.clone(), call) {
            warn!(call_id = %call_id, "Replacing call with duplicate id");
            if let Some(token) = previous.attempt {
                token.cancel();
            }
        }

        if state.suspension.any() {
            debug!(call_id = %call_id, "Sender suspended; call queued");
        } else {
            self.inner.start_attempt(&mut state, &call_id, None);
        }
        call_id
    }

    fn cancel_calls(&self, call_ids: &[CallId]) {
        let mut state = self.inner.state.lock();
        for call_id in call_ids {
            if let Some(call) = state.calls.remove(call_id) {
                if let Some(token) = call.attempt {
                    token.cancel();
                }
                debug!(call_id = %call_id, "Call cancelled");
            }
        }
    }

    fn suspend(&self) {
        self.inner.update_suspension(|s| s.requested = true);
    }

    fn resume(&self) {
        self.inner.update_suspension(|s| s.requested = false);
    }

    fn is_suspended(&self) -> bool {
        self.inner.state.lock().suspension.any()
    }

    fn set_enabled(&self, enabled: bool, delete_data: bool) {
        if !enabled && delete_data {
            let mut state = self.inner.state.lock();
            let dropped = state.calls.len();
            for (_, call) in state.calls.drain() {
                if let Some(token) = call.attempt {
                    token.cancel();
                }
            }
            if dropped > 0 {
                info!(count = dropped, "Dropped pending calls on disable");
            }
        }
        self.inner.update_suspension(|s| s.disabled = !enabled);
        info!(enabled, delete_data, "Sender enabled state changed");
    }

    fn set_log_url(&self, log_url: &str) -> SenderResult<()> {
        let base_url = Url::parse(log_url)?;
        let endpoint = self.inner.config.endpoint(&base_url)?;
        info!(endpoint = %endpoint, "Sender log URL updated");
        self.inner.state.lock().endpoint = endpoint;
        Ok(())
    }

    fn add_delegate(&self, delegate: Arc<dyn SenderDelegate>) -> DelegateId {
        self.inner.delegates.add(delegate)
    }

    fn remove_delegate(&self, id: DelegateId) -> bool {
        self.inner.delegates.remove(id)
    }
}

impl Inner {
    /// Spawn the next attempt of `call_id`, optionally after `delay`.
    fn start_attempt(self: &Arc<Self>, state: &mut State, call_id: &CallId, delay: Option<Duration>) {
        let Some(call) = state.calls.get_mut(call_id) else {
            return;
        };

        let token = CancellationToken::new();
        if let Some(previous) = call.attempt.replace(token.clone()) {
            previous.cancel();
        }

        let inner = Arc::clone(self);
        let call_id = call_id.clone();
        self.runtime.spawn(async move {
            if let Some(delay) = delay {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let Some(request) = inner.build_request(&call_id, &token) else {
                return;
            };

            debug!(call_id = %call_id, url = %request.url, "Sending batch");
            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = inner.transport.post(request) => result,
            };

            inner.apply_result(&call_id, &token, result);
        });
    }

    fn build_request(&self, call_id: &CallId, token: &CancellationToken) -> Option<IngestRequest> {
        let state = self.state.lock();
        if token.is_cancelled() {
            return None;
        }
        let call = state.calls.get(call_id)?;
        Some(IngestRequest {
            url: state.endpoint.clone(),
            headers: self
                .config
                .headers
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            batch: Arc::clone(&call.batch),
        })
    }

    fn apply_result(
        self: &Arc<Self>,
        call_id: &CallId,
        token: &CancellationToken,
        result: Result<u16, crate::TransportError>,
    ) {
        let outcome = classify_attempt(&result);
        let mut state = self.state.lock();

        // A cancelled token means the call was suspended, replaced, or
        // dropped after this attempt started.
        if token.is_cancelled() {
            return;
        }
        let Some(call) = state.calls.get_mut(call_id) else {
            return;
        };

        let completion = match outcome {
            AttemptOutcome::Delivered { status } => {
                info!(call_id = %call_id, status, count = call.batch.len(), "Batch delivered");
                Some(SendOutcome::Delivered { status })
            }
            AttemptOutcome::Fatal { status } => {
                error!(call_id = %call_id, status, count = call.batch.len(), "Batch rejected");
                Some(SendOutcome::Failed(SendFailure::Fatal { status }))
            }
            AttemptOutcome::Recoverable { reason } => {
                call.failed_attempts += 1;
                let attempts = call.failed_attempts;
                match retry_delay(&self.config.retry_intervals, attempts) {
                    Some(delay) => {
                        warn!(
                            call_id = %call_id,
                            attempt = attempts,
                            delay_secs = delay.as_secs_f64(),
                            reason = %reason,
                            "Send failed, retrying"
                        );
                        self.start_attempt(&mut state, call_id, Some(delay));
                        None
                    }
                    None => {
                        error!(call_id = %call_id, attempts, reason = %reason, "Retries exhausted");
                        Some(SendOutcome::Failed(SendFailure::RetriesExhausted {
                            attempts,
                            last_error: reason,
                        }))
                    }
                }
            }
            AttemptOutcome::Offline { reason } => {
                call.attempt = None;
                warn!(call_id = %call_id, reason = %reason, "No connectivity; suspending sender");
                drop(state);
                self.set_offline(true);
                self.schedule_recheck();
                return;
            }
            AttemptOutcome::Cancelled => {
                call.attempt = None;
                return;
            }
        };

        let Some(outcome) = completion else {
            return;
        };
        let handler = state
            .calls
            .remove(call_id)
            .and_then(|mut call| call.handler.take());
        drop(state);

        if let Some(handler) = handler {
            handler(SendCompletion {
                call_id: call_id.clone(),
                outcome,
            });
        }
    }

    fn set_offline(self: &Arc<Self>, offline: bool) {
        self.update_suspension(|s| s.offline = offline);
    }

    /// The reachability service is authoritative: its reports replace any
    /// transport-detected offline state.
    fn on_network_status(self: &Arc<Self>, status: NetworkStatus) {
        if let Some(task) = self.state.lock().recheck.take() {
            task.abort();
        }
        self.set_offline(status == NetworkStatus::Unreachable);
    }

    /// Leave transport-detected offline mode after a pause, unless the
    /// reachability service reports the network down by then.
    fn schedule_recheck(self: &Arc<Self>) {
        let delay = self.config.offline_recheck_delay();
        let weak = Arc::downgrade(self);
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else { return };
            if inner.reachability.is_reachable() {
                debug!("Rechecking connectivity");
                inner.set_offline(false);
            }
        });
        if let Some(previous) = self.state.lock().recheck.replace(task) {
            previous.abort();
        }
    }

    /// Apply a change to the suspension sources and act on the transition.
    fn update_suspension(self: &Arc<Self>, change: impl FnOnce(&mut Suspension)) {
        let transition = {
            let mut state = self.state.lock();
            let was = state.suspension.any();
            change(&mut state.suspension);
            let is = state.suspension.any();

            match (was, is) {
                (false, true) => {
                    for call in state.calls.values_mut() {
                        if let Some(token) = call.attempt.take() {
                            token.cancel();
                        }
                    }
                    info!(sources = ?state.suspension, pending = state.calls.len(), "Sender suspended");
                    Transition::Suspended
                }
                (true, false) => {
                    let call_ids: Vec<CallId> = state.calls.keys().cloned().collect();
                    info!(pending = call_ids.len(), "Sender resumed; replaying pending calls");
                    for call_id in &call_ids {
                        self.start_attempt(&mut state, call_id, None);
                    }
                    Transition::Resumed
                }
                _ => Transition::None,
            }
        };

        match transition {
            Transition::Suspended => {
                for delegate in self.delegates.snapshot() {
                    delegate.on_suspended();
                }
            }
            Transition::Resumed => {
                for delegate in self.delegates.snapshot() {
                    delegate.on_resumed();
                }
            }
            Transition::None => {}
        }
    }
}

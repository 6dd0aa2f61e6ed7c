//! Channel observer surface.

use ingest_core::{BatchId, ChannelKey, LogBatch, LogId, LogRecord};
use ingest_sender::SendFailure;

/// Why a record was not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The channel is disabled.
    ChannelDisabled,
    /// The channel is discarding after an earlier persistence failure.
    Discarding,
    /// The store rejected the record.
    PersistenceFailure(String),
    /// The record has no type tag.
    InvalidRecord,
}

/// Observer of one or more channels.
///
/// Callbacks run on the channel's task and should return quickly. Every
/// method has an empty default.
pub trait ChannelDelegate: Send + Sync {
    /// A record is about to be persisted.
    fn on_enqueuing(&self, _key: &ChannelKey, _record: &LogRecord) {}

    fn on_dropped(&self, _key: &ChannelKey, _record: &LogRecord, _reason: &DropReason) {}

    /// Stored records were deleted to keep the store under its capacity.
    fn on_evicted(&self, _key: &ChannelKey, _log_ids: &[LogId]) {}

    /// A batch is about to be handed to the sender.
    fn will_send(&self, _key: &ChannelKey, _batch: &LogBatch) {}

    fn did_succeed(&self, _key: &ChannelKey, _batch_id: &BatchId, _log_ids: &[LogId]) {}

    /// The batch was discarded after a fatal response or exhausted retries.
    fn did_fail(
        &self,
        _key: &ChannelKey,
        _batch_id: &BatchId,
        _log_ids: &[LogId],
        _failure: &SendFailure,
    ) {
    }
}

//! Channel and manager error types.

use ingest_core::CoreError;
use ingest_sender::SenderError;
use ingest_storage::StorageError;
use thiserror::Error;

/// Channel error type.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Store failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Sender configuration failure
    #[error("Sender error: {0}")]
    Sender(#[from] SenderError),

    /// Configuration or path failure
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// The channel task has stopped.
    #[error("Channel {0} is closed")]
    Closed(String),

    /// Created outside a Tokio runtime
    #[error("No Tokio runtime available")]
    NoRuntime,
}

/// Result type alias using ChannelError.
pub type ChannelResult<T> = Result<T, ChannelError>;

//! Core types, configuration, and utilities for the ingest pipeline.
//!
//! Every other crate in the workspace builds on these definitions:
//! - [`LogRecord`], [`LogBatch`], and the id newtypes that flow from producers
//!   through the store and out to the sender
//! - [`Priority`] and [`ChannelKey`], which route records to channels
//! - [`ChannelConfiguration`] and [`PipelineConfig`]
//! - [`DelegateRegistry`], the observer list used by channels and senders

mod config;
mod delegates;
mod error;
mod logging;
mod paths;
mod types;

pub use config::{
    ChannelConfiguration, PipelineConfig, StorageSettings, DEFAULT_API_PATH, DEFAULT_LOG_LEVEL,
    DEFAULT_LOG_URL,
};
pub use delegates::{DelegateId, DelegateRegistry};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, init_logging_with_file};
pub use observability::InitError as LoggingInitError;
pub use paths::Paths;
pub use types::{BatchId, ChannelKey, GroupId, LogBatch, LogId, LogRecord, Priority};

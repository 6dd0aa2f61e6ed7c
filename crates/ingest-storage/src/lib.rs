//! Durable record store for the ingest pipeline.
//!
//! Records are kept in independent FIFO buckets, one per storage key. A
//! bucket never grows past its ceiling: the oldest rows are evicted at write
//! time. Rows handed out in a batch stay marked until the batch is deleted or
//! released, so a record is never part of two in-flight batches.
//!
//! Two implementations share the [`LogStore`] and [`SettingsStore`] traits:
//! - [`SqliteLogStore`]: durable, all I/O on one executor thread
//! - [`MemoryLogStore`]: non-durable, for tests and ephemeral use

mod error;
mod executor;
mod memory;
mod migrations;
mod queries;
mod sqlite;
mod store;

pub use error::{StorageError, StorageResult};
pub use executor::AsyncDatabase;
pub use memory::MemoryLogStore;
pub use migrations::CURRENT_VERSION as SCHEMA_VERSION;
pub use sqlite::SqliteLogStore;
pub use store::{LogStore, SaveReceipt, SettingsStore, StoreConfig};

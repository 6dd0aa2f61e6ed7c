//! Channels and routing for the ingest pipeline.
//!
//! A [`LogManager`] accepts records from producers and routes each one to the
//! channel for its `(priority, group)` pair. Each channel persists records,
//! cuts them into batches by size or timer, and hands batches to the sender,
//! keeping at most a fixed number of batches in flight.

mod channel;
mod delegate;
mod error;
mod manager;

#[cfg(test)]
mod tests;

pub use channel::{ChannelCommand, ChannelHandle, ChannelService, ChannelServices, ChannelStatus};
pub use delegate::{ChannelDelegate, DropReason};
pub use error::{ChannelError, ChannelResult};
pub use manager::LogManager;

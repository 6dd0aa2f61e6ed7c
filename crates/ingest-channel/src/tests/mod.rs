//! Behavior tests for channels and the log manager.
//!
//! - `harness.rs`     - Scripted transport, recording delegate, failing store
//! - `batching.rs`    - Threshold and timer flushes, external flush
//! - `completion.rs`  - Delivered, fatal, and exhausted batches
//! - `backpressure.rs` - Pending batch ceiling
//! - `enablement.rs`  - Disable, delete, re-enable, persistence failures
//! - `persistence.rs` - Recovery from the SQLite store across restarts
//! - `connectivity.rs` - Sender suspension and replay
//! - `manager.rs`     - Routing, delegates, and control fan-out

mod backpressure;
mod connectivity;
mod enablement;
mod persistence;

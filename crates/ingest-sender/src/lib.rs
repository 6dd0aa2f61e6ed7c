//! HTTP delivery for the ingest pipeline.
//!
//! [`HttpSender`] takes batches from channels and delivers them with:
//! - result classification into success, fatal, recoverable, and offline
//! - retries on a fixed sequence of backoff intervals
//! - sender-wide suspension while the network is unreachable, with replay of
//!   held calls once [`Reachability`] reports the network back
//!
//! The network itself sits behind the [`Transport`] trait;
//! [`ReqwestTransport`] is the production implementation.

mod classify;
mod error;
mod reachability;
mod sender;
mod transport;

pub use classify::{classify_attempt, classify_status, retry_delay, AttemptOutcome, StatusClass};
pub use error::{SenderError, SenderResult, TransportError};
pub use reachability::{NetworkStatus, Reachability};
pub use sender::{
    CallId, CompletionHandler, HttpSender, SendCompletion, SendFailure, SendOutcome, Sender,
    SenderConfig, SenderDelegate,
};
pub use transport::{redact_secret, IngestRequest, LogContainer, ReqwestTransport, Transport};

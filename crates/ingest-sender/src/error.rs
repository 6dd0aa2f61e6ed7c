//! Sender error types.

use thiserror::Error;

/// Errors raised while configuring a sender.
#[derive(Error, Debug)]
pub enum SenderError {
    /// URL parsing error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The URL parsed but cannot carry an API path.
    #[error("URL cannot be used as a base: {0}")]
    NotABase(String),

    /// HTTP client construction error
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    /// Header name or value rejected by the HTTP layer
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Created outside a Tokio runtime
    #[error("No Tokio runtime available")]
    NoRuntime,
}

/// Result type alias using SenderError.
pub type SenderResult<T> = Result<T, SenderError>;

/// Failure of a single network attempt, before classification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The device has no usable network path.
    #[error("No connectivity: {0}")]
    NoConnectivity(String),

    /// The request did not finish within the timeout.
    #[error("Request timed out")]
    Timeout,

    /// The request was aborted locally.
    #[error("Request cancelled")]
    Cancelled,

    /// Any other network-level failure (reset, refused, protocol error).
    #[error("Transport error: {0}")]
    Other(String),
}

//! HTTP transport.
//!
//! One [`Transport::post`] call is one network attempt. Retry, backoff, and
//! suspension live in the sender.

use crate::{SenderError, SenderResult, TransportError};
use async_trait::async_trait;
use ingest_core::{LogBatch, LogRecord};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde::Serialize;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Characters of a secret left visible in logs.
const VISIBLE_SECRET_CHARS: usize = 8;

/// One delivery attempt.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// Full endpoint, including API path and query string.
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub batch: Arc<LogBatch>,
}

/// Wire body: `{"logs": [...]}`.
#[derive(Serialize)]
pub struct LogContainer<'a> {
    pub logs: &'a [LogRecord],
}

impl IngestRequest {
    pub fn body(&self) -> LogContainer<'_> {
        LogContainer {
            logs: &self.batch.records,
        }
    }
}

/// Performs a single POST and reports the HTTP status.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, request: IngestRequest) -> Result<u16, TransportError>;
}

/// Mask all but the last 8 characters of a secret.
///
/// Values of 8 characters or fewer are fully masked.
pub fn redact_secret(value: &str) -> String {
    let len = value.chars().count();
    if len <= VISIBLE_SECRET_CHARS {
        return "*".repeat(len);
    }
    let hidden = len - VISIBLE_SECRET_CHARS;
    let visible: String = value.chars().skip(hidden).collect();
    format!("{}{}", "*".repeat(hidden), visible)
}

/// [`Transport`] over a shared `reqwest` client.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> SenderResult<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(default_headers)
            .build()?;

        Ok(Self { client })
    }
}

/// Parse static headers into their wire form.
pub(crate) fn header_map<'a, I>(headers: I) -> Result<HeaderMap, SenderError>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| SenderError::InvalidHeader(format!("{}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| SenderError::InvalidHeader(format!("{}: {}", name, e)))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn post(&self, request: IngestRequest) -> Result<u16, TransportError> {
        let headers = header_map(request.headers.iter().map(|(name, value)| (name, value)))
            .map_err(|e| TransportError::Other(e.to_string()))?;

        debug!(
            url = %request.url,
            batch_id = %request.batch.batch_id,
            count = request.batch.len(),
            headers = ?request
                .headers
                .iter()
                .map(|(name, value)| format!("{}: {}", name, redact_secret(value)))
                .collect::<Vec<_>>(),
            "Posting batch"
        );

        let response = self
            .client
            .post(request.url.clone())
            .headers(headers)
            .json(&request.body())
            .send()
            .await
            .map_err(map_reqwest_error)?;

        Ok(response.status().as_u16())
    }
}

/// Map a `reqwest` failure onto the transport taxonomy.
///
/// Only connect failures whose OS error says the network itself is down
/// count as no connectivity. DNS failures, refusals, and TLS errors are
/// specific to the collector and are retried.
fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        return TransportError::Timeout;
    }

    if error.is_connect() && means_offline(io_error_kind(&error)) {
        TransportError::NoConnectivity(error.to_string())
    } else {
        TransportError::Other(error.to_string())
    }
}

fn means_offline(kind: Option<io::ErrorKind>) -> bool {
    matches!(
        kind,
        Some(io::ErrorKind::NetworkUnreachable)
            | Some(io::ErrorKind::HostUnreachable)
            | Some(io::ErrorKind::NotConnected)
    )
}

fn io_error_kind(error: &(dyn std::error::Error + 'static)) -> Option<io::ErrorKind> {
    let mut source = error.source();
    while let Some(err) = source {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = err.source();
    }
    None
}

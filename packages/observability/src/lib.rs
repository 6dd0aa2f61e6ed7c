//! # Observability
//!
//! Logging setup shared by the ingest crates.
//!
//! Library code only emits `tracing` events. The embedding process calls
//! [`init_with_config`] once and decides where those events go:
//!
//! - compact human-readable output on stderr (the default)
//! - structured JSONL appended to a file, one object per line, which can be
//!   followed with `tail -f pipeline.jsonl | jq`
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "ingest".into(),
//!     default_level: "debug".into(),
//!     log_path: Some("/tmp/ingest/pipeline.jsonl".into()),
//!     also_stderr: true,
//! })?;
//! ```
//!
//! `RUST_LOG` overrides the configured default level.

mod file;
mod json_layer;

use std::path::PathBuf;

pub use file::{FileLogWriter, WriterFactory};
pub use json_layer::{JsonLayer, LogEntry};

/// Errors raised while installing the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("failed to open log file {path}: {source}")]
    OpenLogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A global subscriber was installed earlier in this process.
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the embedding service, written into every JSONL line.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// JSONL output file. When unset, logs go to stderr only.
    pub log_path: Option<PathBuf>,

    /// Also emit compact logs to stderr when writing to a file.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "ingest".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize logging with default settings for a service.
pub fn init(service_name: &str) -> Result<(), InitError> {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    })
}

/// Initialize logging with custom configuration.
///
/// Returns [`InitError::AlreadyInitialized`] when a subscriber is already
/// installed, so tests and embedding applications can call this freely.
pub fn init_with_config(config: LogConfig) -> Result<(), InitError> {
    match &config.log_path {
        Some(path) => file::init_file_subscriber(&config, path),
        None => {
            use tracing_subscriber::util::SubscriberInitExt;
            tracing_subscriber::fmt()
                .with_env_filter(env_filter(&config.default_level))
                .with_target(true)
                .compact()
                .finish()
                .try_init()
                .map_err(|_| InitError::AlreadyInitialized)
        }
    }
}

/// Build the env filter from `RUST_LOG`, falling back to `default_level`.
pub(crate) fn env_filter(default_level: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level))
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

pub use tracing::Level;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "ingest");
        assert_eq!(config.default_level, "info");
        assert!(config.log_path.is_none());
        assert!(!config.also_stderr);
    }

    #[test]
    fn parse_level_is_case_insensitive() {
        assert_eq!(parse_level("TRACE"), Level::TRACE);
        assert_eq!(parse_level("Debug"), Level::DEBUG);
        assert_eq!(parse_level("warning"), Level::WARN);
        assert_eq!(parse_level("ERROR"), Level::ERROR);
    }

    #[test]
    fn parse_level_unknown_defaults_to_info() {
        assert_eq!(parse_level(""), Level::INFO);
        assert_eq!(parse_level("verbose"), Level::INFO);
    }
}

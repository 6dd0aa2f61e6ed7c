//! Logging initialization for the pipeline.
//!
//! Thin wrappers over the observability crate so embedding applications get
//! the same output format without depending on it directly.

use crate::Paths;
use observability::{InitError, LogConfig};

const SERVICE_NAME: &str = "ingest";

/// Initialize compact stderr logging.
///
/// `RUST_LOG` overrides `level`. Returns an error when a global subscriber is
/// already installed.
pub fn init_logging(level: &str) -> Result<(), InitError> {
    observability::init_with_config(LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: level.into(),
        ..Default::default()
    })
}

/// Initialize JSONL logging to [`Paths::log_file`], mirrored to stderr.
pub fn init_logging_with_file(paths: &Paths, level: &str) -> Result<(), InitError> {
    observability::init_with_config(LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: level.into(),
        log_path: Some(paths.log_file()),
        also_stderr: true,
    })
}

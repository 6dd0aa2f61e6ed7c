//! Configuration management for the ingest pipeline.

use crate::{CoreError, CoreResult, Paths, Priority};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default collector base URL.
pub const DEFAULT_LOG_URL: &str = "https://in.ingest.dev";

/// Default API path appended to the base URL.
pub const DEFAULT_API_PATH: &str = "/logs";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default per-bucket row ceiling.
const DEFAULT_BUCKET_CAPACITY: usize = 50;

/// Default database size ceiling (10 MiB).
const DEFAULT_MAX_DATABASE_BYTES: u64 = 10 * 1024 * 1024;

/// Batching policy of one channel.
///
/// # Fields
///
/// - `batch_size_limit`: records that trigger an immediate flush
/// - `flush_interval_ms`: how long a partial batch may wait
/// - `pending_batches_limit`: batches allowed in flight at once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfiguration {
    pub batch_size_limit: usize,
    pub flush_interval_ms: u64,
    pub pending_batches_limit: usize,
}

impl ChannelConfiguration {
    pub fn new(batch_size_limit: usize, flush_interval: Duration, pending_batches_limit: usize) -> Self {
        Self {
            batch_size_limit: batch_size_limit.max(1),
            flush_interval_ms: flush_interval.as_millis() as u64,
            pending_batches_limit: pending_batches_limit.max(1),
        }
    }

    /// Built-in policy for a priority.
    pub fn for_priority(priority: Priority) -> Self {
        match priority {
            Priority::Background => Self::new(100, Duration::from_secs(60), 1),
            Priority::Default => Self::new(50, Duration::from_secs(3), 3),
            Priority::High => Self::new(10, Duration::from_secs(1), 6),
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl Default for ChannelConfiguration {
    fn default() -> Self {
        Self::for_priority(Priority::Default)
    }
}

/// Store sizing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Row ceiling per storage bucket; oldest rows are evicted beyond it.
    #[serde(default = "default_bucket_capacity")]
    pub bucket_capacity: usize,
    /// Ceiling for the whole database file.
    #[serde(default = "default_max_database_bytes")]
    pub max_database_bytes: u64,
}

fn default_bucket_capacity() -> usize {
    DEFAULT_BUCKET_CAPACITY
}

fn default_max_database_bytes() -> u64 {
    DEFAULT_MAX_DATABASE_BYTES
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            bucket_capacity: DEFAULT_BUCKET_CAPACITY,
            max_database_bytes: DEFAULT_MAX_DATABASE_BYTES,
        }
    }
}

/// Main pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Collector base URL (scheme + authority + port).
    #[serde(default = "default_log_url")]
    pub log_url: String,
    /// API path appended to the base URL.
    #[serde(default = "default_api_path")]
    pub api_path: String,
    /// Static headers sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Query-string parameters sent with every request.
    #[serde(default = "default_query")]
    pub query: BTreeMap<String, String>,
    /// Backoff intervals between retries, in seconds.
    #[serde(default = "default_retry_intervals_secs")]
    pub retry_intervals_secs: Vec<u64>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub storage: StorageSettings,
    /// Channel policy overrides by priority.
    #[serde(default)]
    pub channels: BTreeMap<Priority, ChannelConfiguration>,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_log_url() -> String {
    DEFAULT_LOG_URL.to_string()
}

fn default_api_path() -> String {
    DEFAULT_API_PATH.to_string()
}

fn default_query() -> BTreeMap<String, String> {
    BTreeMap::from([("api-version".to_string(), "1.0.0".to_string())])
}

fn default_retry_intervals_secs() -> Vec<u64> {
    vec![10, 20, 40]
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_url: default_log_url(),
            api_path: default_api_path(),
            headers: BTreeMap::new(),
            query: default_query(),
            retry_intervals_secs: default_retry_intervals_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            storage: StorageSettings::default(),
            channels: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    /// Create a new config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("INGEST_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(log_url) = std::env::var("INGEST_LOG_URL") {
            self.log_url = log_url;
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        self.log_url()?;
        if self.storage.bucket_capacity == 0 {
            return Err(CoreError::Config(
                "storage.bucket_capacity must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(CoreError::Config(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the collector base URL as a parsed URL.
    pub fn log_url(&self) -> CoreResult<Url> {
        Url::parse(&self.log_url).map_err(CoreError::from)
    }

    pub fn retry_intervals(&self) -> Vec<Duration> {
        self.retry_intervals_secs
            .iter()
            .map(|secs| Duration::from_secs(*secs))
            .collect()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Channel policy for a priority, honoring overrides.
    pub fn channel_configuration(&self, priority: Priority) -> ChannelConfiguration {
        self.channels
            .get(&priority)
            .copied()
            .unwrap_or_else(|| ChannelConfiguration::for_priority(priority))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.log_url, DEFAULT_LOG_URL);
        assert_eq!(config.api_path, DEFAULT_API_PATH);
        assert_eq!(config.query.get("api-version").map(String::as_str), Some("1.0.0"));
        assert_eq!(
            config.retry_intervals(),
            vec![
                Duration::from_secs(10),
                Duration::from_secs(20),
                Duration::from_secs(40)
            ]
        );
        assert_eq!(config.storage.bucket_capacity, 50);
        assert_eq!(config.storage.max_database_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_channel_configuration_per_priority() {
        let background = ChannelConfiguration::for_priority(Priority::Background);
        assert_eq!(background.batch_size_limit, 100);
        assert_eq!(background.flush_interval(), Duration::from_secs(60));
        assert_eq!(background.pending_batches_limit, 1);

        let high = ChannelConfiguration::for_priority(Priority::High);
        assert_eq!(high.batch_size_limit, 10);
        assert_eq!(high.flush_interval(), Duration::from_secs(1));
        assert_eq!(high.pending_batches_limit, 6);

        assert_eq!(ChannelConfiguration::default().batch_size_limit, 50);
    }

    #[test]
    fn test_channel_configuration_clamps_zero_limits() {
        let config = ChannelConfiguration::new(0, Duration::from_millis(10), 0);
        assert_eq!(config.batch_size_limit, 1);
        assert_eq!(config.pending_batches_limit, 1);
    }

    #[test]
    fn test_config_load_from_file_with_overrides() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        let config_json = r#"{
            "log_level": "debug",
            "retry_intervals_secs": [1, 2],
            "storage": { "bucket_capacity": 5 },
            "channels": {
                "high": { "batch_size_limit": 3, "flush_interval_ms": 5000, "pending_batches_limit": 2 }
            }
        }"#;
        std::fs::write(&config_path, config_json).unwrap();

        let config = PipelineConfig::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.retry_intervals_secs, vec![1, 2]);
        assert_eq!(config.storage.bucket_capacity, 5);
        assert_eq!(config.storage.max_database_bytes, 10 * 1024 * 1024);

        let high = config.channel_configuration(Priority::High);
        assert_eq!(high.batch_size_limit, 3);
        assert_eq!(high.flush_interval(), Duration::from_secs(5));
        // Priorities without overrides keep the built-in policy
        assert_eq!(
            config.channel_configuration(Priority::Default),
            ChannelConfiguration::for_priority(Priority::Default)
        );
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let mut config = PipelineConfig::default();
        config.log_level = "trace".to_string();
        config
            .headers
            .insert("App-Secret".to_string(), "secret-value".to_string());
        config.save(&paths).unwrap();

        let loaded = PipelineConfig::load(&paths).unwrap();
        assert_eq!(loaded.headers.get("App-Secret").unwrap(), "secret-value");
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = PipelineConfig::load(&paths).unwrap();
        assert_eq!(config.api_path, DEFAULT_API_PATH);
    }

    #[test]
    fn test_config_invalid_url() {
        let mut config = PipelineConfig::default();
        config.log_url = "not a valid url".to_string();

        assert!(config.log_url().is_err());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_rejects_zero_capacity() {
        let mut config = PipelineConfig::default();
        config.storage.bucket_capacity = 0;

        let err = config.validate().unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }
}

//! Core types for the ingest pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::CoreError;

/// Unique identifier for a log record (UUID string).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogId(pub String);

impl LogId {
    /// Creates a new random log ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Creates a log ID from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the log ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LogId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LogId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for LogId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a batch handed to the sender.
///
/// The sender uses the batch ID as its call ID, so a completion can always be
/// correlated back to the exact set of stored records.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub String);

impl BatchId {
    /// Creates a new random batch ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Creates a batch ID from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the batch ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a logical log stream (a feature's log category).
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub String);

impl GroupId {
    /// Creates a group ID from a string.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the group ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for GroupId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for GroupId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Processing priority of a record.
///
/// Selects which channel (and therefore which batching and network policy)
/// handles the record. Orthogonal to the group.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Background,
    Default,
    High,
}

impl Priority {
    /// All priorities, lowest first.
    pub const ALL: [Priority; 3] = [Priority::Background, Priority::Default, Priority::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Background => "background",
            Priority::Default => "default",
            Priority::High => "high",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Default
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "background" => Ok(Priority::Background),
            "default" => Ok(Priority::Default),
            "high" => Ok(Priority::High),
            other => Err(CoreError::UnknownPriority(other.to_string())),
        }
    }
}

/// Identifies one channel: a (priority, group) pair.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ChannelKey {
    pub priority: Priority,
    pub group: GroupId,
}

impl ChannelKey {
    pub fn new(priority: Priority, group: impl Into<GroupId>) -> Self {
        Self {
            priority,
            group: group.into(),
        }
    }

    /// Name of the store bucket owned by this channel.
    ///
    /// Channels for the same group at different priorities own disjoint buckets.
    pub fn storage_key(&self) -> String {
        format!("{}/{}", self.group, self.priority)
    }

    /// Settings key under which this channel's `enabled` flag is persisted.
    pub fn enabled_setting_key(&self) -> String {
        format!("channel.enabled.{}", self.storage_key())
    }
}

impl std::fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.group, self.priority)
    }
}

/// A structured log record submitted by a producer.
///
/// The pipeline never interprets the payload; it only tracks identity and
/// count. Fields are private so a record cannot change once it has been
/// handed to the pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    id: LogId,
    #[serde(rename = "type")]
    log_type: String,
    /// Milliseconds between the record's emission and its submission.
    #[serde(rename = "toffset")]
    timestamp_offset_ms: i64,
    #[serde(rename = "sid", default, skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
    #[serde(default)]
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl LogRecord {
    /// Creates a record with a fresh ID.
    pub fn new(log_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: LogId::new(),
            log_type: log_type.into(),
            timestamp_offset_ms: 0,
            session_id: None,
            payload,
            created_at: Utc::now(),
        }
    }

    /// Sets the correlation/session identifier.
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Sets the logical timestamp offset in milliseconds.
    pub fn with_timestamp_offset(mut self, offset_ms: i64) -> Self {
        self.timestamp_offset_ms = offset_ms;
        self
    }

    pub fn id(&self) -> &LogId {
        &self.id
    }

    pub fn log_type(&self) -> &str {
        &self.log_type
    }

    pub fn timestamp_offset_ms(&self) -> i64 {
        self.timestamp_offset_ms
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// A record is valid when it carries a non-empty type tag.
    pub fn is_valid(&self) -> bool {
        !self.log_type.trim().is_empty()
    }
}

/// An ordered set of stored records submitted to the sender under one ID.
#[derive(Clone, Debug)]
pub struct LogBatch {
    /// Unique batch ID, also used as the sender call ID.
    pub batch_id: BatchId,
    /// Store bucket the records were loaded from.
    pub storage_key: String,
    /// Records in insertion order.
    pub records: Vec<LogRecord>,
}

impl LogBatch {
    /// Get the log IDs in this batch.
    pub fn log_ids(&self) -> Vec<LogId> {
        self.records.iter().map(|r| r.id().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

//! Storage error types.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Storage error type.
#[derive(Error, Debug)]
pub enum StorageError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Executor thread or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The database was found corrupt; writes are discarded.
    #[error("Store is degraded after corruption; writes are discarded")]
    Degraded,
}

impl StorageError {
    fn sqlite_code(&self) -> Option<ErrorCode> {
        match self {
            StorageError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => Some(e.code),
            _ => None,
        }
    }

    /// True when SQLite reports the file is not a usable database.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self.sqlite_code(),
            Some(ErrorCode::DatabaseCorrupt) | Some(ErrorCode::NotADatabase)
        )
    }

    /// True when the database reached its size ceiling.
    pub fn is_full(&self) -> bool {
        matches!(self.sqlite_code(), Some(ErrorCode::DiskFull))
    }
}

/// Result type alias using StorageError.
pub type StorageResult<T> = Result<T, StorageError>;

//! DDSS error types
//!
//! Three request-level outcomes: `Unauthorized` and `BadRequest` are
//! client-correctable, `Storage` aborts the current action only. Nothing is
//! retried inside the engine.

use thiserror::Error;

/// Failures of the persistence layer (pool, SQLite, schema migration).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("record store lock poisoned")]
    Poisoned,
}

/// Error returned by every engine action.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ScheduleError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// HTTP status equivalent of this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthorized(_) => 401,
            Self::BadRequest(_) => 400,
            Self::Storage(_) => 500,
        }
    }

    /// Message surfaced to the caller.
    ///
    /// Storage details stay in the logs; callers only learn that the
    /// action failed.
    pub fn public_message(&self) -> &str {
        match self {
            Self::Unauthorized(message) | Self::BadRequest(message) => message,
            Self::Storage(_) => "Storage failure",
        }
    }
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Result type for engine actions
pub type Result<T> = std::result::Result<T, ScheduleError>;

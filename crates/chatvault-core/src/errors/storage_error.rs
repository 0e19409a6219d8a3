//! Storage-layer errors for routed SQLite operations.

use std::fmt;

use super::error_code::{self, ErrorCode};

/// One source that failed during a cross-source call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub source_name: String,
    pub message: String,
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source_name, self.message)
    }
}

/// Errors that can occur while configuring, routing or executing against sources.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Read-only violation: source '{source_name}' rejects writes")]
    ReadOnlyViolation { source_name: String },

    #[error("Unknown data source: '{name}'")]
    UnknownSource { name: String },

    #[error("Failed to open source '{source_name}': {source}")]
    ConnectionFailed {
        source_name: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Connection to source '{source_name}' is closed")]
    ConnectionClosed { source_name: String },

    #[error("Connection lock poisoned for source '{source_name}'")]
    LockPoisoned { source_name: String },

    #[error("Timed out after {waited_ms}ms waiting for source '{source_name}'")]
    LockTimeout { source_name: String, waited_ms: u64 },

    #[error("Every source failed during aggregation: {}", join_failures(.failures))]
    AggregationFailed { failures: Vec<SourceFailure> },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error reading configuration: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),
}

impl StorageError {
    /// Shorthand for a [`StorageError::Configuration`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether the caller can reasonably retry or reroute after this error.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ReadOnlyViolation { .. }
            | Self::LockTimeout { .. }
            | Self::ConnectionFailed { .. }
            | Self::ConnectionClosed { .. }
            | Self::AggregationFailed { .. } => true,
            Self::Sqlite(e) => is_busy(e),
            _ => false,
        }
    }
}

fn join_failures(failures: &[SourceFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ffi::ErrorCode::DatabaseBusy,
                ..
            },
            _,
        )
    )
}

impl ErrorCode for StorageError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => error_code::CONFIG_ERROR,
            Self::ReadOnlyViolation { .. } => error_code::READ_ONLY_VIOLATION,
            Self::UnknownSource { .. } => error_code::UNKNOWN_SOURCE,
            Self::ConnectionFailed { .. } => error_code::CONNECTION_FAILED,
            Self::ConnectionClosed { .. } => error_code::CONNECTION_CLOSED,
            Self::LockTimeout { .. } => error_code::LOCK_TIMEOUT,
            Self::LockPoisoned { .. } => error_code::LOCK_POISONED,
            Self::AggregationFailed { .. } => error_code::AGGREGATION_FAILED,
            Self::Sqlite(e) if is_busy(e) => error_code::DB_BUSY,
            Self::Sqlite(_) => error_code::STORAGE_ERROR,
            Self::ConfigIo(_) => error_code::IO_ERROR,
            Self::TomlParse(_) | Self::YamlParse(_) => error_code::CONFIG_PARSE_ERROR,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_violation_names_source() {
        let err = StorageError::ReadOnlyViolation {
            source_name: "archive".to_string(),
        };
        assert!(err.to_string().contains("archive"));
        assert_eq!(err.error_code(), error_code::READ_ONLY_VIOLATION);
        assert!(err.is_recoverable());
    }

    #[test]
    fn configuration_error_is_fatal() {
        let err = StorageError::config("no sources defined");
        assert_eq!(err.error_code(), "CONFIG_ERROR");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn aggregation_failure_lists_every_source() {
        let err = StorageError::AggregationFailed {
            failures: vec![
                SourceFailure {
                    source_name: "a".into(),
                    message: "no such table: chats".into(),
                },
                SourceFailure {
                    source_name: "b".into(),
                    message: "disk I/O error".into(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("a: no such table: chats"));
        assert!(msg.contains("b: disk I/O error"));
    }
}

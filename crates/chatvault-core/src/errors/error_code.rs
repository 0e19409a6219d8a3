//! Stable, machine-readable error codes.

pub const CONFIG_ERROR: &str = "CONFIG_ERROR";
pub const CONFIG_PARSE_ERROR: &str = "CONFIG_PARSE_ERROR";
pub const IO_ERROR: &str = "IO_ERROR";
pub const READ_ONLY_VIOLATION: &str = "READ_ONLY_VIOLATION";
pub const UNKNOWN_SOURCE: &str = "UNKNOWN_SOURCE";
pub const CONNECTION_FAILED: &str = "CONNECTION_FAILED";
pub const CONNECTION_CLOSED: &str = "CONNECTION_CLOSED";
pub const LOCK_TIMEOUT: &str = "LOCK_TIMEOUT";
pub const LOCK_POISONED: &str = "LOCK_POISONED";
pub const AGGREGATION_FAILED: &str = "AGGREGATION_FAILED";
pub const DB_BUSY: &str = "DB_BUSY";
pub const STORAGE_ERROR: &str = "STORAGE_ERROR";

/// Implemented by every error enum in the workspace.
pub trait ErrorCode {
    fn error_code(&self) -> &'static str;
}

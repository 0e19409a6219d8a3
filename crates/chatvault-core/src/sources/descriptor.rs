//! A single named source.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the synthetic source created for single-path construction.
pub const DEFAULT_SOURCE_NAME: &str = "default";
/// Advisory number of threads expected to hold a handle on one source.
pub const DEFAULT_POOL_SIZE: usize = 5;
/// Busy / acquisition timeout applied when a source does not set one.
pub const DEFAULT_TIMEOUT_SECONDS: f64 = 5.0;
/// Largest accepted timeout. SQLite's busy timeout is an `i32` of milliseconds.
pub const MAX_TIMEOUT_SECONDS: f64 = (i32::MAX / 1000) as f64;

/// Immutable configuration of one physical database.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDescriptor {
    pub name: String,
    /// Filesystem path, or `:memory:`.
    pub location: PathBuf,
    pub read_only: bool,
    pub pool_size: usize,
    pub timeout_seconds: f64,
}

impl SourceDescriptor {
    /// A writable source with default pool size and timeout.
    pub fn writable(name: impl Into<String>, location: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            location: location.as_ref().to_path_buf(),
            read_only: false,
            pool_size: DEFAULT_POOL_SIZE,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }

    /// A read-only source with default pool size and timeout.
    pub fn read_only(name: impl Into<String>, location: impl AsRef<Path>) -> Self {
        Self {
            read_only: true,
            ..Self::writable(name, location)
        }
    }

    /// The `"default"` source used by single-path construction.
    pub fn legacy(location: impl AsRef<Path>) -> Self {
        Self::writable(DEFAULT_SOURCE_NAME, location)
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: f64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    /// `timeout_seconds` as a `Duration`. Only meaningful after validation.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds)
    }

    pub fn is_in_memory(&self) -> bool {
        self.location.as_os_str() == ":memory:"
    }
}

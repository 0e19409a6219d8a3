//! Per-source health checks.

use chatvault_core::SourceDescriptor;

use crate::connection::PoolManager;

/// Result of checking one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceHealth {
    pub source_name: String,
    pub read_only: bool,
    pub healthy: bool,
    /// "connected", "connected (read-only)", or the failure reason.
    pub detail: String,
}

impl SourceHealth {
    fn ok(source: &SourceDescriptor) -> Self {
        let detail = if source.read_only {
            "connected (read-only)"
        } else {
            "connected"
        };
        Self {
            source_name: source.name.clone(),
            read_only: source.read_only,
            healthy: true,
            detail: detail.to_string(),
        }
    }

    fn unhealthy(source: &SourceDescriptor, detail: impl Into<String>) -> Self {
        Self {
            source_name: source.name.clone(),
            read_only: source.read_only,
            healthy: false,
            detail: detail.into(),
        }
    }
}

/// Health of every source in registry order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreHealth {
    pub sources: Vec<SourceHealth>,
}

impl StoreHealth {
    pub fn is_healthy(&self) -> bool {
        self.sources.iter().all(|s| s.healthy)
    }

    /// Names of sources that failed their check.
    pub fn degraded(&self) -> Vec<&str> {
        self.sources
            .iter()
            .filter(|s| !s.healthy)
            .map(|s| s.source_name.as_str())
            .collect()
    }
}

/// `SELECT 1` through the calling thread's handle for `source`.
pub fn check_source(pools: &PoolManager, source: &SourceDescriptor) -> SourceHealth {
    let result = pools.acquire(&source.name, false).and_then(|handle| {
        handle.with(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
    });
    match result {
        Ok(()) => SourceHealth::ok(source),
        Err(e) => SourceHealth::unhealthy(source, e.to_string()),
    }
}

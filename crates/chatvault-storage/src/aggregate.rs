//! Cross-source fan-out for reads with no routing key.
//!
//! The same query runs against every source in registry order (read-only ones
//! included). A failing source is logged and skipped. Rows are merged and
//! deduplicated by a caller-supplied identity key, first occurrence winning,
//! so the output order is stable for a given set of source results.
//! If every source fails the call fails with [`StorageError::AggregationFailed`].

use std::hash::Hash;

use chatvault_core::{SourceFailure, SourceRegistry, StorageError, StorageResult};
use rusqlite::Connection;
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use crate::connection::PoolManager;

/// Merged rows plus the sources that did not contribute.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateReport<T> {
    pub rows: Vec<T>,
    pub failures: Vec<SourceFailure>,
    /// Number of sources queried.
    pub queried: usize,
}

impl<T> AggregateReport<T> {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.queried - self.failures.len()
    }
}

/// Run `query` on every source in `registry` and merge by `key`.
pub fn fan_out<T, K, Q, KF>(
    registry: &SourceRegistry,
    pools: &PoolManager,
    query: Q,
    key: KF,
) -> StorageResult<AggregateReport<T>>
where
    Q: Fn(&Connection) -> StorageResult<Vec<T>>,
    KF: Fn(&T) -> K,
    K: Eq + Hash,
{
    let mut seen = FxHashSet::default();
    let mut rows = Vec::new();
    let mut failures = Vec::new();

    for source in registry.sources() {
        let result = pools
            .acquire(&source.name, false)
            .and_then(|handle| handle.with(|conn| query(&*conn)));

        match result {
            Ok(batch) => {
                let fetched = batch.len();
                let before = rows.len();
                for row in batch {
                    if seen.insert(key(&row)) {
                        rows.push(row);
                    }
                }
                debug!(
                    source = %source.name,
                    fetched,
                    kept = rows.len() - before,
                    "aggregated source"
                );
            }
            Err(e) => {
                warn!(
                    source = %source.name,
                    error = %e,
                    "source failed during aggregation; skipping"
                );
                failures.push(SourceFailure {
                    source_name: source.name.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    let queried = registry.len();
    if queried > 0 && failures.len() == queried {
        return Err(StorageError::AggregationFailed { failures });
    }

    Ok(AggregateReport {
        rows,
        failures,
        queried,
    })
}

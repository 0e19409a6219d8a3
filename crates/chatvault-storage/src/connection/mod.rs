//! Per-source connection management.
//!
//! Each source gets a [`SourcePool`]: a table of handles keyed by the thread
//! that opened them plus one creation lock. [`PoolManager`] owns one pool per
//! registered source.

pub mod pool;
pub mod pragmas;

pub use pool::{PoolManager, PoolStats, PooledConnection, SourcePool};
pub use pragmas::{configure_connection, configure_readonly_connection, open_connection};

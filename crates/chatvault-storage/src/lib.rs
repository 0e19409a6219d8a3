//! # chatvault-storage
//!
//! Multi-source SQLite routing layer for chat storage.
//! Thread-keyed connection pools per source, read-only enforcement,
//! per-chat routing, cross-source aggregation, legacy single-path mode.

pub mod aggregate;
pub mod connection;
pub mod health;
pub mod migrations;
pub mod queries;
pub mod routing;
pub mod store;

pub use aggregate::AggregateReport;
pub use connection::{PoolManager, PoolStats, PooledConnection, SourcePool};
pub use health::{SourceHealth, StoreHealth};
pub use migrations::{ChatSchema, MigrationRunner};
pub use queries::{ChatRecord, MessageRecord, NewMessage};
pub use routing::{Route, RouteTier, Router};
pub use store::{ChatStore, StoreMode};

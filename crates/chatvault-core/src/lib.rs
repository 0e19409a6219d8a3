//! # chatvault-core
//!
//! Foundation crate for chatvault.
//! Defines the source registry, routing table, config, errors and tracing setup.
//! `chatvault-storage` depends on this.

pub mod config;
pub mod errors;
pub mod sources;
pub mod tracing;

pub use config::{SourceConfig, StorageConfig};
pub use errors::{ErrorCode, SourceFailure, StorageError, StorageResult};
pub use sources::{ChatId, RoutingTable, SourceDescriptor, SourceRegistry};

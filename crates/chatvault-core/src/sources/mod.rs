//! Named SQLite sources and the chat routing table.
//!
//! Built once at startup, immutable afterwards. [`SourceRegistry`] is the only
//! way to obtain a validated set of sources; everything downstream (pools,
//! router, aggregator) borrows it.

mod descriptor;
mod registry;
mod routing_table;

pub use descriptor::{
    SourceDescriptor, DEFAULT_POOL_SIZE, DEFAULT_SOURCE_NAME, DEFAULT_TIMEOUT_SECONDS,
    MAX_TIMEOUT_SECONDS,
};
pub use registry::SourceRegistry;
pub use routing_table::{ChatId, RoutingTable};

//! Per-call source selection.

mod router;

pub use router::{Route, RouteTier, Router};

//! Three-tier router: explicit override, chat mapping, default.
//!
//! Writes never take an explicit source; `resolve_write` has no such
//! parameter. The read-only check runs on every write resolution, so reusing
//! an already-open handle can never bypass it.

use std::fmt;
use std::sync::Arc;

use chatvault_core::{ChatId, SourceRegistry, StorageError, StorageResult};
use tracing::{trace, warn};

/// Which tier produced a [`Route`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteTier {
    Explicit,
    Mapped,
    Default,
}

/// Result of routing one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    /// Caller named the source. Reads only; not validated against the registry here.
    Explicit(&'a str),
    /// The chat's mapped source.
    Mapped(&'a str),
    /// `defaultSource`, either because nothing else applied or because the
    /// chat's mapping named an unknown source.
    Default(&'a str),
}

impl<'a> Route<'a> {
    pub fn source_name(&self) -> &'a str {
        match *self {
            Route::Explicit(name) | Route::Mapped(name) | Route::Default(name) => name,
        }
    }

    pub fn tier(&self) -> RouteTier {
        match self {
            Route::Explicit(_) => RouteTier::Explicit,
            Route::Mapped(_) => RouteTier::Mapped,
            Route::Default(_) => RouteTier::Default,
        }
    }
}

impl fmt::Display for Route<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Explicit(name) => write!(f, "explicit:{name}"),
            Route::Mapped(name) => write!(f, "mapped:{name}"),
            Route::Default(name) => write!(f, "default:{name}"),
        }
    }
}

/// Resolves source names against a shared [`SourceRegistry`].
#[derive(Debug, Clone)]
pub struct Router {
    registry: Arc<SourceRegistry>,
}

impl Router {
    pub fn new(registry: Arc<SourceRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Resolve a read.
    pub fn resolve<'a>(&'a self, chat_id: Option<ChatId>, explicit: Option<&'a str>) -> Route<'a> {
        if let Some(name) = explicit {
            trace!(source = name, "routed by explicit source");
            return Route::Explicit(name);
        }

        let routing = self.registry.routing();
        if let Some(chat_id) = chat_id {
            if let Some(name) = routing.source_for_chat(chat_id) {
                if self.registry.contains(name) {
                    trace!(chat_id, source = name, "routed by chat mapping");
                    return Route::Mapped(name);
                }
                warn!(
                    chat_id,
                    source = name,
                    default = routing.default_source(),
                    "chat mapped to unknown source; falling back to default"
                );
            }
        }

        Route::Default(routing.default_source())
    }

    /// Resolve a write, failing with [`StorageError::ReadOnlyViolation`] when
    /// the target source is read-only.
    pub fn resolve_write(&self, chat_id: Option<ChatId>) -> StorageResult<Route<'_>> {
        let route = self.resolve(chat_id, None);
        let source = self.registry.require(route.source_name())?;
        if source.read_only {
            return Err(StorageError::ReadOnlyViolation {
                source_name: source.name.clone(),
            });
        }
        Ok(route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatvault_core::{RoutingTable, SourceDescriptor};

    fn router() -> Router {
        let routing = RoutingTable::new("primary")
            .with_mapping(111, "archive")
            .with_mapping(333, "primary")
            .with_mapping(444, "decommissioned");
        let registry = SourceRegistry::new(
            vec![
                SourceDescriptor::writable("primary", "p.db"),
                SourceDescriptor::read_only("archive", "a.db"),
            ],
            routing,
        )
        .unwrap();
        Router::new(Arc::new(registry))
    }

    #[test]
    fn explicit_wins_over_mapping() {
        let r = router();
        assert_eq!(r.resolve(Some(111), Some("primary")), Route::Explicit("primary"));
        assert_eq!(r.resolve(None, Some("whatever")), Route::Explicit("whatever"));
    }

    #[test]
    fn mapped_chat_routes_to_its_source() {
        let r = router();
        assert_eq!(r.resolve(Some(111), None), Route::Mapped("archive"));
        assert_eq!(r.resolve(Some(333), None).tier(), RouteTier::Mapped);
    }

    #[test]
    fn unmapped_and_missing_chat_use_default() {
        let r = router();
        assert_eq!(r.resolve(Some(222), None), Route::Default("primary"));
        assert_eq!(r.resolve(None, None), Route::Default("primary"));
    }

    #[test]
    fn mapping_to_unknown_source_falls_back() {
        let r = router();
        assert_eq!(r.resolve(Some(444), None), Route::Default("primary"));
        assert_eq!(r.resolve_write(Some(444)).unwrap(), Route::Default("primary"));
    }

    #[test]
    fn write_to_readonly_mapping_is_violation() {
        let r = router();
        let err = r.resolve_write(Some(111)).unwrap_err();
        assert!(err.to_string().contains("archive"));
        assert!(matches!(err, StorageError::ReadOnlyViolation { .. }));
        assert_eq!(r.resolve_write(Some(222)).unwrap(), Route::Default("primary"));
    }

    #[test]
    fn readonly_default_rejects_unmapped_writes() {
        let registry = SourceRegistry::new(
            vec![
                SourceDescriptor::writable("primary", "p.db"),
                SourceDescriptor::read_only("archive", "a.db"),
            ],
            RoutingTable::new("archive").with_mapping(5, "primary"),
        )
        .unwrap();
        let r = Router::new(Arc::new(registry));
        assert!(matches!(
            r.resolve_write(None),
            Err(StorageError::ReadOnlyViolation { ref source_name }) if source_name == "archive"
        ));
        assert_eq!(r.resolve_write(Some(5)).unwrap(), Route::Mapped("primary"));
    }

    #[test]
    fn route_display() {
        assert_eq!(Route::Mapped("archive").to_string(), "mapped:archive");
        assert_eq!(Route::Default("primary").source_name(), "primary");
    }
}

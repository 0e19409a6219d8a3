//! Validated source set.

use rustc_hash::FxHashMap;
use tracing::warn;

use super::{RoutingTable, SourceDescriptor, MAX_TIMEOUT_SECONDS};
use crate::errors::{StorageError, StorageResult};

/// The validated set of sources and the routing table that points into it.
///
/// Sources are kept sorted by name; that order is the iteration order for
/// aggregation and migrations.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    sources: Vec<SourceDescriptor>,
    index: FxHashMap<String, usize>,
    routing: RoutingTable,
}

impl SourceRegistry {
    /// Validate `sources` and `routing`.
    ///
    /// Fails on: no sources, empty name or location, duplicate names,
    /// non-positive pool size, a timeout that is non-positive, non-finite or
    /// above [`MAX_TIMEOUT_SECONDS`], or a default source that is not
    /// configured. Mappings to unknown sources are
    /// accepted and only warned about.
    pub fn new(mut sources: Vec<SourceDescriptor>, routing: RoutingTable) -> StorageResult<Self> {
        if sources.is_empty() {
            return Err(StorageError::config("no sources defined"));
        }

        for s in &sources {
            if s.name.trim().is_empty() {
                return Err(StorageError::config("source name must not be empty"));
            }
            if s.location.as_os_str().is_empty() {
                return Err(StorageError::config(format!(
                    "source '{}' has an empty location",
                    s.name
                )));
            }
            if s.pool_size == 0 {
                return Err(StorageError::config(format!(
                    "source '{}' has non-positive poolSize",
                    s.name
                )));
            }
            if !(s.timeout_seconds.is_finite() && s.timeout_seconds > 0.0) {
                return Err(StorageError::config(format!(
                    "source '{}' has invalid timeoutSeconds {}",
                    s.name, s.timeout_seconds
                )));
            }
            if s.timeout_seconds > MAX_TIMEOUT_SECONDS {
                return Err(StorageError::config(format!(
                    "source '{}' has timeoutSeconds {} above the maximum of {}",
                    s.name, s.timeout_seconds, MAX_TIMEOUT_SECONDS
                )));
            }
        }

        sources.sort_by(|a, b| a.name.cmp(&b.name));
        let mut index = FxHashMap::default();
        for (i, s) in sources.iter().enumerate() {
            if index.insert(s.name.clone(), i).is_some() {
                return Err(StorageError::config(format!(
                    "duplicate source name '{}'",
                    s.name
                )));
            }
        }

        if !index.contains_key(routing.default_source()) {
            return Err(StorageError::config(format!(
                "defaultSource '{}' is not a configured source",
                routing.default_source()
            )));
        }

        for (chat_id, name) in routing.mappings() {
            if !index.contains_key(name) {
                warn!(
                    chat_id,
                    source = name,
                    "chat mapping references unknown source; calls will fall back to default"
                );
            }
        }

        Ok(Self {
            sources,
            index,
            routing,
        })
    }

    /// One writable source named `"default"` with an empty chat mapping.
    pub fn single(descriptor: SourceDescriptor) -> StorageResult<Self> {
        let routing = RoutingTable::new(descriptor.name.clone());
        Self::new(vec![descriptor], routing)
    }

    pub fn get(&self, name: &str) -> Option<&SourceDescriptor> {
        self.index.get(name).map(|&i| &self.sources[i])
    }

    /// Like [`get`](Self::get) but an unknown name is an error.
    pub fn require(&self, name: &str) -> StorageResult<&SourceDescriptor> {
        self.get(name).ok_or_else(|| StorageError::UnknownSource {
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All sources, sorted by name.
    pub fn sources(&self) -> &[SourceDescriptor] {
        &self.sources
    }

    pub fn writable_sources(&self) -> impl Iterator<Item = &SourceDescriptor> {
        self.sources.iter().filter(|s| !s.read_only)
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    pub fn default_source(&self) -> &SourceDescriptor {
        // Validated in `new`.
        &self.sources[self.index[self.routing.default_source()]]
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

//! `ChatStore`: the routed storage facade.
//!
//! Owns the registry, the router and one pool per source. Every operation
//! routes first, then acquires the calling thread's handle on the chosen
//! source. Reads take an optional chat id and an optional explicit source;
//! writes take only a chat id, so a write can never name its target directly.
//! Reads with neither go through [`aggregate`](ChatStore::aggregate).
//!
//! Two construction modes, fixed for the instance's lifetime:
//! [`ChatStore::open`] (one path, mapped to a writable source named
//! `"default"`) and [`ChatStore::from_config`] / [`ChatStore::with_registry`].

use std::hash::Hash;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chatvault_core::{ChatId, SourceDescriptor, SourceRegistry, StorageConfig, StorageResult};
use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info};

use crate::aggregate::{self, AggregateReport};
use crate::connection::{PoolManager, PoolStats};
use crate::health::{self, StoreHealth};
use crate::migrations::{ChatSchema, MigrationRunner};
use crate::queries::{self, ChatRecord, MessageRecord, NewMessage};
use crate::routing::{Route, Router};

/// How the store was constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Single database path.
    Legacy,
    /// Explicit registry and routing table.
    MultiSource,
}

pub struct ChatStore {
    registry: Arc<SourceRegistry>,
    router: Router,
    pools: PoolManager,
    mode: StoreMode,
    closed: AtomicBool,
}

impl ChatStore {
    /// Single-database construction. `path` becomes a writable source named
    /// `"default"` with default pool size and timeout; the chat schema is
    /// migrated.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let registry = SourceRegistry::single(SourceDescriptor::legacy(path))?;
        let store = Self::build(registry, StoreMode::Legacy);
        store.run_migrations(&ChatSchema)?;
        Ok(store)
    }

    /// Multi-source construction from configuration; migrates every writable source.
    pub fn from_config(config: StorageConfig) -> StorageResult<Self> {
        let store = Self::with_registry(config.into_registry()?);
        store.run_migrations(&ChatSchema)?;
        Ok(store)
    }

    /// Load a `.toml` / `.yaml` configuration file and construct from it.
    pub fn load(config_path: &Path) -> StorageResult<Self> {
        Self::from_config(StorageConfig::load(config_path)?)
    }

    /// Multi-source construction without running migrations.
    pub fn with_registry(registry: SourceRegistry) -> Self {
        Self::build(registry, StoreMode::MultiSource)
    }

    fn build(registry: SourceRegistry, mode: StoreMode) -> Self {
        let registry = Arc::new(registry);
        let pools = PoolManager::new(&registry);
        info!(
            ?mode,
            sources = registry.len(),
            default = registry.routing().default_source(),
            mapped_chats = registry.routing().len(),
            "chat store opened"
        );
        Self {
            router: Router::new(Arc::clone(&registry)),
            registry,
            pools,
            mode,
            closed: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> StoreMode {
        self.mode
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    // ── Generic primitives ──

    /// Run a read on the source picked by `data_source`, then `chat_id`, then
    /// the default.
    ///
    /// `f` runs while the calling thread's handle is held. It must not call
    /// back into this store for the same source; doing so deadlocks.
    pub fn read<F, T>(
        &self,
        chat_id: Option<ChatId>,
        data_source: Option<&str>,
        f: F,
    ) -> StorageResult<T>
    where
        F: FnOnce(&Connection) -> StorageResult<T>,
    {
        let route = self.router.resolve(chat_id, data_source);
        debug!(%route, ?chat_id, "read");
        let handle = self.pools.acquire(route.source_name(), false)?;
        handle.with(|conn| f(&*conn))
    }

    /// Run a write in an immediate transaction on the source picked by
    /// `chat_id` or the default. Fails with `ReadOnlyViolation` before
    /// touching a read-only source.
    ///
    /// As with [`read`](Self::read), `f` must not call back into this store
    /// for the same source.
    pub fn write<F, T>(&self, chat_id: Option<ChatId>, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Connection) -> StorageResult<T>,
    {
        let route = self.router.resolve_write(chat_id)?;
        debug!(%route, ?chat_id, "write");
        let handle = self.pools.acquire(route.source_name(), true)?;
        handle.with(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let out = f(&*tx)?;
            tx.commit()?;
            Ok(out)
        })
    }

    /// Query every source (or only `data_source` when given) and merge by `key`.
    ///
    /// `query` runs once per source with that source's handle held, and must
    /// not call back into this store.
    pub fn aggregate<T, K, Q, KF>(
        &self,
        data_source: Option<&str>,
        query: Q,
        key: KF,
    ) -> StorageResult<Vec<T>>
    where
        Q: Fn(&Connection) -> StorageResult<Vec<T>>,
        KF: Fn(&T) -> K,
        K: Eq + Hash,
    {
        Ok(self.aggregate_report(data_source, query, key)?.rows)
    }

    /// Like [`aggregate`](Self::aggregate) but also reports which sources
    /// failed. The same re-entrancy rule applies to `query`.
    pub fn aggregate_report<T, K, Q, KF>(
        &self,
        data_source: Option<&str>,
        query: Q,
        key: KF,
    ) -> StorageResult<AggregateReport<T>>
    where
        Q: Fn(&Connection) -> StorageResult<Vec<T>>,
        KF: Fn(&T) -> K,
        K: Eq + Hash,
    {
        match data_source {
            Some(name) => {
                let rows = self.read(None, Some(name), |conn| query(conn))?;
                Ok(AggregateReport {
                    rows,
                    failures: Vec::new(),
                    queried: 1,
                })
            }
            None => aggregate::fan_out(&self.registry, &self.pools, query, key),
        }
    }

    /// The route a read would take. Does not touch any connection.
    pub fn route_for_read<'a>(
        &'a self,
        chat_id: Option<ChatId>,
        data_source: Option<&'a str>,
    ) -> Route<'a> {
        self.router.resolve(chat_id, data_source)
    }

    // ── Chat operations ──

    pub fn record_chat(&self, chat: &ChatRecord) -> StorageResult<()> {
        self.write(Some(chat.chat_id), |conn| queries::chats::upsert_chat(conn, chat))
    }

    pub fn find_chat(
        &self,
        chat_id: ChatId,
        data_source: Option<&str>,
    ) -> StorageResult<Option<ChatRecord>> {
        self.read(Some(chat_id), data_source, |conn| {
            queries::chats::get_chat(conn, chat_id)
        })
    }

    /// Chats owned by `user_id` across every source, one entry per chat id.
    pub fn user_chats(
        &self,
        user_id: i64,
        data_source: Option<&str>,
    ) -> StorageResult<Vec<ChatRecord>> {
        self.aggregate(
            data_source,
            |conn| queries::chats::chats_for_user(conn, user_id),
            |chat: &ChatRecord| chat.chat_id,
        )
    }

    /// Every chat across every source, one entry per chat id.
    pub fn all_chats(&self, data_source: Option<&str>) -> StorageResult<Vec<ChatRecord>> {
        self.aggregate(data_source, queries::chats::all_chats, |chat: &ChatRecord| {
            chat.chat_id
        })
    }

    // ── Message operations ──

    /// Store a message; returns its row id in the owning source.
    pub fn save_message(&self, chat_id: ChatId, message: &NewMessage) -> StorageResult<i64> {
        self.write(Some(chat_id), |conn| {
            queries::messages::insert_message(conn, chat_id, message)
        })
    }

    /// The last `limit` messages of a chat, oldest first.
    pub fn messages(
        &self,
        chat_id: ChatId,
        limit: usize,
        data_source: Option<&str>,
    ) -> StorageResult<Vec<MessageRecord>> {
        self.read(Some(chat_id), data_source, |conn| {
            queries::messages::recent_messages(conn, chat_id, limit)
        })
    }

    pub fn count_messages(&self, chat_id: ChatId, data_source: Option<&str>) -> StorageResult<i64> {
        self.read(Some(chat_id), data_source, |conn| {
            queries::messages::count_messages(conn, chat_id)
        })
    }

    // ── Migrations ──

    /// Sources a migration runner may touch: writable ones only.
    pub fn migration_targets(&self) -> Vec<&SourceDescriptor> {
        self.registry.writable_sources().collect()
    }

    /// Run `f` with a connection to a writable source for schema work.
    pub fn with_migration_connection<F, T>(&self, source_name: &str, f: F) -> StorageResult<T>
    where
        F: FnOnce(&SourceDescriptor, &Connection) -> StorageResult<T>,
    {
        let source = self.registry.require(source_name)?;
        let handle = self.pools.acquire(source_name, true)?;
        handle.with(|conn| f(source, &*conn))
    }

    /// Run `runner` against every writable source in registry order.
    pub fn run_migrations(&self, runner: &dyn MigrationRunner) -> StorageResult<()> {
        for source in self.registry.writable_sources() {
            self.with_migration_connection(&source.name, |source, conn| {
                runner.migrate(source, conn)
            })?;
        }
        Ok(())
    }

    // ── Lifecycle & introspection ──

    pub fn health_check(&self) -> StoreHealth {
        StoreHealth {
            sources: self
                .registry
                .sources()
                .iter()
                .map(|source| health::check_source(&self.pools, source))
                .collect(),
        }
    }

    pub fn pool_stats(&self) -> Vec<PoolStats> {
        self.pools.stats()
    }

    /// Close the calling thread's handles. Worker threads should call this
    /// before exiting; otherwise their handles stay open until `close`.
    pub fn release_current_thread(&self) -> StorageResult<usize> {
        self.pools.release_current_thread()
    }

    /// Close every pooled connection on every source. Idempotent; later
    /// operations fail with `ConnectionClosed`.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let closed = self.pools.close_all();
        info!(handles = closed, "chat store closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Source an explicit read would use; errors for unknown names.
    pub fn source(&self, name: &str) -> StorageResult<&SourceDescriptor> {
        self.registry.require(name)
    }
}

impl Drop for ChatStore {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ChatStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStore")
            .field("mode", &self.mode)
            .field("sources", &self.registry.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

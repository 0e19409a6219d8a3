//! Thread-keyed connection arena.
//!
//! One `SourcePool` per source holds at most one [`PooledConnection`] per
//! thread. Handles are created lazily under the source's creation lock with a
//! check-lock-check so two callers never open duplicates for the same key.
//! Statements on an acquired handle take no lock from this layer beyond the
//! handle's own, which only its owning thread and `close_all` ever touch.
//!
//! An in-memory source also holds an anchor connection, opened with the first
//! handle and closed by `close_all`, that keeps the shared database alive
//! while worker threads come and go.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockWriteGuard, TryLockError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use chatvault_core::{SourceDescriptor, SourceRegistry, StorageError, StorageResult};
use rusqlite::Connection;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use super::pragmas;

/// Poll interval while waiting on a contended creation lock.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// A live connection owned by one thread, tagged with its source.
pub struct PooledConnection {
    source_name: String,
    read_only: bool,
    owner: ThreadId,
    open: AtomicBool,
    conn: Mutex<Option<Connection>>,
}

impl PooledConnection {
    fn new(source: &SourceDescriptor, conn: Connection) -> Self {
        Self {
            source_name: source.name.clone(),
            read_only: source.read_only,
            owner: thread::current().id(),
            open: AtomicBool::new(true),
            conn: Mutex::new(Some(conn)),
        }
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Run `f` against the underlying connection.
    ///
    /// `f` must not re-enter the store for the same source on the same
    /// thread: the handle is not re-entrant.
    ///
    /// If an earlier `f` panicked, the handle is recovered: any transaction
    /// it left open is rolled back and the connection is used as normal.
    pub fn with<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&mut Connection) -> StorageResult<T>,
    {
        if !self.is_open() {
            return Err(self.closed_error());
        }
        let mut guard = match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                self.conn.clear_poison();
                let mut guard = poisoned.into_inner();
                if let Some(conn) = guard.as_mut() {
                    self.recover(conn);
                }
                guard
            }
        };
        match guard.as_mut() {
            Some(conn) => f(conn),
            None => Err(self.closed_error()),
        }
    }

    /// Mark closed and close the connection now if nobody is using it.
    /// A handle busy on another thread is dropped when its last user releases it.
    fn close(&self) {
        self.open.store(false, Ordering::Release);
        let conn = match self.conn.try_lock() {
            Ok(mut guard) => guard.take(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().take(),
            Err(TryLockError::WouldBlock) => {
                debug!(source = %self.source_name, "handle in use during close; deferring");
                None
            }
        };
        if let Some(conn) = conn {
            if let Err((_, e)) = conn.close() {
                warn!(source = %self.source_name, error = %e, "error closing connection");
            }
        }
    }

    /// Return a connection abandoned mid-call to autocommit mode.
    fn recover(&self, conn: &Connection) {
        warn!(source = %self.source_name, "recovering handle after a panicked call");
        if !conn.is_autocommit() {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                warn!(source = %self.source_name, error = %e, "rollback after panic failed");
            }
        }
    }

    fn closed_error(&self) -> StorageError {
        StorageError::ConnectionClosed {
            source_name: self.source_name.clone(),
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("source_name", &self.source_name)
            .field("read_only", &self.read_only)
            .field("owner", &self.owner)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Point-in-time counters for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub source_name: String,
    pub read_only: bool,
    pub pool_size: usize,
    /// Handles currently in the table.
    pub live_handles: usize,
    /// Physical connections opened since construction.
    pub opened_total: u64,
}

/// Keeps a shared in-memory database alive between worker handles.
struct MemoryAnchor {
    uri: String,
    conn: Mutex<Option<Connection>>,
}

impl MemoryAnchor {
    fn new(source_name: &str) -> Self {
        Self {
            uri: pragmas::memory_uri(source_name),
            conn: Mutex::new(None),
        }
    }

    /// Open the anchor unless it already is.
    fn ensure_open(&self) -> rusqlite::Result<()> {
        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            *guard = Some(pragmas::open_memory_anchor(&self.uri)?);
        }
        Ok(())
    }

    fn close(&self, source_name: &str) {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(conn) = conn {
            if let Err((_, e)) = conn.close() {
                warn!(source = %source_name, error = %e, "error closing in-memory anchor");
            }
        }
    }
}

type HandleTable = FxHashMap<ThreadId, Arc<PooledConnection>>;

/// Handles for one source, keyed by owning thread.
pub struct SourcePool {
    descriptor: SourceDescriptor,
    handles: RwLock<HandleTable>,
    memory: Option<MemoryAnchor>,
    create_lock: Mutex<()>,
    opened: AtomicU64,
    closed: AtomicBool,
    overrun_warned: AtomicBool,
}

impl SourcePool {
    pub fn new(descriptor: SourceDescriptor) -> Self {
        let memory = descriptor
            .is_in_memory()
            .then(|| MemoryAnchor::new(&descriptor.name));
        Self {
            descriptor,
            handles: RwLock::new(FxHashMap::default()),
            memory,
            create_lock: Mutex::new(()),
            opened: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            overrun_warned: AtomicBool::new(false),
        }
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    /// The calling thread's handle, opening one if needed.
    ///
    /// With `for_write` set, a read-only source fails with
    /// [`StorageError::ReadOnlyViolation`] before any handle is touched.
    pub fn acquire(&self, for_write: bool) -> StorageResult<Arc<PooledConnection>> {
        if for_write && self.descriptor.read_only {
            return Err(StorageError::ReadOnlyViolation {
                source_name: self.descriptor.name.clone(),
            });
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(self.closed_error());
        }

        let tid = thread::current().id();
        if let Some(handle) = self.lookup(tid)? {
            return Ok(handle);
        }

        let _guard = self.lock_for_create()?;
        if let Some(handle) = self.lookup(tid)? {
            return Ok(handle);
        }

        let conn = self.open_connection().map_err(|e| StorageError::ConnectionFailed {
            source_name: self.descriptor.name.clone(),
            source: e,
        })?;
        let handle = Arc::new(PooledConnection::new(&self.descriptor, conn));

        let live = {
            let mut handles = self.write_handles()?;
            handles.insert(tid, Arc::clone(&handle));
            handles.len()
        };
        self.opened.fetch_add(1, Ordering::Relaxed);

        // close_all may have drained the table between our check and insert.
        if self.closed.load(Ordering::Acquire) {
            self.remove(tid)?;
            handle.close();
            self.close_anchor();
            return Err(self.closed_error());
        }

        debug!(
            source = %self.descriptor.name,
            read_only = self.descriptor.read_only,
            live,
            "opened connection"
        );
        if live > self.descriptor.pool_size && !self.overrun_warned.swap(true, Ordering::Relaxed) {
            warn!(
                source = %self.descriptor.name,
                live,
                pool_size = self.descriptor.pool_size,
                "more threads hold connections than poolSize"
            );
        }

        Ok(handle)
    }

    /// Drop and close the calling thread's handle, if any.
    pub fn release_current_thread(&self) -> StorageResult<bool> {
        match self.remove(thread::current().id())? {
            Some(handle) => {
                handle.close();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Close every handle and refuse further acquisitions. Returns how many
    /// handles were removed. Idempotent.
    pub fn close_all(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let drained: Vec<_> = match self.handles.write() {
            Ok(mut handles) => handles.drain().map(|(_, h)| h).collect(),
            Err(poisoned) => poisoned.into_inner().drain().map(|(_, h)| h).collect(),
        };
        for handle in &drained {
            handle.close();
        }
        self.close_anchor();
        drained.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PoolStats {
        let live_handles = match self.handles.read() {
            Ok(handles) => handles.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        };
        PoolStats {
            source_name: self.descriptor.name.clone(),
            read_only: self.descriptor.read_only,
            pool_size: self.descriptor.pool_size,
            live_handles,
            opened_total: self.opened.load(Ordering::Relaxed),
        }
    }

    fn open_connection(&self) -> rusqlite::Result<Connection> {
        match &self.memory {
            Some(anchor) => {
                anchor.ensure_open()?;
                pragmas::open_shared_memory(&anchor.uri, &self.descriptor)
            }
            None => pragmas::open_connection(&self.descriptor),
        }
    }

    fn close_anchor(&self) {
        if let Some(anchor) = &self.memory {
            anchor.close(&self.descriptor.name);
        }
    }

    fn lookup(&self, tid: ThreadId) -> StorageResult<Option<Arc<PooledConnection>>> {
        let handles = self.handles.read().map_err(|_| self.poisoned())?;
        Ok(handles.get(&tid).filter(|h| h.is_open()).cloned())
    }

    fn remove(&self, tid: ThreadId) -> StorageResult<Option<Arc<PooledConnection>>> {
        Ok(self.write_handles()?.remove(&tid))
    }

    fn write_handles(&self) -> StorageResult<RwLockWriteGuard<'_, HandleTable>> {
        self.handles.write().map_err(|_| self.poisoned())
    }

    /// Take the creation lock, giving up after the source's timeout.
    fn lock_for_create(&self) -> StorageResult<MutexGuard<'_, ()>> {
        let timeout = self.descriptor.timeout();
        let start = Instant::now();
        loop {
            match self.create_lock.try_lock() {
                Ok(guard) => return Ok(guard),
                // The guarded value is `()`; nothing to repair.
                Err(TryLockError::Poisoned(poisoned)) => return Ok(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {
                    let waited = start.elapsed();
                    if waited >= timeout {
                        return Err(StorageError::LockTimeout {
                            source_name: self.descriptor.name.clone(),
                            waited_ms: waited.as_millis() as u64,
                        });
                    }
                    thread::sleep(LOCK_POLL_INTERVAL);
                }
            }
        }
    }

    fn poisoned(&self) -> StorageError {
        StorageError::LockPoisoned {
            source_name: self.descriptor.name.clone(),
        }
    }

    fn closed_error(&self) -> StorageError {
        StorageError::ConnectionClosed {
            source_name: self.descriptor.name.clone(),
        }
    }
}

/// One [`SourcePool`] per registered source.
pub struct PoolManager {
    pools: Vec<SourcePool>,
    index: FxHashMap<String, usize>,
}

impl PoolManager {
    pub fn new(registry: &SourceRegistry) -> Self {
        let pools: Vec<_> = registry
            .sources()
            .iter()
            .cloned()
            .map(SourcePool::new)
            .collect();
        let index = pools
            .iter()
            .enumerate()
            .map(|(i, p)| (p.descriptor().name.clone(), i))
            .collect();
        Self { pools, index }
    }

    pub fn pool(&self, source_name: &str) -> StorageResult<&SourcePool> {
        self.index
            .get(source_name)
            .map(|&i| &self.pools[i])
            .ok_or_else(|| StorageError::UnknownSource {
                name: source_name.to_string(),
            })
    }

    /// See [`SourcePool::acquire`].
    pub fn acquire(
        &self,
        source_name: &str,
        for_write: bool,
    ) -> StorageResult<Arc<PooledConnection>> {
        self.pool(source_name)?.acquire(for_write)
    }

    /// Release the calling thread's handles on every source. Returns the count.
    pub fn release_current_thread(&self) -> StorageResult<usize> {
        let mut released = 0;
        for pool in &self.pools {
            if pool.release_current_thread()? {
                released += 1;
            }
        }
        Ok(released)
    }

    /// Close every handle on every source. Idempotent.
    pub fn close_all(&self) -> usize {
        self.pools.iter().map(SourcePool::close_all).sum()
    }

    pub fn is_closed(&self) -> bool {
        self.pools.iter().all(SourcePool::is_closed)
    }

    pub fn stats(&self) -> Vec<PoolStats> {
        self.pools.iter().map(SourcePool::stats).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatvault_core::RoutingTable;
    use std::sync::Barrier;

    fn file_pool(dir: &tempfile::TempDir) -> SourcePool {
        SourcePool::new(SourceDescriptor::writable("primary", dir.path().join("p.db")))
    }

    #[test]
    fn same_thread_reuses_handle() {
        let dir = tempfile::tempdir().unwrap();
        let pool = file_pool(&dir);
        let a = pool.acquire(false).unwrap();
        let b = pool.acquire(true).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.stats().opened_total, 1);
    }

    #[test]
    fn each_thread_gets_its_own_handle() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(file_pool(&dir));
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let first = pool.acquire(false).unwrap();
                    let second = pool.acquire(false).unwrap();
                    assert!(Arc::ptr_eq(&first, &second));
                    assert_eq!(first.owner(), thread::current().id());
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.opened_total, 4);
        assert_eq!(stats.live_handles, 4);
    }

    #[test]
    fn write_to_readonly_source_fails_before_open() {
        let dir = tempfile::tempdir().unwrap();
        let pool = SourcePool::new(SourceDescriptor::read_only(
            "archive",
            dir.path().join("missing.db"),
        ));
        let err = pool.acquire(true).unwrap_err();
        assert!(matches!(
            err,
            StorageError::ReadOnlyViolation { ref source_name } if source_name == "archive"
        ));
        assert_eq!(pool.stats().opened_total, 0);
    }

    #[test]
    fn open_failure_stores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let pool = SourcePool::new(SourceDescriptor::read_only(
            "archive",
            dir.path().join("missing.db"),
        ));
        let err = pool.acquire(false).unwrap_err();
        assert!(matches!(err, StorageError::ConnectionFailed { .. }));
        assert!(std::error::Error::source(&err).is_some());
        let stats = pool.stats();
        assert_eq!(stats.live_handles, 0);
        assert_eq!(stats.opened_total, 0);
    }

    #[test]
    fn close_all_is_idempotent_and_refuses_new_handles() {
        let dir = tempfile::tempdir().unwrap();
        let pool = file_pool(&dir);
        let handle = pool.acquire(false).unwrap();

        assert_eq!(pool.close_all(), 1);
        assert_eq!(pool.close_all(), 0);
        assert!(!handle.is_open());
        assert!(matches!(
            handle.with(|_| Ok(())),
            Err(StorageError::ConnectionClosed { .. })
        ));
        assert!(matches!(
            pool.acquire(false),
            Err(StorageError::ConnectionClosed { .. })
        ));
    }

    #[test]
    fn release_current_thread_allows_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let pool = file_pool(&dir);
        let first = pool.acquire(false).unwrap();
        assert!(pool.release_current_thread().unwrap());
        assert!(!first.is_open());
        assert!(!pool.release_current_thread().unwrap());

        let second = pool.acquire(false).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(pool.stats().opened_total, 2);
    }

    #[test]
    fn creation_lock_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let pool = SourcePool::new(
            SourceDescriptor::writable("slow", dir.path().join("s.db")).with_timeout_seconds(0.05),
        );
        let _held = pool.create_lock.lock().unwrap();
        let err = pool.acquire(false).unwrap_err();
        assert!(matches!(
            err,
            StorageError::LockTimeout { ref source_name, waited_ms }
                if source_name == "slow" && waited_ms >= 50
        ));
    }

    #[test]
    fn in_memory_source_is_shared_between_threads() {
        let pool = Arc::new(SourcePool::new(SourceDescriptor::writable("mem", ":memory:")));
        pool.acquire(true)
            .unwrap()
            .with(|conn| Ok(conn.execute_batch("CREATE TABLE t (x INTEGER)")?))
            .unwrap();

        let worker = Arc::clone(&pool);
        thread::spawn(move || {
            worker
                .acquire(true)
                .unwrap()
                .with(|conn| Ok(conn.execute("INSERT INTO t VALUES (1)", [])?))
                .unwrap();
            // The worker's handle goes away; the rows must not.
            assert!(worker.release_current_thread().unwrap());
        })
        .join()
        .unwrap();

        let count: i64 = pool
            .acquire(false)
            .unwrap()
            .with(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(pool.stats().opened_total, 2);
    }

    #[test]
    fn in_memory_data_outlives_every_worker_handle() {
        let pool = SourcePool::new(SourceDescriptor::writable("mem", ":memory:"));
        pool.acquire(true)
            .unwrap()
            .with(|conn| Ok(conn.execute_batch("CREATE TABLE t (x INTEGER)")?))
            .unwrap();
        assert!(pool.release_current_thread().unwrap());
        assert_eq!(pool.stats().live_handles, 0);

        let tables: i64 = pool
            .acquire(false)
            .unwrap()
            .with(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE name = 't'",
                    [],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(tables, 1);
    }

    #[test]
    fn panicked_call_leaves_handle_usable() {
        let pool = SourcePool::new(SourceDescriptor::writable("mem", ":memory:"));
        let handle = pool.acquire(true).unwrap();
        handle
            .with(|conn| Ok(conn.execute_batch("CREATE TABLE t (x INTEGER)")?))
            .unwrap();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: StorageResult<()> = handle.with(|conn| {
                conn.execute_batch("BEGIN; INSERT INTO t VALUES (1);")?;
                panic!("caller bug");
            });
        }));
        assert!(outcome.is_err());

        let count: i64 = handle
            .with(|conn| {
                assert!(conn.is_autocommit(), "abandoned transaction was not rolled back");
                Ok(conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 0);
        assert!(Arc::ptr_eq(&handle, &pool.acquire(false).unwrap()));
    }

    #[test]
    fn manager_rejects_unknown_source() {
        let registry = SourceRegistry::new(
            vec![SourceDescriptor::writable("primary", ":memory:")],
            RoutingTable::new("primary"),
        )
        .unwrap();
        let manager = PoolManager::new(&registry);
        assert!(matches!(
            manager.acquire("nope", false),
            Err(StorageError::UnknownSource { ref name }) if name == "nope"
        ));
        assert!(manager.acquire("primary", true).is_ok());
        assert_eq!(manager.close_all(), 1);
        assert!(manager.is_closed());
    }
}

//! Opening connections and applying PRAGMAs.
//!
//! Read-only sources are opened with `SQLITE_OPEN_READ_ONLY` and get
//! `query_only = ON`, so the engine itself rejects writes even if a caller
//! bypasses the router. Applied once per connection, at open.
//!
//! `:memory:` sources live in SQLite's `memdb` VFS under a process-unique
//! name, so every thread's connection sees the same database. The pool keeps
//! an anchor connection open for as long as the source is open; the database
//! is freed when the last connection to it closes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chatvault_core::SourceDescriptor;
use rusqlite::{Connection, OpenFlags};

/// PRAGMAs for writable connections.
pub fn configure_connection(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA cache_size = -8000;
        PRAGMA temp_store = MEMORY;
        ",
    )
}

/// PRAGMAs for read-only connections. Leaves the journal mode alone since
/// changing it needs write access.
pub fn configure_readonly_connection(
    conn: &Connection,
    busy_timeout: Duration,
) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;
        PRAGMA cache_size = -8000;
        PRAGMA temp_store = MEMORY;
        PRAGMA query_only = ON;
        ",
    )
}

static NEXT_MEMORY_DB: AtomicU64 = AtomicU64::new(0);

/// Open and configure a connection to the file behind `source`.
///
/// In-memory sources go through [`open_shared_memory`] instead; opened here,
/// `:memory:` gives a private database visible to this connection only.
pub fn open_connection(source: &SourceDescriptor) -> rusqlite::Result<Connection> {
    let timeout = source.timeout();
    if source.read_only {
        let conn = Connection::open_with_flags(
            &source.location,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        configure_readonly_connection(&conn, timeout)?;
        Ok(conn)
    } else {
        let conn = Connection::open(&source.location)?;
        configure_connection(&conn, timeout)?;
        Ok(conn)
    }
}

/// A fresh `memdb` URI for an in-memory source. Names are never reused
/// within the process, so two stores over `:memory:` never share data.
pub fn memory_uri(source_name: &str) -> String {
    let id = NEXT_MEMORY_DB.fetch_add(1, Ordering::Relaxed);
    let name: String = source_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("file:/chatvault-{id}-{name}?vfs=memdb")
}

/// Create the database behind `uri` and hold it open. Runs no PRAGMAs and
/// serves no statements.
pub fn open_memory_anchor(uri: &str) -> rusqlite::Result<Connection> {
    Connection::open_with_flags(
        uri,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
}

/// Open and configure a worker connection to the shared in-memory
/// database at `uri`, honouring `source.read_only`.
pub fn open_shared_memory(uri: &str, source: &SourceDescriptor) -> rusqlite::Result<Connection> {
    let timeout = source.timeout();
    let access = if source.read_only {
        OpenFlags::SQLITE_OPEN_READ_ONLY
    } else {
        OpenFlags::SQLITE_OPEN_READ_WRITE
    };
    let conn = Connection::open_with_flags(
        uri,
        access | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    if source.read_only {
        configure_readonly_connection(&conn, timeout)?;
    } else {
        configure_connection(&conn, timeout)?;
    }
    Ok(conn)
}

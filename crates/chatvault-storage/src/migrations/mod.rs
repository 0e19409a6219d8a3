//! Migration runner boundary.
//!
//! The store offers only writable sources to a [`MigrationRunner`]; read-only
//! sources are never migrated. [`ChatSchema`] is the runner for the tables
//! the store's own operations use, versioned through `PRAGMA user_version`.

use chatvault_core::{SourceDescriptor, StorageResult};
use rusqlite::Connection;
use tracing::info;

/// Provisions a writable source's schema.
pub trait MigrationRunner: Send + Sync {
    fn migrate(&self, source: &SourceDescriptor, conn: &Connection) -> StorageResult<()>;
}

/// Current chat schema version.
pub const CURRENT_VERSION: u32 = 1;

const V1_CHAT_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS chats (
    chat_id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    title TEXT,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
) STRICT;

CREATE INDEX IF NOT EXISTS idx_chats_user ON chats(user_id);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_id INTEGER NOT NULL,
    user_id INTEGER,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
) STRICT;

CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id, id);
"#;

/// The chat/message schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatSchema;

impl MigrationRunner for ChatSchema {
    fn migrate(&self, source: &SourceDescriptor, conn: &Connection) -> StorageResult<()> {
        let from = schema_version(conn)?;
        if from >= CURRENT_VERSION {
            return Ok(());
        }

        let tx = conn.unchecked_transaction()?;
        if from < 1 {
            tx.execute_batch(V1_CHAT_TABLES)?;
        }
        tx.pragma_update(None, "user_version", CURRENT_VERSION)?;
        tx.commit()?;

        info!(source = %source.name, from, to = CURRENT_VERSION, "migrated chat schema");
        Ok(())
    }
}

/// `PRAGMA user_version` of `conn`.
pub fn schema_version(conn: &Connection) -> StorageResult<u32> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

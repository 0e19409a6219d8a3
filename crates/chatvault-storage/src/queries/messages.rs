//! messages table.

use chatvault_core::{ChatId, StorageResult};
use rusqlite::{params, Connection, Row};

/// A message to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub user_id: Option<i64>,
    pub role: String,
    pub content: String,
}

impl NewMessage {
    pub fn user(user_id: i64, content: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id),
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            user_id: None,
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// A stored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: i64,
    pub chat_id: ChatId,
    pub user_id: Option<i64>,
    pub role: String,
    pub content: String,
    pub created_at: String,
}

impl MessageRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            chat_id: row.get(1)?,
            user_id: row.get(2)?,
            role: row.get(3)?,
            content: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

/// Insert and return the new row id.
pub fn insert_message(
    conn: &Connection,
    chat_id: ChatId,
    message: &NewMessage,
) -> StorageResult<i64> {
    conn.execute(
        "INSERT INTO messages (chat_id, user_id, role, content) VALUES (?1, ?2, ?3, ?4)",
        params![chat_id, message.user_id, message.role, message.content],
    )?;
    Ok(conn.last_insert_rowid())
}

/// The last `limit` messages of a chat, oldest first.
pub fn recent_messages(
    conn: &Connection,
    chat_id: ChatId,
    limit: usize,
) -> StorageResult<Vec<MessageRecord>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, chat_id, user_id, role, content, created_at FROM (
            SELECT * FROM messages WHERE chat_id = ?1 ORDER BY id DESC LIMIT ?2
         ) ORDER BY id ASC",
    )?;
    let messages = stmt
        .query_map(params![chat_id, limit as i64], MessageRecord::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(messages)
}

pub fn count_messages(conn: &Connection, chat_id: ChatId) -> StorageResult<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE chat_id = ?1",
        [chat_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

//! chats table.

use chatvault_core::{ChatId, StorageResult};
use rusqlite::{params, Connection, OptionalExtension, Row};

/// One chat and the user who owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRecord {
    pub chat_id: ChatId,
    pub user_id: i64,
    pub title: Option<String>,
}

impl ChatRecord {
    pub fn new(chat_id: ChatId, user_id: i64, title: Option<&str>) -> Self {
        Self {
            chat_id,
            user_id,
            title: title.map(str::to_string),
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            chat_id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
        })
    }
}

pub fn upsert_chat(conn: &Connection, chat: &ChatRecord) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO chats (chat_id, user_id, title) VALUES (?1, ?2, ?3)
         ON CONFLICT(chat_id) DO UPDATE SET
            user_id = excluded.user_id,
            title = excluded.title,
            updated_at = datetime('now')",
        params![chat.chat_id, chat.user_id, chat.title],
    )?;
    Ok(())
}

pub fn get_chat(conn: &Connection, chat_id: ChatId) -> StorageResult<Option<ChatRecord>> {
    let chat = conn
        .query_row(
            "SELECT chat_id, user_id, title FROM chats WHERE chat_id = ?1",
            [chat_id],
            ChatRecord::from_row,
        )
        .optional()?;
    Ok(chat)
}

pub fn chats_for_user(conn: &Connection, user_id: i64) -> StorageResult<Vec<ChatRecord>> {
    let mut stmt = conn.prepare_cached(
        "SELECT chat_id, user_id, title FROM chats WHERE user_id = ?1 ORDER BY chat_id",
    )?;
    let chats = stmt
        .query_map([user_id], ChatRecord::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(chats)
}

pub fn all_chats(conn: &Connection) -> StorageResult<Vec<ChatRecord>> {
    let mut stmt =
        conn.prepare_cached("SELECT chat_id, user_id, title FROM chats ORDER BY chat_id")?;
    let chats = stmt
        .query_map([], ChatRecord::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(chats)
}

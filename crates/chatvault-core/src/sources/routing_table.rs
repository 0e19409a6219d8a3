//! Chat id → source name mapping.

use rustc_hash::FxHashMap;

/// Chat identifier. Group chats are negative.
pub type ChatId = i64;

/// Which source owns which chat, plus the fallback source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTable {
    chat_mapping: FxHashMap<ChatId, String>,
    default_source: String,
}

impl RoutingTable {
    pub fn new(default_source: impl Into<String>) -> Self {
        Self {
            chat_mapping: FxHashMap::default(),
            default_source: default_source.into(),
        }
    }

    /// Map a chat to a source. Later calls for the same chat replace earlier ones.
    pub fn with_mapping(mut self, chat_id: ChatId, source: impl Into<String>) -> Self {
        self.chat_mapping.insert(chat_id, source.into());
        self
    }

    pub fn default_source(&self) -> &str {
        &self.default_source
    }

    pub fn source_for_chat(&self, chat_id: ChatId) -> Option<&str> {
        self.chat_mapping.get(&chat_id).map(String::as_str)
    }

    pub fn mappings(&self) -> impl Iterator<Item = (ChatId, &str)> {
        self.chat_mapping.iter().map(|(id, s)| (*id, s.as_str()))
    }

    pub fn len(&self) -> usize {
        self.chat_mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chat_mapping.is_empty()
    }
}

//! SQL for the chat schema. Every function takes a borrowed connection;
//! routing happens in the store.

pub mod chats;
pub mod messages;

pub use chats::ChatRecord;
pub use messages::{MessageRecord, NewMessage};

//! Persistence layer for conversation context and processing history.

pub mod backend;
pub mod conversation;
pub mod libsql_backend;

pub use backend::StoreBackend;
pub use conversation::{
    Context, ConversationId, ConversationStore, ProcessingRecord, TIMESTAMP_KEY,
};
pub use libsql_backend::LibSqlBackend;

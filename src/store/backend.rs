//! Storage backend contract for conversation state.

use async_trait::async_trait;

use crate::error::StoreError;

/// Raw storage underneath [`ConversationStore`]: an encoded context
/// document plus an ordered processing log, both keyed by conversation.
///
/// Implementations should return [`StoreError::Unavailable`] for
/// connectivity failures so the store's retry layer can tell them apart
/// from permanent errors.
///
/// [`ConversationStore`]: crate::store::ConversationStore
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Fetch the encoded context document, if any.
    async fn get_context(&self, conversation: &str) -> Result<Option<String>, StoreError>;

    /// Replace the encoded context document.
    async fn put_context(&self, conversation: &str, encoded: &str) -> Result<(), StoreError>;

    /// Append one encoded entry to the processing log, returning the new
    /// log length.
    async fn append_log(&self, conversation: &str, entry: &str) -> Result<u64, StoreError>;

    /// Read the full processing log in append order.
    async fn read_log(&self, conversation: &str) -> Result<Vec<String>, StoreError>;

    /// Delete the context document. Deleting a missing document is not an
    /// error.
    async fn delete_context(&self, conversation: &str) -> Result<(), StoreError>;

    /// Delete the processing log. Deleting a missing log is not an error.
    async fn delete_log(&self, conversation: &str) -> Result<(), StoreError>;
}

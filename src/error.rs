//! Error types for doc-intake.

/// Conversation store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Backend operation failed: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Conversation id must not be empty")]
    EmptyConversationId,

    #[error("Conversation clear incomplete (context: {context}; log: {log})")]
    ClearIncomplete { context: String, log: String },
}

impl StoreError {
    /// Whether retrying the same operation could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }
}

/// Intent scorer errors.
#[derive(Debug, thiserror::Error)]
pub enum ScorerError {
    #[error("Scoring failed: {0}")]
    Failed(String),

    #[error("Scoring timed out")]
    Timeout,
}

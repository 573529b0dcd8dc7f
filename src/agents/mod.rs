//! Processing agents for ingested documents.
//!
//! Each agent consumes raw document bytes within one conversation and
//! returns a typed outcome plus an audit status. Agents fold their own
//! failures into the outcome type, so `process` never errors. Store
//! failures while recording an outcome degrade the audit trail but
//! never replace the outcome itself.

pub mod classifier;
pub mod email;
pub mod json;

pub use classifier::{Classification, IntentClassifier, Route};
pub use email::{EmailAgent, EmailOutcome, Urgency};
pub use json::{JsonAgent, JsonOutcome};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::StoreError;
use crate::store::{Context, ConversationId, ConversationStore, ProcessingRecord};

// ── Audit status ─────────────────────────────────────────────────────────────

/// Whether the store calls backing an outcome all succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditStatus {
    /// Log entries and context updates were all persisted.
    Recorded,
    /// At least one store call failed; the outcome stands, the audit
    /// trail is incomplete.
    Degraded { reason: String },
}

impl AuditStatus {
    /// Fold a store failure into the status, keeping earlier reasons.
    pub fn degrade(&mut self, error: &StoreError) {
        match self {
            AuditStatus::Recorded => {
                *self = AuditStatus::Degraded {
                    reason: error.to_string(),
                };
            }
            AuditStatus::Degraded { reason } => {
                reason.push_str("; ");
                reason.push_str(&error.to_string());
            }
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, AuditStatus::Degraded { .. })
    }
}

/// An agent outcome together with the audit status of its bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct Processed<T> {
    pub outcome: T,
    pub audit: AuditStatus,
}

// ── Agent trait ──────────────────────────────────────────────────────────────

/// Common surface of the processing agents.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Outcome type produced by this agent.
    type Output: Serialize + Send;

    /// Stable name recorded in the processing log.
    fn name(&self) -> &'static str;

    fn store(&self) -> &ConversationStore;

    /// Process one document. Total: agent-level failures become error
    /// outcomes, not `Err` returns.
    async fn process(&self, raw: &[u8], conversation: &ConversationId)
    -> Processed<Self::Output>;

    /// Append a processing record attributed to this agent.
    async fn log_action(
        &self,
        conversation: &ConversationId,
        action: &str,
        details: Value,
    ) -> Result<u64, StoreError> {
        self.store()
            .append_record(conversation, self.name(), action, details)
            .await
    }

    async fn context(&self, conversation: &ConversationId) -> Result<Option<Context>, StoreError> {
        self.store().get_context(conversation).await
    }

    async fn update_context(
        &self,
        conversation: &ConversationId,
        updates: Context,
    ) -> Result<Context, StoreError> {
        self.store().update_context(conversation, updates).await
    }

    async fn history(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<ProcessingRecord>, StoreError> {
        self.store().get_history(conversation).await
    }
}

//! Document classification and routing agent.
//!
//! Detects the document format, samples its content, scores the sample
//! with the injected intent scorer and emits a routing decision. The
//! scorer is consulted under a deadline; a slow or failing scorer
//! degrades the intent to `unknown` instead of blocking the pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::agents::{Agent, AuditStatus, Processed};
use crate::config::ClassifierConfig;
use crate::error::ScorerError;
use crate::format::{self, DocumentFormat};
use crate::scorer::{Intent, IntentScorer};
use crate::store::{Context, ConversationId, ConversationStore};

/// Destination agent chosen for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    JsonAgent,
    EmailAgent,
}

impl Route {
    /// Default route for a detected format.
    ///
    /// Formats without a dedicated handler fall through to the email
    /// agent, which degrades gracefully on non-mail input.
    pub fn for_format(format: DocumentFormat) -> Route {
        match format {
            DocumentFormat::Json => Route::JsonAgent,
            DocumentFormat::Email | DocumentFormat::Pdf | DocumentFormat::Unknown => {
                Route::EmailAgent
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Route::JsonAgent => "json_agent",
            Route::EmailAgent => "email_agent",
        }
    }
}

/// Outcome of classifying one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub format: DocumentFormat,
    pub intent: Intent,
    pub route_to: Route,
}

/// Agent assigning format, intent and route to incoming documents.
pub struct IntentClassifier {
    store: ConversationStore,
    scorer: Arc<dyn IntentScorer>,
    config: ClassifierConfig,
}

impl IntentClassifier {
    pub fn new(
        store: ConversationStore,
        scorer: Arc<dyn IntentScorer>,
        config: ClassifierConfig,
    ) -> Self {
        Self {
            store,
            scorer,
            config,
        }
    }

    async fn score_sample(&self, sample: &str) -> Intent {
        let scored = tokio::time::timeout(
            self.config.scorer_deadline,
            self.scorer.intent_of(sample),
        )
        .await;
        match scored {
            Ok(Ok(intent)) => intent,
            Ok(Err(e)) => {
                warn!(error = %e, "Intent scoring failed, marking unknown");
                Intent::Unknown
            }
            Err(_) => {
                warn!(error = %ScorerError::Timeout, "Intent scoring failed, marking unknown");
                Intent::Unknown
            }
        }
    }
}

#[async_trait]
impl Agent for IntentClassifier {
    type Output = Classification;

    fn name(&self) -> &'static str {
        "classifier"
    }

    fn store(&self) -> &ConversationStore {
        &self.store
    }

    async fn process(&self, raw: &[u8], conversation: &ConversationId) -> Processed<Classification> {
        let mut audit = AuditStatus::Recorded;

        let format = format::detect(raw);
        let content = format::extract_content(raw, format);
        let sample: String = content.chars().take(self.config.sample_max_chars).collect();
        let intent = self.score_sample(&sample).await;

        let route_to = Route::for_format(format);
        if !matches!(format, DocumentFormat::Json | DocumentFormat::Email) {
            warn!(
                format = format.as_str(),
                "No dedicated handler for format, defaulting to email agent"
            );
        }

        let classification = Classification {
            format,
            intent,
            route_to,
        };

        if let Err(e) = self
            .log_action(conversation, "classify_llm", json!(classification))
            .await
        {
            warn!(conversation = %conversation, error = %e, "Failed to record classification");
            audit.degrade(&e);
        }

        let mut updates = Context::new();
        updates.insert("format".into(), json!(format));
        updates.insert("intent".into(), json!(intent));
        updates.insert(
            "classification_timestamp".into(),
            json!(Utc::now().to_rfc3339()),
        );
        if let Err(e) = self.update_context(conversation, updates).await {
            warn!(conversation = %conversation, error = %e, "Failed to update conversation context");
            audit.degrade(&e);
        }

        Processed {
            outcome: classification,
            audit,
        }
    }
}

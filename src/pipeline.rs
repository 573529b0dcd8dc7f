//! End-to-end ingestion pipeline.
//!
//! Wires the classifier and the content agents over one shared store.
//! `ingest` classifies a document and hands it to the routed agent; the
//! individual agents stay reachable for direct invocation.

use std::sync::Arc;

use serde::Serialize;

use crate::agents::{
    Agent, Classification, EmailAgent, EmailOutcome, IntentClassifier, JsonAgent, JsonOutcome,
    Processed, Route,
};
use crate::config::ClassifierConfig;
use crate::scorer::IntentScorer;
use crate::store::{ConversationId, ConversationStore};

/// Outcome of the routed content agent.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "agent", rename_all = "snake_case")]
pub enum RoutedOutcome {
    EmailAgent(Processed<EmailOutcome>),
    JsonAgent(Processed<JsonOutcome>),
}

/// Result of one full ingestion pass.
#[derive(Debug, Clone, Serialize)]
pub struct IngestResult {
    pub classification: Processed<Classification>,
    pub routed: RoutedOutcome,
}

/// Classifier plus content agents sharing one conversation store.
pub struct DocumentPipeline {
    classifier: IntentClassifier,
    email: EmailAgent,
    json: JsonAgent,
}

impl DocumentPipeline {
    pub fn new(
        store: ConversationStore,
        scorer: Arc<dyn IntentScorer>,
        config: ClassifierConfig,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(store.clone(), scorer, config),
            email: EmailAgent::new(store.clone()),
            json: JsonAgent::new(store),
        }
    }

    /// Classify a document, then hand it to the routed agent.
    pub async fn ingest(&self, raw: &[u8], conversation: &ConversationId) -> IngestResult {
        let classification = self.classifier.process(raw, conversation).await;
        let routed = match classification.outcome.route_to {
            Route::EmailAgent => {
                RoutedOutcome::EmailAgent(self.email.process(raw, conversation).await)
            }
            Route::JsonAgent => {
                RoutedOutcome::JsonAgent(self.json.process(raw, conversation).await)
            }
        };
        IngestResult {
            classification,
            routed,
        }
    }

    pub fn classifier(&self) -> &IntentClassifier {
        &self.classifier
    }

    pub fn email_agent(&self) -> &EmailAgent {
        &self.email
    }

    pub fn json_agent(&self) -> &JsonAgent {
        &self.json
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::{Intent, LexiconScorer, SentimentIntentScorer};
    use crate::store::LibSqlBackend;

    async fn pipeline() -> DocumentPipeline {
        let backend = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        DocumentPipeline::new(
            ConversationStore::new(backend),
            Arc::new(SentimentIntentScorer::new(Arc::new(LexiconScorer))),
            ClassifierConfig::default(),
        )
    }

    fn conv() -> ConversationId {
        ConversationId::new("conv-pipeline").unwrap()
    }

    #[tokio::test]
    async fn json_documents_reach_the_json_agent() {
        let pipeline = pipeline().await;
        let result = pipeline.ingest(br#"{"a": 1}"#, &conv()).await;

        assert_eq!(
            result.classification.outcome.route_to,
            Route::JsonAgent
        );
        match &result.routed {
            RoutedOutcome::JsonAgent(processed) => {
                assert_eq!(processed.outcome.status(), "success");
            }
            RoutedOutcome::EmailAgent(_) => panic!("expected the json agent"),
        }
    }

    #[tokio::test]
    async fn routed_outcome_serializes_with_an_agent_tag() {
        let pipeline = pipeline().await;
        let result = pipeline.ingest(br#"{"a": 1}"#, &conv()).await;

        let rendered = serde_json::to_value(&result).unwrap();
        assert_eq!(rendered["routed"]["agent"], "json_agent");
        assert_eq!(rendered["classification"]["outcome"]["format"], "json");
    }

    #[tokio::test]
    async fn agents_remain_directly_invocable() {
        let pipeline = pipeline().await;
        let id = conv();

        let processed = pipeline
            .email_agent()
            .process(b"From: a@b.example.com\r\nSubject: hi\r\n\r\nquote please", &id)
            .await;
        assert!(processed.outcome.report().is_some());

        // Only the email agent ran; no classification record exists.
        let history = pipeline.email_agent().history(&id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, "process_email");
    }

    #[tokio::test]
    async fn lexicon_scorer_drives_intent_end_to_end() {
        let pipeline = pipeline().await;
        let raw = b"From: buyer@example.com\r\n\
Subject: pricing\r\n\
\r\n\
We would like a quote for pricing on a large order, thank you.";

        let result = pipeline.ingest(raw, &conv()).await;
        assert_eq!(result.classification.outcome.intent, Intent::Rfq);
    }
}

//! Intent scoring for ingested documents.
//!
//! The classifier consumes an [`IntentScorer`]. [`SentimentIntentScorer`]
//! adapts a two-class sentiment model into intent labels for deployments
//! where no dedicated intent model is available. [`LexiconScorer`] is a
//! deterministic stand-in that needs no model weights.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ScorerError;

/// Recognized intent labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Invoice,
    Rfq,
    Complaint,
    Regulation,
    Unknown,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Invoice => "invoice",
            Intent::Rfq => "rfq",
            Intent::Complaint => "complaint",
            Intent::Regulation => "regulation",
            Intent::Unknown => "unknown",
        }
    }
}

/// Position of the negative class in a sentiment probability vector.
pub const NEGATIVE: usize = 0;
/// Position of the positive class in a sentiment probability vector.
pub const POSITIVE: usize = 1;

/// Probability a class must exceed before it is trusted.
pub const INTENT_THRESHOLD: f32 = 0.7;

/// Produces class probabilities for a text sample, indexed by
/// [`NEGATIVE`] and [`POSITIVE`].
#[async_trait]
pub trait TextScorer: Send + Sync {
    async fn score(&self, text: &str) -> Result<Vec<f32>, ScorerError>;
}

/// Maps a text sample to an intent label.
#[async_trait]
pub trait IntentScorer: Send + Sync {
    async fn intent_of(&self, text: &str) -> Result<Intent, ScorerError>;
}

// ── Sentiment adapter ───────────────────────────────────────────────────────

/// Adapts a two-class sentiment scorer into intent labels.
///
/// A confident positive sample reads as a request for quote, a confident
/// negative one as a complaint. Anything below the threshold stays
/// [`Intent::Unknown`].
pub struct SentimentIntentScorer {
    scorer: Arc<dyn TextScorer>,
    threshold: f32,
}

impl SentimentIntentScorer {
    pub fn new(scorer: Arc<dyn TextScorer>) -> Self {
        Self {
            scorer,
            threshold: INTENT_THRESHOLD,
        }
    }

    /// Replace the confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }
}

#[async_trait]
impl IntentScorer for SentimentIntentScorer {
    async fn intent_of(&self, text: &str) -> Result<Intent, ScorerError> {
        let probs = self.scorer.score(text).await?;
        let (Some(&negative), Some(&positive)) = (probs.get(NEGATIVE), probs.get(POSITIVE))
        else {
            return Err(ScorerError::Failed(format!(
                "expected 2 class probabilities, got {}",
                probs.len()
            )));
        };

        // The positive class is checked first when both clear the threshold.
        Ok(if positive > self.threshold {
            Intent::Rfq
        } else if negative > self.threshold {
            Intent::Complaint
        } else {
            Intent::Unknown
        })
    }
}

// ── Lexicon scorer ──────────────────────────────────────────────────────────

const POSITIVE_CUES: &[&str] = &[
    "quote",
    "quotation",
    "pricing",
    "purchase",
    "order",
    "interested",
    "thank",
];

const NEGATIVE_CUES: &[&str] = &[
    "complaint",
    "unacceptable",
    "refund",
    "broken",
    "disappointed",
    "faulty",
    "angry",
];

/// Deterministic scorer driven by keyword lexicons.
///
/// Scores are the fraction of matched positive and negative cue words, so
/// a sample dominated by one lexicon clears the confidence threshold.
#[derive(Debug, Default)]
pub struct LexiconScorer;

#[async_trait]
impl TextScorer for LexiconScorer {
    async fn score(&self, text: &str) -> Result<Vec<f32>, ScorerError> {
        let lower = text.to_lowercase();
        let positive = POSITIVE_CUES
            .iter()
            .filter(|cue| lower.contains(**cue))
            .count() as f32;
        let negative = NEGATIVE_CUES
            .iter()
            .filter(|cue| lower.contains(**cue))
            .count() as f32;

        let total = positive + negative;
        if total == 0.0 {
            return Ok(vec![0.5, 0.5]);
        }
        Ok(vec![negative / total, positive / total])
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

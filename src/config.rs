//! Configuration types.

use std::time::Duration;

/// Intent classifier configuration.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Maximum number of characters sampled from extracted content for scoring.
    pub sample_max_chars: usize,
    /// Deadline for a single scorer call before degrading to an unknown intent.
    pub scorer_deadline: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            sample_max_chars: 512,
            scorer_deadline: Duration::from_secs(5),
        }
    }
}

/// Retry policy for conversation store operations.
#[derive(Debug, Clone)]
pub struct StoreRetryPolicy {
    /// Total attempts per operation, including the first.
    pub attempts: u32,
    /// Delay between consecutive attempts.
    pub backoff: Duration,
}

impl Default for StoreRetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

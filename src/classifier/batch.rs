//! Single-batch classification: drive one batch to full coverage or
//! explicit degradation within a bounded attempt budget.
//!
//! Transport errors and structural parse failures retry the whole
//! uncovered set; content gaps shrink the retry to just the uncovered
//! tracks. None of these failures ever escape this module: exhaustion
//! folds every remaining track into an explicit unclassified result.

use super::models::{ClassificationStatus, TrackClassification, TrackRecord};
use super::parse::parse_response;
use super::prompt::build_prompt;
use crate::llm::{CompletionOptions, LlmProvider};
use std::time::Duration;
use tracing::{debug, warn};

/// Retry budget and backoff curve for one batch.
///
/// `max_attempts` is the total attempt budget (initial call included);
/// zero means no calls are made and every track degrades to
/// unclassified-no-response. The backoff doubles by default, absorbing
/// transient provider-side rate limiting without blocking other batches.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given attempt (attempt 1 is the initial call and
    /// never waits).
    fn backoff_before(&self, attempt: u32) -> Duration {
        debug_assert!(attempt >= 2);
        let exponent = (attempt - 2) as i32;
        self.initial_backoff
            .mul_f64(self.backoff_multiplier.powi(exponent))
    }
}

/// Classifies exactly one batch per call.
///
/// Retry state (attempt count, uncovered subset) lives on the stack of
/// `classify`, so concurrent batches share nothing but the provider.
pub struct BatchClassifier<'a> {
    provider: &'a dyn LlmProvider,
    options: CompletionOptions,
    policy: RetryPolicy,
}

impl<'a> BatchClassifier<'a> {
    pub fn new(
        provider: &'a dyn LlmProvider,
        options: CompletionOptions,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            options,
            policy,
        }
    }

    /// Resolve every track in the batch to a classification result.
    ///
    /// The returned vector always covers the batch exactly: classified
    /// tracks as the model assigned them, the rest explicitly
    /// unclassified with the failure reason in their status.
    pub async fn classify(&self, batch: &[TrackRecord]) -> Vec<TrackClassification> {
        debug_assert!(!batch.is_empty());

        let mut resolved: Vec<TrackClassification> = Vec::with_capacity(batch.len());
        // Borrowed selection over the original records; retries rebuild the
        // prompt from this shrinking view without cloning track data.
        let mut pending: Vec<&TrackRecord> = batch.iter().collect();
        let mut saw_response = false;

        for attempt in 1..=self.policy.max_attempts {
            if attempt > 1 {
                let delay = self.policy.backoff_before(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off before retry");
                tokio::time::sleep(delay).await;
            }

            let prompt = build_prompt(&pending);
            let raw = match self.provider.complete(&prompt, &self.options).await {
                Ok(raw) => {
                    saw_response = true;
                    raw
                }
                Err(err) => {
                    warn!(attempt, error = %err, tracks = pending.len(), "completion request failed");
                    continue;
                }
            };

            let mut entries = match parse_response(&raw, &pending) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(attempt, error = %err, "structurally invalid model response");
                    continue;
                }
            };

            pending.retain(|track| match entries.remove(&track.id) {
                Some(entry) => {
                    resolved.push(TrackClassification::classified(
                        track.id.clone(),
                        entry.category,
                        entry.rationale,
                    ));
                    false
                }
                None => true,
            });

            if pending.is_empty() {
                break;
            }
            debug!(
                attempt,
                uncovered = pending.len(),
                "coverage gap, will retry uncovered subset"
            );
        }

        if !pending.is_empty() {
            let status = if saw_response {
                ClassificationStatus::UnclassifiedAfterRetries
            } else {
                ClassificationStatus::UnclassifiedNoResponse
            };
            warn!(
                uncovered = pending.len(),
                attempts = self.policy.max_attempts,
                ?status,
                "attempt budget exhausted, degrading remaining tracks to unclassified"
            );
            for track in pending {
                resolved.push(TrackClassification::unclassified(track.id.clone(), status));
            }
        }

        resolved
    }
}

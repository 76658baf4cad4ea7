//! Full-run orchestration: partitioning, dispatch, merge and summary.

use super::batch::{BatchClassifier, RetryPolicy};
use super::models::{RunReport, RunSummary, TrackClassification, TrackRecord};
use crate::llm::{CompletionOptions, LlmProvider};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fatal data-integrity failure.
///
/// Unlike transport and parse failures, these indicate a partitioning or
/// upstream bug and abort the whole run rather than degrade.
#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("duplicate classification result for track {track_id}")]
    DuplicateTrack { track_id: String },

    #[error("classification result references unknown track {track_id}")]
    UnknownTrack { track_id: String },

    #[error("run resolved {resolved} of {expected} tracks")]
    MissingTracks { resolved: usize, expected: usize },
}

/// Configuration fixed for the duration of one orchestration call.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum tracks per LLM request.
    pub batch_size: usize,
    /// Concurrent batches in flight; 1 means strictly sequential.
    pub parallelism: usize,
    pub retry: RetryPolicy,
    pub completion: CompletionOptions,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            parallelism: 1,
            retry: RetryPolicy::default(),
            completion: CompletionOptions::default(),
        }
    }
}

/// Accumulates batch results slot-per-input-track, rejecting duplicates
/// and unknown identifiers. Input order is preserved in the output.
struct ResultSet {
    positions: HashMap<String, usize>,
    slots: Vec<Option<TrackClassification>>,
}

impl ResultSet {
    fn new(records: &[TrackRecord]) -> Result<Self, IntegrityError> {
        let mut positions = HashMap::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            if positions.insert(record.id.clone(), index).is_some() {
                return Err(IntegrityError::DuplicateTrack {
                    track_id: record.id.clone(),
                });
            }
        }
        Ok(Self {
            slots: vec![None; records.len()],
            positions,
        })
    }

    fn merge(&mut self, results: Vec<TrackClassification>) -> Result<(), IntegrityError> {
        for result in results {
            let Some(&position) = self.positions.get(&result.track_id) else {
                return Err(IntegrityError::UnknownTrack {
                    track_id: result.track_id,
                });
            };
            if self.slots[position].is_some() {
                return Err(IntegrityError::DuplicateTrack {
                    track_id: result.track_id,
                });
            }
            self.slots[position] = Some(result);
        }
        Ok(())
    }

    fn resolved(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Consume into the final, input-ordered result list.
    ///
    /// A complete run must have every slot filled; a partial (aborted) run
    /// returns whatever was merged before the abort.
    fn into_results(
        self,
        partial: bool,
    ) -> Result<Vec<TrackClassification>, IntegrityError> {
        let expected = self.slots.len();
        let resolved = self.resolved();
        if !partial && resolved != expected {
            return Err(IntegrityError::MissingTracks { resolved, expected });
        }
        Ok(self.slots.into_iter().flatten().collect())
    }
}

/// Runs the whole classification pipeline over an enriched library.
pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn LlmProvider>, config: OrchestratorConfig) -> Self {
        debug_assert!(config.batch_size >= 1);
        Self { provider, config }
    }

    /// Classify every record, honoring cancellation.
    ///
    /// Always yields exactly one result per input record unless the run is
    /// cancelled (results merged so far are returned, labeled `aborted`)
    /// or an integrity violation aborts it entirely.
    pub async fn run(
        &self,
        records: &[TrackRecord],
        cancel: &CancellationToken,
    ) -> Result<RunReport, IntegrityError> {
        let mut result_set = ResultSet::new(records)?;

        if records.is_empty() {
            return Ok(RunReport {
                results: Vec::new(),
                summary: RunSummary::compute(&[]),
                aborted: false,
            });
        }

        let batch_size = self.config.batch_size.max(1);
        let parallelism = self.config.parallelism.max(1);
        let total_batches = records.len().div_ceil(batch_size);

        info!(
            tracks = records.len(),
            batches = total_batches,
            batch_size,
            parallelism,
            provider = self.provider.name(),
            model = self.provider.model(),
            "starting classification run"
        );

        let classifier = BatchClassifier::new(
            &*self.provider,
            self.config.completion.clone(),
            self.config.retry.clone(),
        );
        let classifier_ref = &classifier;

        // Each batch future owns no shared mutable state; merging happens
        // here, single-writer, as completions arrive.
        let mut completions = stream::iter(records.chunks(batch_size).enumerate())
            .map(|(index, chunk)| async move {
                let results = classifier_ref.classify(chunk).await;
                (index, chunk.len(), results)
            })
            .buffer_unordered(parallelism);

        let mut aborted = false;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(
                        resolved = result_set.resolved(),
                        total = records.len(),
                        "run cancelled, returning partial results"
                    );
                    aborted = true;
                    break;
                }
                next = completions.next() => match next {
                    Some((index, size, results)) => {
                        result_set.merge(results)?;
                        debug!(
                            batch = index + 1,
                            of = total_batches,
                            tracks = size,
                            "batch resolved"
                        );
                    }
                    None => break,
                },
            }
        }
        // Dropping the stream cancels any in-flight batch futures.
        drop(completions);

        let results = result_set.into_results(aborted)?;
        let summary = RunSummary::compute(&results);

        info!(
            total = summary.total_tracks,
            unclassified = summary.unclassified,
            success_rate = %format!("{:.1}%", summary.success_rate * 100.0),
            aborted,
            "classification run complete"
        );

        Ok(RunReport {
            results,
            summary,
            aborted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::models::{Category, ClassificationStatus};
    use crate::classifier::testing::{FullCoverageProvider, ScriptedProvider};
    use crate::llm::LlmError;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tracks(n: usize) -> Vec<TrackRecord> {
        (0..n)
            .map(|i| TrackRecord {
                id: format!("id-{}", i),
                name: format!("Track {}", i),
                artists: vec!["artist".to_string()],
                genres: vec![],
                features: Default::default(),
                external_url: String::new(),
                source: "liked_songs".to_string(),
            })
            .collect()
    }

    fn config(batch_size: usize) -> OrchestratorConfig {
        OrchestratorConfig {
            batch_size,
            parallelism: 1,
            retry: RetryPolicy {
                max_attempts: 2,
                initial_backoff: std::time::Duration::from_millis(1),
                backoff_multiplier: 2.0,
            },
            completion: CompletionOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_coverage_invariant() {
        let records = tracks(60);
        let provider = Arc::new(FullCoverageProvider::new("House"));
        let orchestrator = Orchestrator::new(provider, config(25));

        let report = orchestrator
            .run(&records, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.results.len(), 60);
        let ids: HashSet<&str> = report.results.iter().map(|r| r.track_id.as_str()).collect();
        assert_eq!(ids.len(), 60);
        for record in &records {
            assert!(ids.contains(record.id.as_str()));
        }
        assert!(!report.aborted);
        assert_eq!(report.summary.categories[&Category::House], 60);
    }

    #[tokio::test]
    async fn test_batch_partition_determinism() {
        let records = tracks(60);
        let provider = Arc::new(FullCoverageProvider::new("Bass"));
        let orchestrator = Orchestrator::new(provider.clone(), config(25));

        orchestrator
            .run(&records, &CancellationToken::new())
            .await
            .unwrap();

        let prompts = provider.prompts();
        assert_eq!(prompts.len(), 3);
        let sizes: Vec<usize> = prompts
            .iter()
            .map(|p| p.matches("### Track ").count())
            .collect();
        assert_eq!(sizes, vec![25, 25, 10]);
        // Original order is preserved within each batch.
        assert!(prompts[0].contains("Track: \"Track 0\""));
        assert!(prompts[1].contains("Track: \"Track 25\""));
        assert!(prompts[2].contains("Track: \"Track 50\""));
    }

    #[tokio::test]
    async fn test_results_preserve_input_order() {
        let records = tracks(7);
        let provider = Arc::new(FullCoverageProvider::new("Dance Pop"));
        let orchestrator = Orchestrator::new(provider, config(3));

        let report = orchestrator
            .run(&records, &CancellationToken::new())
            .await
            .unwrap();

        let ids: Vec<&str> = report.results.iter().map(|r| r.track_id.as_str()).collect();
        let expected: Vec<String> = (0..7).map(|i| format!("id-{}", i)).collect();
        assert_eq!(ids, expected.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_empty_input() {
        let provider = Arc::new(FullCoverageProvider::new("House"));
        let orchestrator = Orchestrator::new(provider, config(25));

        let report = orchestrator
            .run(&[], &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.results.is_empty());
        assert_eq!(report.summary.total_tracks, 0);
        assert_eq!(report.summary.success_rate, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_never_crashes_the_run() {
        let records = tracks(5);
        let provider = Arc::new(ScriptedProvider::repeating(Ok(
            "garbage with no entries".to_string(),
        )));
        let orchestrator = Orchestrator::new(provider, config(25));

        let report = orchestrator
            .run(&records, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.results.len(), 5);
        assert!(report
            .results
            .iter()
            .all(|r| r.status == ClassificationStatus::UnclassifiedAfterRetries));
    }

    #[tokio::test]
    async fn test_duplicate_input_ids_are_fatal() {
        let mut records = tracks(3);
        records[2].id = "id-0".to_string();
        let provider = Arc::new(FullCoverageProvider::new("House"));
        let orchestrator = Orchestrator::new(provider, config(25));

        let err = orchestrator
            .run(&records, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IntegrityError::DuplicateTrack { .. }));
    }

    /// Answers the first batch, then cancels the run and hangs so the
    /// second batch stays in flight when the abort lands.
    struct CancelAfterFirstBatch {
        cancel: CancellationToken,
        calls: AtomicUsize,
    }

    impl CancelAfterFirstBatch {
        fn new(cancel: CancellationToken) -> Self {
            Self {
                cancel,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for CancelAfterFirstBatch {
        fn name(&self) -> &str {
            "cancel-after-first"
        }

        fn model(&self) -> &str {
            "cancel-after-first"
        }

        async fn complete(
            &self,
            prompt: &str,
            _options: &CompletionOptions,
        ) -> Result<String, LlmError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                let count = prompt.matches("### Track ").count();
                let response = (1..=count)
                    .map(|n| format!("Track {}: **House**", n))
                    .collect::<Vec<_>>()
                    .join("\n");
                return Ok(response);
            }
            self.cancel.cancel();
            futures::future::pending::<Result<String, LlmError>>().await
        }
    }

    #[tokio::test]
    async fn test_mid_run_cancellation_keeps_merged_batches() {
        let records = tracks(6);
        let cancel = CancellationToken::new();
        let provider = Arc::new(CancelAfterFirstBatch::new(cancel.clone()));
        let orchestrator = Orchestrator::new(provider, config(3));

        let report = orchestrator.run(&records, &cancel).await.unwrap();

        assert!(report.aborted);
        // The first batch was merged before the abort and survives; the
        // in-flight second batch is dropped.
        assert_eq!(report.results.len(), 3);
        let ids: HashSet<&str> = report.results.iter().map(|r| r.track_id.as_str()).collect();
        assert_eq!(ids, HashSet::from(["id-0", "id-1", "id-2"]));
        assert!(report
            .results
            .iter()
            .all(|r| r.status == ClassificationStatus::Classified));
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_returns_partial_report() {
        let records = tracks(10);
        let provider = Arc::new(FullCoverageProvider::new("House"));
        let orchestrator = Orchestrator::new(provider, config(5));

        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = orchestrator.run(&records, &cancel).await.unwrap();
        assert!(report.aborted);
        assert!(report.results.len() <= records.len());
    }

    #[test]
    fn test_remerging_a_batch_is_an_integrity_error() {
        let records = tracks(3);
        let mut result_set = ResultSet::new(&records).unwrap();

        let batch_results: Vec<TrackClassification> = records
            .iter()
            .map(|r| TrackClassification::classified(r.id.clone(), Category::House, None))
            .collect();

        result_set.merge(batch_results.clone()).unwrap();
        let err = result_set.merge(batch_results).unwrap_err();
        assert!(matches!(err, IntegrityError::DuplicateTrack { .. }));
    }

    #[test]
    fn test_merge_rejects_unknown_identifier() {
        let records = tracks(2);
        let mut result_set = ResultSet::new(&records).unwrap();

        let err = result_set
            .merge(vec![TrackClassification::classified(
                "not-an-input-id",
                Category::Bass,
                None,
            )])
            .unwrap_err();
        assert!(matches!(err, IntegrityError::UnknownTrack { .. }));
    }

    #[test]
    fn test_incomplete_non_partial_run_is_an_integrity_error() {
        let records = tracks(2);
        let result_set = ResultSet::new(&records).unwrap();
        let err = result_set.into_results(false).unwrap_err();
        assert!(matches!(
            err,
            IntegrityError::MissingTracks {
                resolved: 0,
                expected: 2
            }
        ));
    }
}

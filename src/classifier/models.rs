//! Data models for the classification pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Bounded acoustic descriptors for one track.
///
/// Individual fields are `None` when enrichment could not produce them;
/// the prompt renders missing values as "unknown".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioFeatures {
    /// Tempo in BPM.
    pub tempo: Option<f64>,
    /// Energy, 0.0 - 1.0.
    pub energy: Option<f64>,
    /// Danceability, 0.0 - 1.0.
    pub danceability: Option<f64>,
    /// Valence (musical positiveness), 0.0 - 1.0.
    pub valence: Option<f64>,
}

/// One enriched track, the unit of classification work.
///
/// The `id` is assigned at ingestion by the track source and is never
/// mutated inside the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackRecord {
    pub id: String,
    pub name: String,
    pub artists: Vec<String>,
    pub genres: Vec<String>,
    #[serde(default)]
    pub features: AudioFeatures,
    pub external_url: String,
    /// Where the track came from, e.g. "liked_songs" or "playlist:<name>".
    pub source: String,
}

/// Closed taxonomy of target genre buckets.
///
/// The pipeline never accepts a label outside this set; anything the model
/// invents is dropped and the track ends up unclassified instead.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Category {
    #[serde(rename = "Dance Pop")]
    DancePop,
    House,
    Bass,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::DancePop, Category::House, Category::Bass];

    /// Canonical display label, the only form ever stored or serialized.
    pub fn label(&self) -> &'static str {
        match self {
            Category::DancePop => "Dance Pop",
            Category::House => "House",
            Category::Bass => "Bass",
        }
    }

    /// One-line definition used to anchor the model in the prompt.
    pub fn definition(&self) -> &'static str {
        match self {
            Category::DancePop => {
                "melodic, catchy, often vocal-heavy tracks intended for mainstream dance \
                 audiences. Think Dua Lipa, Calvin Harris, or remixes of pop hits"
            }
            Category::House => {
                "rhythm-driven tracks with 4/4 beats, consistent grooves, minimal vocals, \
                 and strong club energy. Think deep house, tech house, or progressive house"
            }
            Category::Bass => {
                "genres like dubstep, trap, future bass, or other subgenres focused on \
                 heavy low-end, syncopated beats, or experimental production"
            }
        }
    }

    /// Parse a model-produced label into a taxonomy member.
    ///
    /// Exact case-insensitive matches win; otherwise a substring match in
    /// either direction remaps near-misses like "tech house" or
    /// "Dance Pop / EDM" onto the canonical category. Returns `None` for
    /// anything outside the taxonomy.
    pub fn parse(raw: &str) -> Option<Category> {
        let needle = raw.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        for category in Category::ALL {
            if category.label().to_lowercase() == needle {
                return Some(category);
            }
        }
        for category in Category::ALL {
            let label = category.label().to_lowercase();
            if needle.contains(&label) || label.contains(&needle) {
                return Some(category);
            }
        }
        None
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How a track's classification attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationStatus {
    /// The model assigned a valid taxonomy category.
    Classified,
    /// The attempt budget ran out; at least one response was received but
    /// never covered this track with a valid category.
    UnclassifiedAfterRetries,
    /// Every attempt for this track failed before a response arrived.
    UnclassifiedNoResponse,
}

/// Final per-track outcome of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackClassification {
    pub track_id: String,
    /// `None` means the unclassified sentinel; `status` carries the reason.
    pub category: Option<Category>,
    pub status: ClassificationStatus,
    /// Free-form trailing text the model attached to its prediction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl TrackClassification {
    pub fn classified(
        track_id: impl Into<String>,
        category: Category,
        rationale: Option<String>,
    ) -> Self {
        Self {
            track_id: track_id.into(),
            category: Some(category),
            status: ClassificationStatus::Classified,
            rationale,
        }
    }

    pub fn unclassified(track_id: impl Into<String>, status: ClassificationStatus) -> Self {
        debug_assert!(status != ClassificationStatus::Classified);
        Self {
            track_id: track_id.into(),
            category: None,
            status,
            rationale: None,
        }
    }
}

/// Aggregate over all classification results, computed once per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_tracks: usize,
    /// Count per category; every taxonomy member is present, possibly zero.
    pub categories: BTreeMap<Category, usize>,
    pub unclassified: usize,
    /// classified / total; 1.0 by convention for an empty run.
    pub success_rate: f64,
}

impl RunSummary {
    pub fn compute(results: &[TrackClassification]) -> Self {
        let mut categories: BTreeMap<Category, usize> =
            Category::ALL.iter().map(|c| (*c, 0)).collect();
        let mut unclassified = 0usize;

        for result in results {
            match result.category {
                Some(category) => *categories.entry(category).or_insert(0) += 1,
                None => unclassified += 1,
            }
        }

        let total_tracks = results.len();
        let success_rate = if total_tracks == 0 {
            1.0
        } else {
            (total_tracks - unclassified) as f64 / total_tracks as f64
        };

        Self {
            total_tracks,
            categories,
            unclassified,
            success_rate,
        }
    }
}

/// Everything a run produces: one result per input track plus the summary.
///
/// `aborted` marks a partial run (user cancellation): results merged before
/// the abort are valid but cover only a subset of the input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub results: Vec<TrackClassification>,
    pub summary: RunSummary,
    pub aborted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_canonical() {
        assert_eq!(Category::parse("Dance Pop"), Some(Category::DancePop));
        assert_eq!(Category::parse("House"), Some(Category::House));
        assert_eq!(Category::parse("Bass"), Some(Category::Bass));
    }

    #[test]
    fn test_category_parse_case_insensitive() {
        assert_eq!(Category::parse("dance pop"), Some(Category::DancePop));
        assert_eq!(Category::parse("HOUSE"), Some(Category::House));
        assert_eq!(Category::parse("  bass "), Some(Category::Bass));
    }

    #[test]
    fn test_category_parse_substring_remap() {
        assert_eq!(Category::parse("tech house"), Some(Category::House));
        assert_eq!(Category::parse("Dance Pop / EDM"), Some(Category::DancePop));
    }

    #[test]
    fn test_category_parse_rejects_unknown_labels() {
        assert_eq!(Category::parse("Jazz"), None);
        assert_eq!(Category::parse("Techno"), None);
        assert_eq!(Category::parse(""), None);
    }

    #[test]
    fn test_category_serializes_to_canonical_label() {
        let json = serde_json::to_string(&Category::DancePop).unwrap();
        assert_eq!(json, "\"Dance Pop\"");
        let back: Category = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Category::DancePop);
    }

    #[test]
    fn test_summary_empty_run_success_rate_is_one() {
        let summary = RunSummary::compute(&[]);
        assert_eq!(summary.total_tracks, 0);
        assert_eq!(summary.unclassified, 0);
        assert_eq!(summary.success_rate, 1.0);
        // All taxonomy members present with zero counts.
        assert_eq!(summary.categories.len(), Category::ALL.len());
        assert!(summary.categories.values().all(|&n| n == 0));
    }

    #[test]
    fn test_summary_counts_and_success_rate() {
        let results = vec![
            TrackClassification::classified("a", Category::House, None),
            TrackClassification::classified("b", Category::House, None),
            TrackClassification::classified("c", Category::Bass, None),
            TrackClassification::unclassified("d", ClassificationStatus::UnclassifiedAfterRetries),
        ];
        let summary = RunSummary::compute(&results);
        assert_eq!(summary.total_tracks, 4);
        assert_eq!(summary.categories[&Category::House], 2);
        assert_eq!(summary.categories[&Category::Bass], 1);
        assert_eq!(summary.categories[&Category::DancePop], 0);
        assert_eq!(summary.unclassified, 1);
        assert_eq!(summary.success_rate, 0.75);
    }

    #[test]
    fn test_track_classification_round_trips() {
        let result = TrackClassification::classified(
            "t1",
            Category::Bass,
            Some("heavy low-end".to_string()),
        );
        let json = serde_json::to_string(&result).unwrap();
        let back: TrackClassification = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);

        let result =
            TrackClassification::unclassified("t2", ClassificationStatus::UnclassifiedNoResponse);
        let json = serde_json::to_string(&result).unwrap();
        let back: TrackClassification = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }
}

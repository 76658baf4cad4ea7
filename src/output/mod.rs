//! Result persistence: JSON report and per-category playlist files.
//!
//! Pure consumers of the pipeline's output; the classification core never
//! touches the filesystem.

use crate::classifier::{Category, RunReport, TrackClassification, TrackRecord};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Run parameters recorded alongside the results.
#[derive(Debug, Clone, Serialize)]
pub struct RunMetadata {
    pub provider: String,
    pub model: String,
    pub batch_size: usize,
}

#[derive(Serialize)]
struct ResultsDocument<'a> {
    metadata: DocumentMetadata<'a>,
    summary: &'a crate::classifier::RunSummary,
    tracks: Vec<TrackEntry<'a>>,
}

#[derive(Serialize)]
struct DocumentMetadata<'a> {
    timestamp: String,
    total_tracks: usize,
    aborted: bool,
    #[serde(flatten)]
    run: &'a RunMetadata,
}

#[derive(Serialize)]
struct TrackEntry<'a> {
    #[serde(flatten)]
    track: &'a TrackRecord,
    classification: &'a TrackClassification,
}

/// Write the full run report as a JSON document, joining each result with
/// its track metadata. Returns the path written.
///
/// When `path` is `None` a timestamped filename is generated in the
/// current directory.
pub fn save_results(
    path: Option<&Path>,
    tracks: &[TrackRecord],
    report: &RunReport,
    metadata: &RunMetadata,
) -> Result<PathBuf> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(format!(
            "mixsort_results_{}.json",
            Utc::now().format("%Y%m%d_%H%M%S")
        )),
    };

    let by_id: HashMap<&str, &TrackRecord> =
        tracks.iter().map(|t| (t.id.as_str(), t)).collect();

    let mut entries = Vec::with_capacity(report.results.len());
    for result in &report.results {
        let track = by_id
            .get(result.track_id.as_str())
            .with_context(|| format!("result for unknown track {}", result.track_id))?;
        entries.push(TrackEntry {
            track,
            classification: result,
        });
    }

    let document = ResultsDocument {
        metadata: DocumentMetadata {
            timestamp: Utc::now().to_rfc3339(),
            total_tracks: report.summary.total_tracks,
            aborted: report.aborted,
            run: metadata,
        },
        summary: &report.summary,
        tracks: entries,
    };

    let json = serde_json::to_string_pretty(&document)?;
    fs::write(&path, json).with_context(|| format!("failed to write {:?}", path))?;
    info!(path = %path.display(), "Results saved");
    Ok(path)
}

/// Export one playlist text file per non-empty category, plus one for
/// unclassified tracks. Returns the paths created.
pub fn export_playlists(
    dir: &Path,
    tracks: &[TrackRecord],
    report: &RunReport,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {:?}", dir))?;

    let by_id: HashMap<&str, &TrackRecord> =
        tracks.iter().map(|t| (t.id.as_str(), t)).collect();

    let mut groups: Vec<(String, Vec<&TrackRecord>)> = Category::ALL
        .iter()
        .map(|c| (c.label().to_string(), Vec::new()))
        .collect();
    groups.push(("Unclassified".to_string(), Vec::new()));

    for result in &report.results {
        let Some(track) = by_id.get(result.track_id.as_str()) else {
            continue;
        };
        let index = match result.category {
            Some(category) => Category::ALL
                .iter()
                .position(|c| *c == category)
                .unwrap_or(groups.len() - 1),
            None => groups.len() - 1,
        };
        groups[index].1.push(track);
    }

    let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S");
    let mut created = Vec::new();
    for (label, members) in groups {
        if members.is_empty() {
            continue;
        }
        let filename = format!(
            "{}_playlist.txt",
            label.to_lowercase().replace(' ', "_")
        );
        let path = dir.join(filename);

        let mut body = String::new();
        let _ = writeln!(body, "# {} Playlist", label);
        let _ = writeln!(body, "# Generated on {}", timestamp);
        let _ = writeln!(body, "# {} tracks", members.len());
        body.push('\n');
        for track in &members {
            let _ = writeln!(body, "{} - {}", track.name, track.artists.join(", "));
            if !track.external_url.is_empty() {
                let _ = writeln!(body, "  {}", track.external_url);
            }
            body.push('\n');
        }

        fs::write(&path, body).with_context(|| format!("failed to write {:?}", path))?;
        info!(path = %path.display(), tracks = members.len(), "Playlist exported");
        created.push(path);
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{
        AudioFeatures, ClassificationStatus, RunSummary, TrackClassification,
    };
    use tempfile::TempDir;

    fn track(id: &str, name: &str) -> TrackRecord {
        TrackRecord {
            id: id.to_string(),
            name: name.to_string(),
            artists: vec!["DJ Test".to_string()],
            genres: vec!["house".to_string()],
            features: AudioFeatures {
                tempo: Some(125.0),
                energy: Some(0.9),
                danceability: Some(0.8),
                valence: Some(0.6),
            },
            external_url: format!("https://open.spotify.com/track/{}", id),
            source: "liked_songs".to_string(),
        }
    }

    fn report(results: Vec<TrackClassification>) -> RunReport {
        let summary = RunSummary::compute(&results);
        RunReport {
            results,
            summary,
            aborted: false,
        }
    }

    #[test]
    fn test_save_results_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.json");
        let tracks = vec![track("a", "First"), track("b", "Second")];
        let report = report(vec![
            TrackClassification::classified("a", Category::House, None),
            TrackClassification::unclassified("b", ClassificationStatus::UnclassifiedAfterRetries),
        ]);
        let metadata = RunMetadata {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            batch_size: 25,
        };

        let written = save_results(Some(&path), &tracks, &report, &metadata).unwrap();
        assert_eq!(written, path);

        let raw = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["metadata"]["provider"], "openai");
        assert_eq!(value["metadata"]["total_tracks"], 2);
        assert_eq!(value["summary"]["categories"]["House"], 1);
        assert_eq!(value["tracks"][0]["name"], "First");
        assert_eq!(value["tracks"][0]["classification"]["category"], "House");
        assert_eq!(
            value["tracks"][1]["classification"]["status"],
            "unclassified_after_retries"
        );
    }

    #[test]
    fn test_export_playlists_groups_by_category() {
        let dir = TempDir::new().unwrap();
        let tracks = vec![track("a", "Deep Cut"), track("b", "Drop It"), track("c", "Lost")];
        let report = report(vec![
            TrackClassification::classified("a", Category::House, None),
            TrackClassification::classified("b", Category::Bass, None),
            TrackClassification::unclassified("c", ClassificationStatus::UnclassifiedNoResponse),
        ]);

        let created = export_playlists(dir.path(), &tracks, &report).unwrap();
        let names: Vec<String> = created
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(names.contains(&"house_playlist.txt".to_string()));
        assert!(names.contains(&"bass_playlist.txt".to_string()));
        assert!(names.contains(&"unclassified_playlist.txt".to_string()));
        // No tracks were classified Dance Pop, so no file for it.
        assert!(!names.contains(&"dance_pop_playlist.txt".to_string()));

        let house = fs::read_to_string(dir.path().join("house_playlist.txt")).unwrap();
        assert!(house.contains("# House Playlist"));
        assert!(house.contains("# 1 tracks"));
        assert!(house.contains("Deep Cut - DJ Test"));
        assert!(house.contains("https://open.spotify.com/track/a"));
    }

    #[test]
    fn test_export_playlists_empty_report_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let created = export_playlists(dir.path(), &[], &report(vec![])).unwrap();
        assert!(created.is_empty());
    }
}

//! Prompt construction for batch classification requests.
//!
//! Pure functions of the batch and the taxonomy; no network or state.
//! Both LLM backends consume the same prompt text, only the request
//! envelope differs at the provider layer.

use super::models::{Category, TrackRecord};
use std::fmt::Write;

/// Few-shot examples anchoring the expected output format.
const EXAMPLES: &str = r#"### Example 1
Track: "One Kiss"
Artist: Calvin Harris, Dua Lipa
Genres: dance pop, pop, EDM
Tempo: 124 BPM
Energy: 0.80
Danceability: 0.85
Prediction: **Dance Pop**

### Example 2
Track: "Losing It"
Artist: Fisher
Genres: tech house, house
Tempo: 125 BPM
Energy: 0.90
Danceability: 0.82
Prediction: **House**

### Example 3
Track: "Core"
Artist: RL Grime
Genres: trap, bass, electronic
Tempo: 150 BPM
Energy: 0.95
Danceability: 0.60
Prediction: **Bass**"#;

/// Render a batch of tracks into a single classification prompt.
///
/// Every track is enumerated with its metadata and a 1-based ordinal; the
/// ordinal is the wire identifier the parser maps back onto the stable
/// track id. The orchestrator never builds empty batches.
pub fn build_prompt(batch: &[&TrackRecord]) -> String {
    debug_assert!(!batch.is_empty());

    let mut prompt = String::with_capacity(2048 + batch.len() * 256);
    prompt.push_str(
        "You are an expert in electronic music categorization, helping DJs classify \
         tracks into broad electronic genres. The available categories are:\n\n",
    );
    for category in Category::ALL {
        let _ = writeln!(prompt, "- {}: {}.", category.label(), category.definition());
    }
    prompt.push_str("\nCategorize each song based on the metadata provided.\n\n");
    prompt.push_str(EXAMPLES);
    prompt.push_str("\n\n");

    for (index, track) in batch.iter().enumerate() {
        if index > 0 {
            prompt.push('\n');
        }
        render_track(&mut prompt, track, index + 1);
    }

    prompt.push_str(
        "\nRespond with ONLY the predictions in this exact format for each track:\n\
         Track X: **Category**\n\n\
         Do not include any other text, explanations, or formatting.",
    );
    prompt
}

fn render_track(out: &mut String, track: &TrackRecord, ordinal: usize) {
    let artists = join_or_unknown(&track.artists);
    let genres = join_or_unknown(&track.genres);
    let _ = writeln!(out, "### Track {}", ordinal);
    let _ = writeln!(out, "Track: \"{}\"", track.name);
    let _ = writeln!(out, "Artist: {}", artists);
    let _ = writeln!(out, "Genres: {}", genres);
    match track.features.tempo {
        Some(tempo) => {
            let _ = writeln!(out, "Tempo: {:.0} BPM", tempo);
        }
        None => {
            let _ = writeln!(out, "Tempo: unknown");
        }
    }
    let _ = writeln!(out, "Energy: {}", fmt_ratio(track.features.energy));
    let _ = writeln!(out, "Danceability: {}", fmt_ratio(track.features.danceability));
    let _ = writeln!(out, "Prediction:");
}

fn join_or_unknown(values: &[String]) -> String {
    if values.is_empty() {
        "unknown".to_string()
    } else {
        values.join(", ")
    }
}

fn fmt_ratio(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.2}", v),
        None => "unknown".to_string(),
    }
}

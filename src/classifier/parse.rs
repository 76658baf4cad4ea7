//! Parsing and validation of raw model responses.
//!
//! The parser turns free-form model output into a mapping from track id to
//! taxonomy category. Partial coverage is a normal outcome and is left for
//! the batch classifier to detect; only total structural failure is an
//! error.

use super::models::{Category, TrackRecord};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::warn;

/// Total structural failure: the response could not be decomposed into
/// per-track entries at all.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no classification entries found in model response")]
    NoEntries,
}

/// One validated entry extracted from a response.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEntry {
    pub category: Category,
    pub rationale: Option<String>,
}

/// Matches `Track N: **Category**` lines, tolerating surrounding
/// whitespace and capturing any trailing text as rationale.
fn entry_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?mi)^\s*track\s+(\d+)\s*:\s*\*\*([^*\n]+)\*\*[ \t]*(.*)$")
            .expect("entry pattern must compile")
    })
}

/// Decompose a raw model response against the originating batch.
///
/// Validation, in order: structural decomposition (zero entries is a
/// `ParseError`), ordinal fidelity (entries outside `1..=batch.len()` are
/// dropped with a warning), category validity (labels outside the taxonomy
/// are dropped with a warning), and duplicate ordinals (first valid entry
/// wins).
///
/// The returned map may cover any subset of the batch, including none of
/// it; coverage gaps are the batch classifier's concern.
pub fn parse_response(
    raw: &str,
    batch: &[&TrackRecord],
) -> Result<HashMap<String, ParsedEntry>, ParseError> {
    let mut entries: HashMap<String, ParsedEntry> = HashMap::new();
    let mut seen_ordinals: Vec<usize> = Vec::new();
    let mut matched = 0usize;

    for captures in entry_pattern().captures_iter(raw) {
        matched += 1;

        let ordinal: usize = match captures[1].parse() {
            Ok(n) => n,
            Err(_) => continue,
        };

        if ordinal == 0 || ordinal > batch.len() {
            warn!(ordinal, batch_size = batch.len(), "response entry references unknown track, dropping");
            continue;
        }

        let label = captures[2].trim();
        let Some(category) = Category::parse(label) else {
            warn!(ordinal, label, "response entry names a label outside the taxonomy, dropping");
            continue;
        };

        // Only valid entries claim an ordinal; an invalid first occurrence
        // does not shadow a valid later one.
        if seen_ordinals.contains(&ordinal) {
            warn!(ordinal, "duplicate response entry, keeping first occurrence");
            continue;
        }
        seen_ordinals.push(ordinal);

        let rationale = match captures.get(3).map(|m| m.as_str().trim()) {
            Some(text) if !text.is_empty() => Some(text.to_string()),
            _ => None,
        };

        let track_id = batch[ordinal - 1].id.clone();
        entries.insert(track_id, ParsedEntry { category, rationale });
    }

    if matched == 0 {
        return Err(ParseError::NoEntries);
    }
    Ok(entries)
}

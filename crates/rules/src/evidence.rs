//! Evidence selection for triggered alerts.
//!
//! Every candidate document in the alert's segment and day is scored by
//! [`contribution`] and the top `k` are kept, highest first. Ties keep the
//! order in which the candidates were read.

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use tracing::warn;
use uuid::Uuid;

use moodwatch_core::{DocumentInference, Evidence, Highlight};

/// Emotion labels that add weight to a candidate.
pub const RISK_EMOTIONS: [&str; 4] = ["sadness", "fear", "fatigue", "anger"];

const TARGET_SENTIMENT: &str = "negative";
const SENTIMENT_WEIGHT: f64 = 1.0;
const EMOTION_WEIGHT: f64 = 0.5;
const KEYWORD_WEIGHT: f64 = 0.2;
const DEFAULT_CONFIDENCE: f64 = 0.5;
const CONFIDENCE_FLOOR: f64 = 0.5;
const HIGHLIGHT_LABEL: &str = "keyword";

/// Whole-word, case-insensitive matcher for a rule's keyword list.
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    patterns: Vec<(String, Regex)>,
}

/// Keyword matches in one text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeywordMatches {
    /// Lowercased keywords that matched, deduped, first-seen order.
    pub hits: Vec<String>,
    /// One span per occurrence, grouped by keyword in list order.
    pub highlights: Vec<Highlight>,
}

impl KeywordMatcher {
    /// Compile `keywords`. Empty entries are skipped.
    pub fn new(keywords: &[String]) -> Self {
        let patterns = keywords
            .iter()
            .filter(|kw| !kw.is_empty())
            .filter_map(|kw| {
                let pattern = format!(r"\b{}\b", regex::escape(kw));
                match RegexBuilder::new(&pattern).case_insensitive(true).build() {
                    Ok(re) => Some((kw.to_lowercase(), re)),
                    Err(e) => {
                        warn!(keyword = %kw, error = %e, "skipping keyword that does not compile");
                        None
                    }
                }
            })
            .collect();
        Self { patterns }
    }

    /// Find every keyword occurrence in `text`. Offsets are in characters.
    pub fn find(&self, text: &str) -> KeywordMatches {
        let mut out = KeywordMatches::default();
        for (keyword, re) in &self.patterns {
            for m in re.find_iter(text) {
                if !out.hits.contains(keyword) {
                    out.hits.push(keyword.clone());
                }
                let start = text[..m.start()].chars().count();
                let matched = m.as_str();
                out.highlights.push(Highlight {
                    start,
                    end: start + matched.chars().count(),
                    label: HIGHLIGHT_LABEL.to_string(),
                    text: matched.to_string(),
                });
            }
        }
        out
    }
}

/// Score one candidate.
///
/// `(negative + 0.5 * risk emotions + 0.2 * keyword hits) * (0.5 + confidence)`,
/// with a missing confidence read as 0.5.
pub fn contribution(
    sentiment: Option<&str>,
    emotions: &[&str],
    confidence: Option<f64>,
    distinct_hits: usize,
) -> f64 {
    let mut score = 0.0;
    if sentiment == Some(TARGET_SENTIMENT) {
        score += SENTIMENT_WEIGHT;
    }
    let risk = emotions.iter().filter(|e| RISK_EMOTIONS.contains(*e)).count();
    score += EMOTION_WEIGHT * risk as f64;
    score += KEYWORD_WEIGHT * distinct_hits as f64;

    score * (CONFIDENCE_FLOOR + confidence.unwrap_or(DEFAULT_CONFIDENCE))
}

/// Rank `candidates` and build evidence rows for the top `top_k`.
///
/// Each candidate should carry its document's latest inference. Ranks start
/// at 1.
pub fn select_evidence(
    alert_id: Uuid,
    candidates: &[DocumentInference],
    matcher: &KeywordMatcher,
    top_k: usize,
    now: DateTime<Utc>,
) -> Vec<Evidence> {
    let mut scored: Vec<(f64, &DocumentInference, KeywordMatches)> = candidates
        .iter()
        .map(|c| {
            let matches = matcher.find(&c.document.text_redacted);
            let score = contribution(
                c.inference.sentiment.as_deref(),
                &c.inference.distinct_emotions(),
                c.inference.calibrated_confidence,
                matches.hits.len(),
            );
            (score, c, matches)
        })
        .collect();

    // `sort_by` is stable, so equal scores keep encounter order.
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));

    scored
        .into_iter()
        .take(top_k)
        .enumerate()
        .map(|(i, (score, c, matches))| Evidence {
            id: Uuid::new_v4(),
            alert_id,
            document_id: c.document.id,
            rank: i as u32 + 1,
            contribution: score,
            emotion_match: c.inference.sentiment.clone(),
            keyword_hits: matches.hits,
            highlights: matches.highlights,
            created_at: now,
        })
        .collect()
}

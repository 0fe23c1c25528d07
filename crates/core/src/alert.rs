//! Alert rules, materialized alerts and their evidence.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::DocId;
use crate::segment::SegmentKey;

/// Alert type produced by the negative-rate spike detector.
pub const RISK_SPIKE: &str = "risk_spike";

/// Metric the spike detector watches.
pub const NEGATIVE_RATE: &str = "negative_rate";

/// Operator-configured rule. `definition` is the raw JSON document read by
/// the rule engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertRule {
    pub id: Uuid,
    pub name: String,
    pub enabled: bool,
    pub definition: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// Statistics and rule identity captured when an alert fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_name: Option<String>,
    pub median: f64,
    pub mad: f64,
    pub z: f64,
    pub baseline_days: u32,
    /// Baseline days that met `min_docs` and entered the median.
    pub baseline_samples: usize,
    pub min_docs: i64,
    pub z_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub day: NaiveDate,
    pub alert_type: String,
    pub severity: Severity,
    pub segment: SegmentKey,
    pub metric: String,
    pub value: f64,
    pub baseline: BaselineSnapshot,
    pub message: String,
}

/// One keyword occurrence inside a document's redacted text.
///
/// Offsets are character (not byte) positions, end exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Highlight {
    pub start: usize,
    pub end: usize,
    pub label: String,
    pub text: String,
}

/// A ranked document attached to an alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub document_id: DocId,
    /// 1-based position in the alert's ranking.
    pub rank: u32,
    pub contribution: f64,
    /// The candidate's sentiment label (historically named "emotion_match").
    pub emotion_match: Option<String>,
    pub keyword_hits: Vec<String>,
    pub highlights: Vec<Highlight>,
    pub created_at: DateTime<Utc>,
}

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::segment::SegmentKey;

/// Unique document identifier.
pub type DocId = Uuid;

/// A redacted support record as held by the document store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: DocId,
    pub segment: SegmentKey,
    /// PII-redacted text; the only text this system ever sees.
    pub text_redacted: String,
    /// Event time from the payload, when the producer supplied one.
    pub timestamp: Option<DateTime<Utc>>,
    /// Ingestion time.
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Event time, falling back to ingestion time.
    pub fn event_time(&self) -> DateTime<Utc> {
        self.timestamp.unwrap_or(self.created_at)
    }

    pub fn event_day(&self) -> NaiveDate {
        self.event_time().date_naive()
    }
}

/// One model inference over a document. A document may have several.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Inference {
    pub id: Uuid,
    pub document_id: DocId,
    pub sentiment: Option<String>,
    pub emotion_labels: Option<Vec<String>>,
    pub calibrated_confidence: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Inference {
    /// Emotion labels with duplicates removed, first-seen order kept.
    pub fn distinct_emotions(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for label in self.emotion_labels.iter().flatten() {
            if !out.contains(&label.as_str()) {
                out.push(label.as_str());
            }
        }
        out
    }
}

/// A document joined with one of its inference results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentInference {
    pub document: Document,
    pub inference: Inference,
}

//! Daily and rolling aggregate records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::segment::SegmentKey;

/// Grouping key shared by daily and rolling aggregates.
///
/// `emotion: None` is the no-emotion bucket for documents without labels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketKey {
    pub segment: SegmentKey,
    pub sentiment: Option<String>,
    pub emotion: Option<String>,
}

/// Per-day counts for one `(segment, sentiment, emotion)` bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub id: Uuid,
    pub day: NaiveDate,
    #[serde(flatten)]
    pub bucket: BucketKey,
    pub doc_count: i64,
    /// Mean of the confidences present; `None` when no record carried one.
    pub avg_confidence: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// A trailing window `[as_of_day - window_days + 1, as_of_day]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregateWindow {
    pub as_of_day: NaiveDate,
    pub window_days: u32,
}

impl AggregateWindow {
    pub fn new(as_of_day: NaiveDate, window_days: u32) -> Self {
        Self { as_of_day, window_days }
    }

    /// First day inside the window. `None` for an empty window or a start
    /// before the calendar's range.
    pub fn start_day(&self) -> Option<NaiveDate> {
        let back = self.window_days.checked_sub(1)?;
        self.as_of_day.checked_sub_days(chrono::Days::new(u64::from(back)))
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        match self.start_day() {
            Some(start) => start <= day && day <= self.as_of_day,
            None => false,
        }
    }
}

/// Multi-day window counts for one bucket, ending at `as_of_day` inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingAggregate {
    pub id: Uuid,
    pub as_of_day: NaiveDate,
    pub window_days: u32,
    #[serde(flatten)]
    pub bucket: BucketKey,
    pub doc_count: i64,
    pub avg_confidence: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Running count plus confidence mean accumulator.
///
/// Confidence samples are weighted; a missing sample contributes to the
/// count but not to the mean.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CountAccumulator {
    pub count: i64,
    weighted_sum: f64,
    weight: f64,
}

impl CountAccumulator {
    pub fn add(&mut self, count: i64, confidence: Option<f64>, weight: f64) {
        self.count += count;
        if let Some(c) = confidence {
            self.weighted_sum += c * weight;
            self.weight += weight;
        }
    }

    pub fn mean(&self) -> Option<f64> {
        if self.weight > 0.0 {
            Some(self.weighted_sum / self.weight)
        } else {
            None
        }
    }
}

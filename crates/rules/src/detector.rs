//! Robust negative-rate spike detection.
//!
//! For one segment, the target day's negative rate is compared against the
//! rates of the preceding `baseline_days` days with a median/MAD z-score:
//!
//! ```text
//! z = (rate - median) / (1.4826 * MAD)
//! ```
//!
//! A spike needs both `z >= z_threshold` and an absolute lift of at least
//! `ABSOLUTE_MARGIN` over the median. The margin keeps a flat baseline
//! (MAD ~ 0) from firing on tiny moves.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use moodwatch_core::{DailyAggregate, SegmentKey, Severity};

/// Minimum number of qualifying baseline days.
pub const MIN_BASELINE_DAYS: usize = 7;
/// Required lift of the current rate over the baseline median.
pub const ABSOLUTE_MARGIN: f64 = 0.10;
/// Rescales MAD to a standard-deviation equivalent under normality.
pub const MAD_SCALE: f64 = 1.4826;
/// Denominator floor for a degenerate (zero-spread) baseline.
pub const MAD_FLOOR: f64 = 1e-9;
/// `z >= factor * z_threshold` is high severity.
pub const HIGH_SEVERITY_FACTOR: f64 = 1.5;

/// Sentiment counted in the numerator of the negative rate.
const NEGATIVE: &str = "negative";

/// Negative and total document counts for one segment on one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayTotals {
    pub day: NaiveDate,
    pub negative: i64,
    pub total: i64,
}

impl DayTotals {
    /// `negative / total`, or 0 for an empty day.
    pub fn rate(&self) -> f64 {
        if self.total > 0 {
            self.negative as f64 / self.total as f64
        } else {
            0.0
        }
    }
}

/// Collapse daily rows into per-segment day series, sorted by day.
///
/// Totals sum the emotion-exploded `doc_count`s, so a document with two
/// labels counts twice in both numerator and denominator.
pub fn segment_series(rows: &[DailyAggregate]) -> BTreeMap<SegmentKey, Vec<DayTotals>> {
    let mut grouped: BTreeMap<SegmentKey, BTreeMap<NaiveDate, DayTotals>> = BTreeMap::new();
    for row in rows {
        let totals = grouped
            .entry(row.bucket.segment.clone())
            .or_default()
            .entry(row.day)
            .or_insert(DayTotals {
                day: row.day,
                negative: 0,
                total: 0,
            });
        totals.total += row.doc_count;
        if row.bucket.sentiment.as_deref() == Some(NEGATIVE) {
            totals.negative += row.doc_count;
        }
    }
    grouped
        .into_iter()
        .map(|(segment, days)| (segment, days.into_values().collect()))
        .collect()
}

/// Median of `xs`; the mean of the two middle values for even lengths.
pub fn median(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        return None;
    }
    let mut sorted = xs.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Median absolute deviation around `med`.
pub fn mad(xs: &[f64], med: f64) -> Option<f64> {
    let deviations: Vec<f64> = xs.iter().map(|x| (x - med).abs()).collect();
    median(&deviations)
}

/// Robust z-score of `value` against a baseline median and MAD.
pub fn robust_z(value: f64, med: f64, mad: f64) -> f64 {
    let denom = if mad > MAD_FLOOR { MAD_SCALE * mad } else { MAD_FLOOR };
    (value - med) / denom
}

/// Severity for a z-score that already passed the threshold.
pub fn severity_for(z: f64, z_threshold: f64) -> Severity {
    if z >= HIGH_SEVERITY_FACTOR * z_threshold {
        Severity::High
    } else {
        Severity::Medium
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpikeParams {
    pub baseline_days: u32,
    pub z_threshold: f64,
    pub min_docs: i64,
}

/// A triggered spike for one segment and day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spike {
    pub segment: SegmentKey,
    pub day: NaiveDate,
    pub current_rate: f64,
    pub current_negative: i64,
    pub current_total: i64,
    pub median: f64,
    pub mad: f64,
    pub z: f64,
    pub severity: Severity,
    pub baseline_samples: usize,
}

/// Why a segment produced no spike. None of these are failures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum SkipReason {
    /// No daily rows for the segment on the target day.
    NoTargetData,
    BelowMinimumVolume { total: i64 },
    InsufficientHistory { samples: usize },
    BelowThreshold { z: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    Triggered(Spike),
    Skipped(SkipReason),
}

/// Evaluate one segment's day series for `day`.
///
/// `series` may contain days outside the baseline window; they are ignored.
pub fn detect(segment: &SegmentKey, series: &[DayTotals], day: NaiveDate, params: &SpikeParams) -> Detection {
    let Some(current) = series.iter().find(|t| t.day == day) else {
        return Detection::Skipped(SkipReason::NoTargetData);
    };
    if current.total < params.min_docs {
        return Detection::Skipped(SkipReason::BelowMinimumVolume {
            total: current.total,
        });
    }

    let window_start = day.checked_sub_days(chrono::Days::new(u64::from(params.baseline_days)));
    let baseline: Vec<f64> = series
        .iter()
        .filter(|t| t.day < day && window_start.map_or(true, |start| t.day >= start))
        .filter(|t| t.total >= params.min_docs)
        .map(DayTotals::rate)
        .collect();
    if baseline.len() < MIN_BASELINE_DAYS {
        return Detection::Skipped(SkipReason::InsufficientHistory {
            samples: baseline.len(),
        });
    }

    let rate = current.rate();
    let Some(med) = median(&baseline) else {
        return Detection::Skipped(SkipReason::InsufficientHistory { samples: 0 });
    };
    let spread = mad(&baseline, med).unwrap_or(0.0);
    let z = robust_z(rate, med, spread);

    if z < params.z_threshold || rate < med + ABSOLUTE_MARGIN {
        return Detection::Skipped(SkipReason::BelowThreshold { z });
    }

    Detection::Triggered(Spike {
        segment: segment.clone(),
        day,
        current_rate: rate,
        current_negative: current.negative,
        current_total: current.total,
        median: med,
        mad: spread,
        z,
        severity: severity_for(z, params.z_threshold),
        baseline_samples: baseline.len(),
    })
}

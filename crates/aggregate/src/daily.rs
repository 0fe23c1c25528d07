use std::collections::BTreeMap;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use moodwatch_core::day::{day_bounds, resolve_day};
use moodwatch_core::{BucketKey, CountAccumulator, DailyAggregate, DocumentInference};
use moodwatch_store::Store;

use crate::error::Result;

/// Result of one daily aggregation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub ok: bool,
    pub day: NaiveDate,
    pub rows: usize,
}

/// Group inference records for `day` into daily aggregate rows.
///
/// Every record counts once per distinct emotion label; records without
/// labels count once in the no-emotion bucket. Records whose event day is
/// not `day` are ignored. Rows come out ordered by bucket key.
pub fn daily_rows(day: NaiveDate, records: &[DocumentInference]) -> Vec<DailyAggregate> {
    let mut buckets: BTreeMap<BucketKey, CountAccumulator> = BTreeMap::new();

    for rec in records {
        if rec.document.event_day() != day {
            continue;
        }
        let confidence = rec.inference.calibrated_confidence;
        let mut emotions: Vec<Option<String>> = rec
            .inference
            .distinct_emotions()
            .into_iter()
            .map(|e| Some(e.to_string()))
            .collect();
        if emotions.is_empty() {
            emotions.push(None);
        }

        for emotion in emotions {
            let key = BucketKey {
                segment: rec.document.segment.clone(),
                sentiment: rec.inference.sentiment.clone(),
                emotion,
            };
            buckets.entry(key).or_default().add(1, confidence, 1.0);
        }
    }

    let now = Utc::now();
    buckets
        .into_iter()
        .map(|(bucket, acc)| DailyAggregate {
            id: Uuid::new_v4(),
            day,
            bucket,
            doc_count: acc.count,
            avg_confidence: acc.mean(),
            created_at: now,
        })
        .collect()
}

/// Recompute daily aggregates for `day` (`YYYY-MM-DD`, default yesterday UTC).
///
/// A malformed day is rejected before a transaction is opened.
pub async fn compute_daily(store: &dyn Store, day: Option<&str>) -> Result<DailySummary> {
    let day = resolve_day(day)?;
    compute_daily_for(store, day).await
}

/// Replace every daily aggregate row for `day` in one transaction.
pub async fn compute_daily_for(store: &dyn Store, day: NaiveDate) -> Result<DailySummary> {
    let (start, end) = day_bounds(day);

    let mut tx = store.begin().await?;
    let records = tx.inferences_between(start, end).await?;
    debug!(%day, records = records.len(), "loaded inference records");

    let rows = daily_rows(day, &records);
    let deleted = tx.delete_daily(day).await?;
    tx.insert_daily(&rows).await?;
    tx.commit().await?;

    info!(%day, rows = rows.len(), replaced = deleted, "daily aggregation complete");
    Ok(DailySummary {
        ok: true,
        day,
        rows: rows.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use moodwatch_core::{Dimension, Document, Inference, SegmentKey};

    fn record(
        segment: SegmentKey,
        sentiment: &str,
        labels: Option<Vec<&str>>,
        confidence: Option<f64>,
        hour: u32,
    ) -> DocumentInference {
        let doc_id = Uuid::new_v4();
        let ts = Utc.with_ymd_and_hms(2024, 5, 2, hour, 0, 0).unwrap();
        DocumentInference {
            document: Document {
                id: doc_id,
                segment,
                text_redacted: String::new(),
                timestamp: Some(ts),
                created_at: ts,
            },
            inference: Inference {
                id: Uuid::new_v4(),
                document_id: doc_id,
                sentiment: Some(sentiment.to_string()),
                emotion_labels: labels.map(|l| l.into_iter().map(String::from).collect()),
                calibrated_confidence: confidence,
                created_at: ts,
            },
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 2).unwrap()
    }

    fn find<'a>(rows: &'a [DailyAggregate], sentiment: &str, emotion: Option<&str>) -> Option<&'a DailyAggregate> {
        rows.iter().find(|r| {
            r.bucket.sentiment.as_deref() == Some(sentiment) && r.bucket.emotion.as_deref() == emotion
        })
    }

    #[test]
    fn labels_explode_into_one_bucket_each() {
        let seg = SegmentKey::new("acme", Dimension::Unset, Dimension::Unset, Dimension::Unset);
        let rows = daily_rows(
            day(),
            &[record(seg, "negative", Some(vec!["sadness", "fatigue", "sadness"]), Some(0.8), 9)],
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(find(&rows, "negative", Some("sadness")).unwrap().doc_count, 1);
        assert_eq!(find(&rows, "negative", Some("fatigue")).unwrap().doc_count, 1);
    }

    #[test]
    fn repeated_label_counts_once_per_document() {
        let seg = SegmentKey::default();
        let rows = daily_rows(
            day(),
            &[
                record(seg.clone(), "negative", Some(vec!["fear", "fear"]), Some(0.6), 1),
                record(seg, "negative", Some(vec!["fear"]), Some(0.2), 2),
            ],
        );
        assert_eq!(rows.len(), 1);
        let fear = find(&rows, "negative", Some("fear")).unwrap();
        assert_eq!(fear.doc_count, 2);
        assert!((fear.avg_confidence.unwrap() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn unlabelled_records_land_in_no_emotion_bucket() {
        let seg = SegmentKey::default();
        let rows = daily_rows(
            day(),
            &[
                record(seg.clone(), "neutral", None, None, 1),
                record(seg, "neutral", Some(vec![]), Some(0.4), 2),
            ],
        );
        assert_eq!(rows.len(), 1);
        let row = find(&rows, "neutral", None).unwrap();
        assert_eq!(row.doc_count, 2);
        assert_eq!(row.avg_confidence, Some(0.4));
    }

    #[test]
    fn unset_and_concrete_segments_stay_apart() {
        let unset = SegmentKey::default();
        let concrete = SegmentKey::new("", Dimension::Unset, Dimension::Unset, Dimension::Unset);
        let rows = daily_rows(
            day(),
            &[
                record(unset, "negative", None, Some(0.5), 3),
                record(concrete, "negative", None, Some(0.5), 4),
            ],
        );
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn records_outside_the_day_are_ignored() {
        let mut rec = record(SegmentKey::default(), "negative", None, None, 5);
        rec.document.timestamp = Some(Utc.with_ymd_and_hms(2024, 5, 3, 0, 0, 0).unwrap());
        assert!(daily_rows(day(), &[rec]).is_empty());
    }
}

use std::collections::BTreeMap;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use moodwatch_core::day::resolve_day;
use moodwatch_core::{AggregateWindow, BucketKey, CountAccumulator, DailyAggregate, RollingAggregate};
use moodwatch_store::Store;

use crate::error::{AggregateError, Result};

/// Window sizes used when the caller passes none.
pub const DEFAULT_WINDOWS: [u32; 3] = [7, 30, 90];

/// Result of one rolling aggregation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingSummary {
    pub ok: bool,
    pub as_of_day: NaiveDate,
    pub windows: Vec<u32>,
    pub rows: usize,
}

/// Merge the daily rows that fall inside `window` into rolling rows.
///
/// Counts are summed. The confidence mean is weighted by each day's
/// `doc_count`; days without a confidence mean add to the count only.
/// Days with no row contribute nothing.
pub fn rolling_rows(window: AggregateWindow, daily: &[DailyAggregate]) -> Vec<RollingAggregate> {
    let mut buckets: BTreeMap<&BucketKey, CountAccumulator> = BTreeMap::new();
    for row in daily.iter().filter(|r| window.contains(r.day)) {
        buckets
            .entry(&row.bucket)
            .or_default()
            .add(row.doc_count, row.avg_confidence, row.doc_count as f64);
    }

    let now = Utc::now();
    buckets
        .into_iter()
        .map(|(bucket, acc)| RollingAggregate {
            id: Uuid::new_v4(),
            as_of_day: window.as_of_day,
            window_days: window.window_days,
            bucket: bucket.clone(),
            doc_count: acc.count,
            avg_confidence: acc.mean(),
            created_at: now,
        })
        .collect()
}

/// Validate and dedupe the requested windows, keeping first-seen order.
fn normalize_windows(windows: Option<&[u32]>) -> Result<Vec<u32>> {
    let requested = match windows {
        Some(w) if !w.is_empty() => w,
        _ => &DEFAULT_WINDOWS[..],
    };
    let mut out = Vec::with_capacity(requested.len());
    for &w in requested {
        if w == 0 {
            return Err(AggregateError::InvalidWindow(w));
        }
        if !out.contains(&w) {
            out.push(w);
        }
    }
    Ok(out)
}

/// Recompute rolling aggregates ending at `as_of_day` (default yesterday UTC).
pub async fn compute_rolling(
    store: &dyn Store,
    as_of_day: Option<&str>,
    windows: Option<&[u32]>,
) -> Result<RollingSummary> {
    let as_of_day = resolve_day(as_of_day)?;
    compute_rolling_for(store, as_of_day, windows).await
}

/// Replace rolling rows for every `(as_of_day, window)` in one transaction.
pub async fn compute_rolling_for(
    store: &dyn Store,
    as_of_day: NaiveDate,
    windows: Option<&[u32]>,
) -> Result<RollingSummary> {
    let windows = normalize_windows(windows)?;
    let ranges = windows
        .iter()
        .map(|&w| {
            let window = AggregateWindow::new(as_of_day, w);
            window
                .start_day()
                .map(|start| (window, start))
                .ok_or(AggregateError::InvalidWindow(w))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut tx = store.begin().await?;
    let mut total = 0;
    for (window, start) in ranges {
        let daily = tx.daily_between(start, as_of_day).await?;
        let rows = rolling_rows(window, &daily);
        tx.delete_rolling(window).await?;
        tx.insert_rolling(&rows).await?;
        debug!(%as_of_day, window_days = window.window_days, rows = rows.len(), "window aggregated");
        total += rows.len();
    }
    tx.commit().await?;

    info!(%as_of_day, windows = ?windows, rows = total, "rolling aggregation complete");
    Ok(RollingSummary {
        ok: true,
        as_of_day,
        windows,
        rows: total,
    })
}

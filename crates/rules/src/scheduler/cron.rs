//! Cron parsing and due checks for the batch jobs.

use chrono::{DateTime, Utc};
use cron::Schedule;

/// Turn a job's configured schedule into the form the `cron` crate parses.
///
/// `DAILY_CRON` and friends are written as `min hour dom month dow`; the
/// parser wants a leading seconds field, which is pinned to `0`. Anything
/// that is not five fields is passed through (trimmed) and left to the
/// parser to accept or reject.
pub(crate) fn normalize_cron(expr: &str) -> String {
    let expr = expr.trim();
    match expr.split_whitespace().count() {
        5 => format!("0 {expr}"),
        _ => expr.to_string(),
    }
}

/// Whether a job on `schedule` owes a run at `now`.
///
/// A run is owed when a tick lies in `(last_run, now]`. A job that has never
/// run in this process looks back one day, so a worker started after 00:40
/// still runs the day's batch.
pub(crate) fn is_cron_due(
    schedule: &Schedule,
    now: DateTime<Utc>,
    last_run: Option<DateTime<Utc>>,
) -> bool {
    let since = last_run.unwrap_or(now - chrono::Duration::days(1));
    schedule.after(&since).next().is_some_and(|tick| tick <= now)
}

//! UTC calendar-day helpers shared by every batch job.
//!
//! Jobs accept an optional `YYYY-MM-DD` argument; when omitted they run for
//! "yesterday" in UTC. Parsing happens before any transaction is opened so a
//! malformed day never reaches the store.

use chrono::{DateTime, Days, NaiveDate, Utc};

use crate::error::CoreError;

/// Parse a strict `YYYY-MM-DD` day string.
pub fn parse_day(input: &str) -> Result<NaiveDate, CoreError> {
    NaiveDate::parse_from_str(input, "%Y-%m-%d").map_err(|source| CoreError::InvalidDay {
        input: input.to_string(),
        source,
    })
}

/// The UTC day before `now`.
pub fn yesterday_of(now: DateTime<Utc>) -> NaiveDate {
    now.date_naive() - Days::new(1)
}

/// The UTC day before the current instant.
pub fn yesterday_utc() -> NaiveDate {
    yesterday_of(Utc::now())
}

/// Resolve an optional day argument, defaulting to yesterday (UTC).
pub fn resolve_day(input: Option<&str>) -> Result<NaiveDate, CoreError> {
    match input {
        Some(s) => parse_day(s),
        None => Ok(yesterday_utc()),
    }
}

/// Half-open UTC interval `[day 00:00, day+1 00:00)`.
pub fn day_bounds(day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = day.and_time(chrono::NaiveTime::MIN).and_utc();
    (start, start + chrono::Duration::days(1))
}

/// `day - n` days, failing instead of panicking at the calendar edge.
pub fn days_before(day: NaiveDate, n: u32) -> Result<NaiveDate, CoreError> {
    day.checked_sub_days(Days::new(u64::from(n)))
        .ok_or_else(|| CoreError::DayOutOfRange(format!("{day} - {n} days")))
}

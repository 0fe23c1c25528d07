//! Batch aggregation jobs.
//!
//! - [`compute_daily`]: raw (document, inference) pairs for one UTC day into
//!   per-segment, per-sentiment, per-emotion counts.
//! - [`compute_rolling`]: trailing multi-day windows over the daily rows.
//!
//! Both jobs replace the rows for their key inside a single transaction.

pub mod daily;
pub mod error;
pub mod rolling;

pub use daily::{compute_daily, compute_daily_for, daily_rows, DailySummary};
pub use error::{AggregateError, Result};
pub use rolling::{compute_rolling, compute_rolling_for, rolling_rows, RollingSummary, DEFAULT_WINDOWS};

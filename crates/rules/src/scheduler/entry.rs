//! Per-job schedule entry types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The batch jobs, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Daily,
    Rolling,
    Detect,
    Rules,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [JobKind::Daily, JobKind::Rolling, JobKind::Detect, JobKind::Rules];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Daily => "daily",
            JobKind::Rolling => "rolling",
            JobKind::Detect => "detect",
            JobKind::Rules => "rules",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling state for a single job.
#[derive(Debug, Clone)]
pub struct JobScheduleEntry {
    pub job: JobKind,
    /// Normalized 6-field cron expression (seconds prepended).
    pub cron_expression: String,
    /// Timestamp of the last dispatch.
    pub last_triggered: Option<DateTime<Utc>>,
    pub enabled: bool,
}

//! [`JobScheduler`]: scheduling state for the batch jobs.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tracing::warn;

use moodwatch_core::config::ScheduleConfig;

use super::cron::{is_cron_due, normalize_cron};
use super::entry::{JobKind, JobScheduleEntry};

/// Tracks cron expressions and last dispatch times for each job.
///
/// Use [`due_jobs`](JobScheduler::due_jobs) from the tick loop and
/// [`record_trigger_at`](JobScheduler::record_trigger_at) after dispatching.
pub struct JobScheduler {
    entries: BTreeMap<JobKind, JobScheduleEntry>,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Build a scheduler with all four jobs enabled.
    pub fn from_config(config: &ScheduleConfig) -> Self {
        let mut scheduler = Self::new();
        scheduler.set(JobKind::Daily, &config.daily_cron);
        scheduler.set(JobKind::Rolling, &config.rolling_cron);
        scheduler.set(JobKind::Detect, &config.detect_cron);
        scheduler.set(JobKind::Rules, &config.rules_cron);
        scheduler
    }

    /// Add or replace a job's cron expression, keeping `last_triggered`.
    pub fn set(&mut self, job: JobKind, cron: &str) {
        let cron_expression = normalize_cron(cron);
        match self.entries.get_mut(&job) {
            Some(entry) => entry.cron_expression = cron_expression,
            None => {
                self.entries.insert(
                    job,
                    JobScheduleEntry {
                        job,
                        cron_expression,
                        last_triggered: None,
                        enabled: true,
                    },
                );
            }
        }
    }

    pub fn set_enabled(&mut self, job: JobKind, enabled: bool) {
        if let Some(entry) = self.entries.get_mut(&job) {
            entry.enabled = enabled;
        }
    }

    /// Whether `job` should run at `now`.
    ///
    /// `false` for unknown or disabled jobs and for invalid cron expressions.
    pub fn should_run(&self, job: JobKind, now: DateTime<Utc>) -> bool {
        let Some(entry) = self.entries.get(&job) else {
            return false;
        };
        if !entry.enabled {
            return false;
        }
        match Schedule::from_str(&entry.cron_expression) {
            Ok(schedule) => is_cron_due(&schedule, now, entry.last_triggered),
            Err(e) => {
                warn!(
                    job = %job,
                    cron = %entry.cron_expression,
                    error = %e,
                    "invalid cron expression"
                );
                false
            }
        }
    }

    /// Jobs due at `now`, in dependency order.
    pub fn due_jobs(&self, now: DateTime<Utc>) -> Vec<JobKind> {
        self.entries
            .keys()
            .copied()
            .filter(|job| self.should_run(*job, now))
            .collect()
    }

    pub fn record_trigger_at(&mut self, job: JobKind, at: DateTime<Utc>) {
        if let Some(entry) = self.entries.get_mut(&job) {
            entry.last_triggered = Some(at);
        }
    }

    pub fn get(&self, job: JobKind) -> Option<&JobScheduleEntry> {
        self.entries.get(&job)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

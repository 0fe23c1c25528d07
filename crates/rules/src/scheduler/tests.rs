//! Tests for the scheduler module.

use std::str::FromStr;

use chrono::{TimeZone, Utc};
use cron::Schedule;

use moodwatch_core::config::ScheduleConfig;

use crate::scheduler::cron::{is_cron_due, normalize_cron};
use crate::scheduler::{JobKind, JobScheduler};

// -- normalize_cron ----------------------------------------------------

#[test]
fn normalize_cron_5_to_6_fields() {
    assert_eq!(normalize_cron("10 0 * * *"), "0 10 0 * * *");
    assert_eq!(normalize_cron("*/15 * * * *"), "0 */15 * * * *");
}

#[test]
fn normalize_cron_already_6_fields() {
    assert_eq!(normalize_cron("0 40 0 * * *"), "0 40 0 * * *");
}

#[test]
fn normalize_cron_trims_whitespace() {
    assert_eq!(normalize_cron("  20 0 * * *  "), "0 20 0 * * *");
}

// -- is_cron_due -------------------------------------------------------

#[test]
fn due_after_tick_without_previous_run() {
    let schedule = Schedule::from_str("0 10 0 * * *").unwrap();
    let now = Utc.with_ymd_and_hms(2024, 5, 2, 0, 11, 0).unwrap();
    assert!(is_cron_due(&schedule, now, None));
}

#[test]
fn not_due_again_after_recorded_run() {
    let schedule = Schedule::from_str("0 10 0 * * *").unwrap();
    let ran = Utc.with_ymd_and_hms(2024, 5, 2, 0, 10, 5).unwrap();
    let now = Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap();
    assert!(!is_cron_due(&schedule, now, Some(ran)));

    let next_day = Utc.with_ymd_and_hms(2024, 5, 3, 0, 10, 0).unwrap();
    assert!(is_cron_due(&schedule, next_day, Some(ran)));
}

// -- JobScheduler ------------------------------------------------------

#[test]
fn default_schedule_staggers_jobs() {
    let mut s = JobScheduler::from_config(&ScheduleConfig::default());
    assert_eq!(s.len(), 4);

    // Mark everything as having run the previous day after its tick.
    let yesterday = Utc.with_ymd_and_hms(2024, 5, 1, 1, 0, 0).unwrap();
    for job in JobKind::ALL {
        s.record_trigger_at(job, yesterday);
    }

    let at = |h, m| Utc.with_ymd_and_hms(2024, 5, 2, h, m, 0).unwrap();
    assert!(s.due_jobs(at(0, 5)).is_empty());
    assert_eq!(s.due_jobs(at(0, 15)), vec![JobKind::Daily]);
    assert_eq!(s.due_jobs(at(0, 25)), vec![JobKind::Daily, JobKind::Rolling]);
    assert_eq!(s.due_jobs(at(0, 45)), JobKind::ALL.to_vec());
}

#[test]
fn due_jobs_come_in_dependency_order() {
    let mut s = JobScheduler::new();
    s.set(JobKind::Rules, "* * * * *");
    s.set(JobKind::Daily, "* * * * *");
    s.set(JobKind::Detect, "* * * * *");
    let now = Utc.with_ymd_and_hms(2024, 5, 2, 3, 0, 30).unwrap();
    assert_eq!(s.due_jobs(now), vec![JobKind::Daily, JobKind::Detect, JobKind::Rules]);
}

#[test]
fn disabled_unknown_and_invalid_jobs_never_run() {
    let mut s = JobScheduler::new();
    let now = Utc.with_ymd_and_hms(2024, 5, 2, 3, 0, 30).unwrap();
    assert!(!s.should_run(JobKind::Daily, now));

    s.set(JobKind::Daily, "* * * * *");
    s.set_enabled(JobKind::Daily, false);
    assert!(!s.should_run(JobKind::Daily, now));

    s.set(JobKind::Rolling, "not a cron");
    assert!(!s.should_run(JobKind::Rolling, now));
}

#[test]
fn set_preserves_last_triggered() {
    let mut s = JobScheduler::new();
    let at = Utc.with_ymd_and_hms(2024, 5, 2, 0, 10, 0).unwrap();
    s.set(JobKind::Daily, "10 0 * * *");
    s.record_trigger_at(JobKind::Daily, at);
    s.set(JobKind::Daily, "15 0 * * *");
    let entry = s.get(JobKind::Daily).unwrap();
    assert_eq!(entry.cron_expression, "0 15 0 * * *");
    assert_eq!(entry.last_triggered, Some(at));
}

#[test]
fn never_run_job_only_looks_back_one_day() {
    // Monthly on the 1st; two days later there is nothing left to catch up.
    let schedule = Schedule::from_str("0 0 0 1 * *").unwrap();
    let now = Utc.with_ymd_and_hms(2024, 5, 3, 0, 0, 0).unwrap();
    assert!(!is_cron_due(&schedule, now, None));

    let just_after = Utc.with_ymd_and_hms(2024, 5, 1, 6, 0, 0).unwrap();
    assert!(is_cron_due(&schedule, just_after, None));
}

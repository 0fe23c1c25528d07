//! Rule engine and spike report jobs.
//!
//! [`run_rules`] regenerates every `risk_spike` alert for one day:
//!
//! 1. An audit "run started" row is committed on its own.
//! 2. In the main transaction, existing `(day, risk_spike)` alerts are
//!    removed, evidence first.
//! 3. Each enabled rule is evaluated against every segment seen in its
//!    baseline window. A triggered segment gets an alert, an audit row and
//!    its ranked evidence inside a savepoint, so a failure there undoes only
//!    that pair.
//! 4. A "run completed" audit row with the totals is written and the
//!    transaction commits.
//!
//! [`detect_spikes`] runs the same detector with job-level parameters and
//! reports the spikes without writing anything.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use moodwatch_core::day::{day_bounds, days_before, resolve_day};
use moodwatch_core::{Alert, BaselineSnapshot, CoreError, RISK_SPIKE};
use moodwatch_store::{Store, StoreError, StoreTx};

use crate::audit::{AuditRecorder, RunTotals};
use crate::definition::{RiskSpikeRule, RuleDefinition, SpikeDefaults};
use crate::detector::{detect, segment_series, Detection, Spike, SpikeParams};
use crate::evidence::{select_evidence, KeywordMatcher};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    InvalidDay(#[from] CoreError),

    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Result of one [`run_rules`] invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub ok: bool,
    pub day: NaiveDate,
    #[serde(flatten)]
    pub totals: RunTotals,
}

/// Result of one [`detect_spikes`] invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeReport {
    pub ok: bool,
    pub day: NaiveDate,
    pub spikes: Vec<Spike>,
}

/// Evaluate all enabled rules for `day` (`YYYY-MM-DD`, default yesterday UTC).
pub async fn run_rules(
    store: &dyn Store,
    day: Option<&str>,
    defaults: &SpikeDefaults,
) -> Result<RunSummary> {
    let day = resolve_day(day)?;
    run_rules_for(store, day, defaults).await
}

pub async fn run_rules_for(
    store: &dyn Store,
    day: NaiveDate,
    defaults: &SpikeDefaults,
) -> Result<RunSummary> {
    let run_id = Uuid::new_v4();
    let audit = AuditRecorder::system();
    info!(%day, %run_id, "rule engine run started");

    let mut tx = store.begin().await?;
    audit.run_started(tx.as_mut(), run_id, day).await?;
    tx.commit().await?;

    let mut tx = store.begin().await?;
    let stale = tx.alert_ids(day, RISK_SPIKE).await?;
    if !stale.is_empty() {
        let evidence = tx.delete_evidence_for(&stale).await?;
        let alerts = tx.delete_alerts(&stale).await?;
        debug!(%day, alerts, evidence, "cleared previous alerts");
    }

    let mut totals = RunTotals::default();
    for rule in tx.enabled_rules().await? {
        match RuleDefinition::rule_type(&rule.definition) {
            Some(RISK_SPIKE) => {}
            other => {
                debug!(rule = %rule.name, rule_type = ?other, "skipping rule with unsupported type");
                continue;
            }
        }

        let resolved = match RiskSpikeRule::resolve(&rule, defaults) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(rule = %rule.name, error = %e, "rule skipped");
                totals.failures += 1;
                continue;
            }
        };
        let start = match days_before(day, resolved.baseline_days) {
            Ok(start) => start,
            Err(e) => {
                warn!(rule = %rule.name, error = %e, "rule skipped");
                totals.failures += 1;
                continue;
            }
        };
        totals.rules_evaluated += 1;

        let params = SpikeParams {
            baseline_days: resolved.baseline_days,
            z_threshold: resolved.z_threshold,
            min_docs: resolved.min_docs,
        };
        let matcher = KeywordMatcher::new(&resolved.keywords);
        let rows = tx.daily_between(start, day).await?;

        for (segment, series) in segment_series(&rows) {
            let spike = match detect(&segment, &series, day, &params) {
                Detection::Triggered(spike) => spike,
                Detection::Skipped(reason) => {
                    debug!(rule = %resolved.rule_name, %segment, ?reason, "no spike");
                    continue;
                }
            };

            tx.savepoint().await?;
            match materialize(tx.as_mut(), &audit, &resolved, &matcher, &spike).await {
                Ok(evidence) => {
                    tx.release_savepoint().await?;
                    totals.alerts += 1;
                    totals.evidence += evidence;
                    info!(
                        rule = %resolved.rule_name,
                        %segment,
                        severity = %spike.severity,
                        z = spike.z,
                        evidence,
                        "alert created"
                    );
                }
                Err(e) => {
                    tx.rollback_to_savepoint().await?;
                    totals.failures += 1;
                    warn!(rule = %resolved.rule_name, %segment, error = %e, "segment evaluation failed");
                }
            }
        }
    }

    audit.run_completed(tx.as_mut(), run_id, day, &totals).await?;
    tx.commit().await?;

    info!(
        %day,
        %run_id,
        alerts = totals.alerts,
        evidence = totals.evidence,
        failures = totals.failures,
        rules = totals.rules_evaluated,
        "rule engine run completed"
    );
    Ok(RunSummary {
        ok: true,
        day,
        totals,
    })
}

/// Persist one alert with its audit row and ranked evidence.
async fn materialize(
    tx: &mut dyn StoreTx,
    audit: &AuditRecorder,
    rule: &RiskSpikeRule,
    matcher: &KeywordMatcher,
    spike: &Spike,
) -> std::result::Result<usize, StoreError> {
    let alert = build_alert(rule, spike, Utc::now());
    tx.insert_alert(&alert).await?;
    audit.alert_created(tx, &alert).await?;

    let (start, end) = day_bounds(spike.day);
    let candidates = tx.latest_inferences_for_segment(&spike.segment, start, end).await?;
    let evidence = select_evidence(alert.id, &candidates, matcher, rule.top_k_evidence, alert.created_at);
    tx.insert_evidence(&evidence).await?;
    Ok(evidence.len())
}

pub fn alert_message(rule_name: &str, spike: &Spike) -> String {
    format!(
        "[{}] risk spike: negative_rate={:.2} vs median={:.2} (z={:.2})",
        rule_name, spike.current_rate, spike.median, spike.z
    )
}

pub fn build_alert(rule: &RiskSpikeRule, spike: &Spike, now: DateTime<Utc>) -> Alert {
    Alert {
        id: Uuid::new_v4(),
        created_at: now,
        day: spike.day,
        alert_type: RISK_SPIKE.to_string(),
        severity: spike.severity,
        segment: spike.segment.clone(),
        metric: rule.metric.clone(),
        value: spike.current_rate,
        baseline: BaselineSnapshot {
            rule_id: Some(rule.rule_id),
            rule_name: Some(rule.rule_name.clone()),
            median: spike.median,
            mad: spike.mad,
            z: spike.z,
            baseline_days: rule.baseline_days,
            baseline_samples: spike.baseline_samples,
            min_docs: rule.min_docs,
            z_threshold: rule.z_threshold,
        },
        message: alert_message(&rule.rule_name, spike),
    }
}

/// Report spikes for `day` across all segments without persisting them.
pub async fn detect_spikes(
    store: &dyn Store,
    day: Option<&str>,
    params: &SpikeParams,
) -> Result<SpikeReport> {
    let day = resolve_day(day)?;
    let start = days_before(day, params.baseline_days)?;

    // Read-only: the transaction is dropped, never committed.
    let mut tx = store.begin().await?;
    let rows = tx.daily_between(start, day).await?;
    drop(tx);

    let mut spikes = Vec::new();
    for (segment, series) in segment_series(&rows) {
        match detect(&segment, &series, day, params) {
            Detection::Triggered(spike) => spikes.push(spike),
            Detection::Skipped(reason) => debug!(%segment, ?reason, "no spike"),
        }
    }

    info!(%day, spikes = spikes.len(), "spike detection complete");
    Ok(SpikeReport {
        ok: true,
        day,
        spikes,
    })
}

//! Append-only audit trail for rule engine runs.
//!
//! Entries are written through the caller's open transaction, so an audit
//! row commits or rolls back together with the work it describes.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use moodwatch_core::{Alert, AuditEntry};
use moodwatch_store::{Result, StoreTx};

/// Actor recorded for scheduler-driven jobs.
pub const SYSTEM_ACTOR: &str = "system";

pub const ENTITY_RUN: &str = "rule_engine_run";
pub const ENTITY_ALERT: &str = "alert";

/// Audited lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    RuleEngineRunStarted,
    AlertCreated,
    RuleEngineRunCompleted,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::RuleEngineRunStarted => "rule_engine_run_started",
            AuditAction::AlertCreated => "alert_created",
            AuditAction::RuleEngineRunCompleted => "rule_engine_run_completed",
        }
    }
}

/// Counters reported when a run completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    pub alerts: usize,
    pub evidence: usize,
    /// Rules or (rule, segment) pairs that failed and were skipped.
    pub failures: usize,
    pub rules_evaluated: usize,
}

/// Builds and appends [`AuditEntry`] rows for one actor.
#[derive(Debug, Clone)]
pub struct AuditRecorder {
    actor: String,
}

impl AuditRecorder {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
        }
    }

    pub fn system() -> Self {
        Self::new(SYSTEM_ACTOR)
    }

    pub fn entry(
        &self,
        action: AuditAction,
        entity_type: &str,
        entity_id: impl ToString,
        metadata: serde_json::Value,
    ) -> AuditEntry {
        AuditEntry {
            id: Uuid::new_v4(),
            actor: self.actor.clone(),
            action: action.as_str().to_string(),
            entity_type: Some(entity_type.to_string()),
            entity_id: Some(entity_id.to_string()),
            metadata,
            created_at: Utc::now(),
        }
    }

    pub async fn run_started(&self, tx: &mut dyn StoreTx, run_id: Uuid, day: NaiveDate) -> Result<()> {
        let entry = self.entry(
            AuditAction::RuleEngineRunStarted,
            ENTITY_RUN,
            run_id,
            json!({ "day": day }),
        );
        tx.append_audit(&entry).await
    }

    pub async fn alert_created(&self, tx: &mut dyn StoreTx, alert: &Alert) -> Result<()> {
        let segment = &alert.segment;
        let entry = self.entry(
            AuditAction::AlertCreated,
            ENTITY_ALERT,
            alert.id,
            json!({
                "day": alert.day,
                "alert_type": alert.alert_type,
                "severity": alert.severity,
                "org_id": segment.org.as_deref(),
                "team_id": segment.team.as_deref(),
                "channel": segment.channel.as_deref(),
                "source": segment.source.as_deref(),
                "metric": alert.metric,
                "value": alert.value,
                "baseline": alert.baseline,
            }),
        );
        tx.append_audit(&entry).await
    }

    pub async fn run_completed(
        &self,
        tx: &mut dyn StoreTx,
        run_id: Uuid,
        day: NaiveDate,
        totals: &RunTotals,
    ) -> Result<()> {
        let entry = self.entry(
            AuditAction::RuleEngineRunCompleted,
            ENTITY_RUN,
            run_id,
            json!({
                "day": day,
                "alerts": totals.alerts,
                "evidence": totals.evidence,
                "failures": totals.failures,
                "rules_evaluated": totals.rules_evaluated,
            }),
        );
        tx.append_audit(&entry).await
    }
}

impl Default for AuditRecorder {
    fn default() -> Self {
        Self::system()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_names_are_snake_case() {
        assert_eq!(AuditAction::RuleEngineRunStarted.as_str(), "rule_engine_run_started");
        assert_eq!(
            serde_json::to_value(AuditAction::AlertCreated).unwrap(),
            json!("alert_created")
        );
    }

    #[test]
    fn entry_carries_actor_and_entity() {
        let run_id = Uuid::new_v4();
        let e = AuditRecorder::system().entry(
            AuditAction::RuleEngineRunCompleted,
            ENTITY_RUN,
            run_id,
            json!({"alerts": 2}),
        );
        assert_eq!(e.actor, "system");
        assert_eq!(e.action, "rule_engine_run_completed");
        assert_eq!(e.entity_type.as_deref(), Some("rule_engine_run"));
        assert_eq!(e.entity_id, Some(run_id.to_string()));
        assert_eq!(e.metadata["alerts"], 2);
    }
}

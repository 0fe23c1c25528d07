//! Rule engine and spike report jobs against the in-memory store.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;

use moodwatch_aggregate::compute_daily;
use moodwatch_core::{
    AggregateWindow, Alert, AlertRule, AuditEntry, DailyAggregate, Dimension, Document,
    DocumentInference, Evidence, Inference, RollingAggregate, SegmentKey, Severity, RISK_SPIKE,
};
use moodwatch_rules::{
    detect_spikes, run_rules, EngineError, SpikeDefaults, SpikeParams,
};
use moodwatch_store::{MemoryStore, Result as StoreResult, Store, StoreError, StoreTx};

const TARGET: &str = "2024-06-11";

fn target_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 11).unwrap()
}

fn acme() -> SegmentKey {
    SegmentKey::new("acme", "support", "email", Dimension::Unset)
}

fn globex() -> SegmentKey {
    SegmentKey::new("globex", "support", "email", Dimension::Unset)
}

fn poison() -> SegmentKey {
    SegmentKey::new("poison", "support", "email", Dimension::Unset)
}

fn at(day: u32, minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, day, 0, 0, 0).unwrap() + Duration::minutes(minute)
}

async fn add_doc(
    store: &MemoryStore,
    segment: SegmentKey,
    ts: DateTime<Utc>,
    text: &str,
    sentiment: &str,
    labels: &[&str],
    confidence: Option<f64>,
) -> Uuid {
    let doc = Document {
        id: Uuid::new_v4(),
        segment,
        text_redacted: text.to_string(),
        timestamp: Some(ts),
        created_at: ts,
    };
    let id = doc.id;
    store.add_document(doc).await;
    store
        .add_inference(Inference {
            id: Uuid::new_v4(),
            document_id: id,
            sentiment: Some(sentiment.to_string()),
            emotion_labels: Some(labels.iter().map(|s| s.to_string()).collect()),
            calibrated_confidence: confidence,
            created_at: ts,
        })
        .await
        .unwrap();
    id
}

/// `total` documents on `day`, the first `negative` of them negative.
async fn seed_day(store: &MemoryStore, segment: SegmentKey, day: u32, total: i64, negative: i64) {
    for i in 0..total {
        if i < negative {
            add_doc(store, segment.clone(), at(day, i), "I want a refund now", "negative", &[], Some(0.8)).await;
        } else {
            add_doc(store, segment.clone(), at(day, i), "thanks for the help", "neutral", &[], Some(0.8)).await;
        }
    }
}

/// Ten flat baseline days at 10% negative, then the target day.
async fn seed_segment(store: &MemoryStore, segment: SegmentKey, target_negative: i64) {
    for day in 1..=10 {
        seed_day(store, segment.clone(), day, 20, 2).await;
    }
    seed_day(store, segment, 11, 20, target_negative).await;
}

async fn aggregate_days(store: &MemoryStore, days: std::ops::RangeInclusive<u32>) {
    for day in days {
        let arg = format!("2024-06-{day:02}");
        compute_daily(store, Some(arg.as_str())).await.unwrap();
    }
}

async fn put_rule(store: &MemoryStore, name: &str, definition: serde_json::Value) -> Uuid {
    let id = Uuid::new_v4();
    store
        .put_rule(AlertRule {
            id,
            name: name.to_string(),
            enabled: true,
            definition,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    id
}

/// A spiking `acme` segment, a flat `globex` segment and one refund rule.
async fn fixture() -> MemoryStore {
    let store = MemoryStore::new();
    seed_segment(&store, acme(), 12).await;
    seed_segment(&store, globex(), 2).await;
    aggregate_days(&store, 1..=11).await;
    put_rule(&store, "refunds", json!({"type": "risk_spike", "keywords": ["refund"]})).await;
    store
}

/// Alerts for the target day with their evidence, read back through a
/// transaction the way a reporting reader would.
async fn persisted(store: &dyn Store) -> Vec<(Alert, Vec<Evidence>)> {
    let mut tx = store.begin().await.unwrap();
    let mut out = Vec::new();
    for alert in tx.alerts_for(target_day(), RISK_SPIKE).await.unwrap() {
        let evidence = tx.evidence_for(alert.id).await.unwrap();
        out.push((alert, evidence));
    }
    out
}

fn actions(entries: &[AuditEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.action.as_str()).collect()
}

#[tokio::test]
async fn spike_produces_alert_with_ranked_evidence() {
    let store = fixture().await;

    let summary = run_rules(&store, Some(TARGET), &SpikeDefaults::default()).await.unwrap();
    assert!(summary.ok);
    assert_eq!(summary.day, target_day());
    assert_eq!(summary.totals.alerts, 1);
    assert_eq!(summary.totals.evidence, 10);
    assert_eq!(summary.totals.failures, 0);
    assert_eq!(summary.totals.rules_evaluated, 1);

    let rows = persisted(&store).await;
    assert_eq!(rows.len(), 1);
    let (alert, evidence) = &rows[0];
    assert_eq!(alert.segment, acme());
    assert_eq!(alert.alert_type, RISK_SPIKE);
    assert_eq!(alert.metric, "negative_rate");
    assert_eq!(alert.severity, Severity::High);
    assert!((alert.value - 0.6).abs() < 1e-12);
    assert_eq!(alert.baseline.rule_name.as_deref(), Some("refunds"));
    assert_eq!(alert.baseline.baseline_samples, 10);
    assert!(alert.message.starts_with("[refunds] risk spike: negative_rate=0.60 vs median=0.10"));

    assert_eq!(evidence.len(), 10);
    assert_eq!(evidence.iter().map(|e| e.rank).collect::<Vec<_>>(), (1..=10).collect::<Vec<_>>());
    for e in evidence {
        assert_eq!(e.alert_id, alert.id);
        assert_eq!(e.emotion_match.as_deref(), Some("negative"));
        assert_eq!(e.keyword_hits, vec!["refund"]);
        assert_eq!(e.highlights.len(), 1);
        assert!((e.contribution - 1.2 * 1.3).abs() < 1e-9);
    }
}

#[tokio::test]
async fn rerun_replaces_alerts_and_evidence() {
    let store = fixture().await;
    let defaults = SpikeDefaults::default();

    let first = run_rules(&store, Some(TARGET), &defaults).await.unwrap();
    let before = persisted(&store).await;

    let second = run_rules(&store, Some(TARGET), &defaults).await.unwrap();
    let after = persisted(&store).await;

    assert_eq!(first, second);
    assert_eq!(before.len(), 1);
    assert_eq!(after.len(), 1);
    let ((alert_first, evidence_first), (alert_second, evidence_second)) = (&before[0], &after[0]);
    assert_ne!(alert_first.id, alert_second.id);
    assert_eq!(alert_first.segment, alert_second.segment);
    assert_eq!(alert_first.message, alert_second.message);

    let docs = |ev: &[Evidence]| ev.iter().map(|e| (e.rank, e.document_id)).collect::<Vec<_>>();
    assert_eq!(docs(evidence_first), docs(evidence_second));

    // Nothing from the first run is left behind.
    assert_eq!(store.all_alerts().await.len(), 1);
    assert_eq!(store.all_evidence().await.len(), evidence_second.len());
}

#[tokio::test]
async fn audit_trail_brackets_the_run() {
    let store = fixture().await;
    run_rules(&store, Some(TARGET), &SpikeDefaults::default()).await.unwrap();

    let entries = store.audit_entries().await;
    assert_eq!(
        actions(&entries),
        vec!["rule_engine_run_started", "alert_created", "rule_engine_run_completed"]
    );
    assert!(entries.iter().all(|e| e.actor == "system"));

    let (started, created, completed) = (&entries[0], &entries[1], &entries[2]);
    assert_eq!(started.entity_type.as_deref(), Some("rule_engine_run"));
    assert_eq!(started.entity_id, completed.entity_id);
    assert_eq!(started.metadata["day"], json!(TARGET));

    let alert = &store.all_alerts().await[0];
    assert_eq!(created.entity_type.as_deref(), Some("alert"));
    assert_eq!(created.entity_id, Some(alert.id.to_string()));
    assert_eq!(created.metadata["org_id"], json!("acme"));
    assert_eq!(created.metadata["source"], json!(null));

    assert_eq!(completed.metadata["alerts"], json!(1));
    assert_eq!(completed.metadata["evidence"], json!(10));
    assert_eq!(completed.metadata["failures"], json!(0));
}

#[tokio::test]
async fn rule_fields_override_run_defaults() {
    let store = fixture().await;
    // A threshold no spike can reach and a tiny evidence budget on a second rule.
    put_rule(&store, "strict", json!({"type": "risk_spike", "z_threshold": 1e12})).await;
    put_rule(&store, "tight", json!({"type": "risk_spike", "top_k_evidence": 2})).await;

    let summary = run_rules(&store, Some(TARGET), &SpikeDefaults::default()).await.unwrap();
    assert_eq!(summary.totals.rules_evaluated, 3);
    assert_eq!(summary.totals.alerts, 2);
    assert_eq!(summary.totals.evidence, 10 + 2);

    let mut names: Vec<_> = store
        .all_alerts()
        .await
        .into_iter()
        .filter_map(|a| a.baseline.rule_name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["refunds", "tight"]);
}

#[tokio::test]
async fn run_defaults_apply_when_rule_omits_them() {
    let store = fixture().await;
    let defaults = SpikeDefaults {
        min_docs: 50,
        ..SpikeDefaults::default()
    };
    let summary = run_rules(&store, Some(TARGET), &defaults).await.unwrap();
    assert_eq!(summary.totals.alerts, 0);
}

#[tokio::test]
async fn bad_and_foreign_rules_do_not_stop_the_run() {
    let store = fixture().await;
    put_rule(&store, "a-malformed", json!({"type": "risk_spike", "keywords": 7})).await;
    put_rule(&store, "b-metric", json!({"type": "risk_spike", "metric": "joy_rate"})).await;
    put_rule(&store, "c-other", json!({"type": "volume_drop"})).await;

    let summary = run_rules(&store, Some(TARGET), &SpikeDefaults::default()).await.unwrap();
    assert_eq!(summary.totals.failures, 2);
    assert_eq!(summary.totals.rules_evaluated, 1);
    assert_eq!(summary.totals.alerts, 1);
}

#[tokio::test]
async fn six_days_of_history_is_not_enough() {
    let store = MemoryStore::new();
    for day in 5..=10 {
        seed_day(&store, acme(), day, 20, 2).await;
    }
    seed_day(&store, acme(), 11, 20, 19).await;
    aggregate_days(&store, 5..=11).await;
    put_rule(&store, "refunds", json!({"type": "risk_spike"})).await;

    let summary = run_rules(&store, Some(TARGET), &SpikeDefaults::default()).await.unwrap();
    assert!(summary.ok);
    assert_eq!(summary.totals.alerts, 0);
    assert_eq!(summary.totals.failures, 0);
}

#[tokio::test]
async fn missing_daily_rows_yield_empty_run_until_aggregated() {
    let store = MemoryStore::new();
    seed_segment(&store, acme(), 12).await;
    put_rule(&store, "refunds", json!({"type": "risk_spike", "keywords": ["refund"]})).await;

    let summary = run_rules(&store, Some(TARGET), &SpikeDefaults::default()).await.unwrap();
    assert!(summary.ok);
    assert_eq!(summary.totals.alerts, 0);
    assert_eq!(summary.totals.failures, 0);
    assert_eq!(summary.totals.rules_evaluated, 1);
    assert!(persisted(&store).await.is_empty());

    aggregate_days(&store, 1..=11).await;
    let summary = run_rules(&store, Some(TARGET), &SpikeDefaults::default()).await.unwrap();
    assert_eq!(summary.totals.alerts, 1);
    assert_eq!(summary.totals.evidence, 10);

    let rows = persisted(&store).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0.segment, acme());
    assert_eq!(rows[0].1.len(), 10);
}

#[tokio::test]
async fn malformed_day_writes_nothing() {
    let store = fixture().await;
    let err = run_rules(&store, Some("11/06/2024"), &SpikeDefaults::default()).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidDay(_)));
    assert!(store.audit_entries().await.is_empty());
}

#[tokio::test]
async fn evidence_uses_latest_inference_only() {
    let store = fixture().await;
    let doc = add_doc(&store, acme(), at(11, 500), "refund refund", "negative", &["anger"], Some(1.0)).await;
    // A later re-inference flips the document to positive.
    store
        .add_inference(Inference {
            id: Uuid::new_v4(),
            document_id: doc,
            sentiment: Some("positive".into()),
            emotion_labels: None,
            calibrated_confidence: Some(0.1),
            created_at: at(12, 0),
        })
        .await
        .unwrap();
    aggregate_days(&store, 11..=11).await;

    run_rules(&store, Some(TARGET), &SpikeDefaults { top_k_evidence: 100, ..SpikeDefaults::default() })
        .await
        .unwrap();

    let evidence = store.all_evidence().await;
    let row = evidence.iter().find(|e| e.document_id == doc).unwrap();
    assert_eq!(row.emotion_match.as_deref(), Some("positive"));
    assert_eq!(row.keyword_hits, vec!["refund"]);
    assert_eq!(row.highlights.len(), 2);
    // (0.2 for one distinct keyword) * (0.5 + 0.1)
    assert!((row.contribution - 0.12).abs() < 1e-9);
    assert_eq!(evidence.iter().filter(|e| e.document_id == doc).count(), 1);
}

#[tokio::test]
async fn detect_spikes_reports_without_writing() {
    let store = fixture().await;
    let params = SpikeParams {
        baseline_days: 30,
        z_threshold: 3.5,
        min_docs: 10,
    };

    let report = detect_spikes(&store, Some(TARGET), &params).await.unwrap();
    assert!(report.ok);
    assert_eq!(report.spikes.len(), 1);
    assert_eq!(report.spikes[0].segment, acme());
    assert_eq!(report.spikes[0].current_total, 20);
    assert_eq!(report.spikes[0].current_negative, 12);

    assert!(store.all_alerts().await.is_empty());
    assert!(store.audit_entries().await.is_empty());
}

// ── Failure isolation ───────────────────────────────────────────────

/// Wraps a [`MemoryStore`] and fails evidence writes for alerts on the
/// `poison` org, after the alert and its audit row were already written.
struct PoisonStore {
    inner: MemoryStore,
}

struct PoisonTx {
    inner: Box<dyn StoreTx>,
    poisoned: HashSet<Uuid>,
}

#[async_trait]
impl Store for PoisonStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        Ok(Box::new(PoisonTx {
            inner: self.inner.begin().await?,
            poisoned: HashSet::new(),
        }))
    }
}

#[async_trait]
impl StoreTx for PoisonTx {
    async fn inferences_between(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<DocumentInference>> {
        self.inner.inferences_between(start, end).await
    }

    async fn latest_inferences_for_segment(
        &mut self,
        segment: &SegmentKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<DocumentInference>> {
        self.inner.latest_inferences_for_segment(segment, start, end).await
    }

    async fn delete_daily(&mut self, day: NaiveDate) -> StoreResult<u64> {
        self.inner.delete_daily(day).await
    }

    async fn insert_daily(&mut self, rows: &[DailyAggregate]) -> StoreResult<()> {
        self.inner.insert_daily(rows).await
    }

    async fn daily_between(&mut self, start: NaiveDate, end: NaiveDate) -> StoreResult<Vec<DailyAggregate>> {
        self.inner.daily_between(start, end).await
    }

    async fn delete_rolling(&mut self, window: AggregateWindow) -> StoreResult<u64> {
        self.inner.delete_rolling(window).await
    }

    async fn insert_rolling(&mut self, rows: &[RollingAggregate]) -> StoreResult<()> {
        self.inner.insert_rolling(rows).await
    }

    async fn rolling_for(&mut self, window: AggregateWindow) -> StoreResult<Vec<RollingAggregate>> {
        self.inner.rolling_for(window).await
    }

    async fn enabled_rules(&mut self) -> StoreResult<Vec<AlertRule>> {
        self.inner.enabled_rules().await
    }

    async fn alert_ids(&mut self, day: NaiveDate, alert_type: &str) -> StoreResult<Vec<Uuid>> {
        self.inner.alert_ids(day, alert_type).await
    }

    async fn alerts_for(&mut self, day: NaiveDate, alert_type: &str) -> StoreResult<Vec<Alert>> {
        self.inner.alerts_for(day, alert_type).await
    }

    async fn delete_evidence_for(&mut self, alert_ids: &[Uuid]) -> StoreResult<u64> {
        self.inner.delete_evidence_for(alert_ids).await
    }

    async fn delete_alerts(&mut self, alert_ids: &[Uuid]) -> StoreResult<u64> {
        self.inner.delete_alerts(alert_ids).await
    }

    async fn insert_alert(&mut self, alert: &Alert) -> StoreResult<()> {
        if alert.segment.org.as_deref() == Some("poison") {
            self.poisoned.insert(alert.id);
        }
        self.inner.insert_alert(alert).await
    }

    async fn insert_evidence(&mut self, rows: &[Evidence]) -> StoreResult<()> {
        if rows.iter().any(|e| self.poisoned.contains(&e.alert_id)) {
            return Err(StoreError::Constraint("injected evidence failure".into()));
        }
        self.inner.insert_evidence(rows).await
    }

    async fn evidence_for(&mut self, alert_id: Uuid) -> StoreResult<Vec<Evidence>> {
        self.inner.evidence_for(alert_id).await
    }

    async fn append_audit(&mut self, entry: &AuditEntry) -> StoreResult<()> {
        self.inner.append_audit(entry).await
    }

    async fn savepoint(&mut self) -> StoreResult<()> {
        self.inner.savepoint().await
    }

    async fn release_savepoint(&mut self) -> StoreResult<()> {
        self.inner.release_savepoint().await
    }

    async fn rollback_to_savepoint(&mut self) -> StoreResult<()> {
        self.inner.rollback_to_savepoint().await
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.inner.commit().await
    }
}

#[tokio::test]
async fn failing_segment_is_isolated_and_rolled_back() {
    let memory = fixture().await;
    seed_segment(&memory, poison(), 12).await;
    aggregate_days(&memory, 1..=11).await;
    let store = PoisonStore {
        inner: memory.clone(),
    };

    let summary = run_rules(&store, Some(TARGET), &SpikeDefaults::default()).await.unwrap();
    assert!(summary.ok);
    assert_eq!(summary.totals.failures, 1);
    assert_eq!(summary.totals.alerts, 1);
    assert_eq!(summary.totals.evidence, 10);

    let alerts = memory.all_alerts().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].segment, acme());

    // The poisoned pair's alert_created audit row went with its savepoint.
    let entries = memory.audit_entries().await;
    assert_eq!(actions(&entries).iter().filter(|a| **a == "alert_created").count(), 1);
    let completed = entries.last().unwrap();
    assert_eq!(completed.action, "rule_engine_run_completed");
    assert_eq!(completed.metadata["failures"], json!(1));
}

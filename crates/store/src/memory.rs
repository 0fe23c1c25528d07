//! In-process store with real transaction semantics.
//!
//! A transaction takes the state lock for its whole lifetime and works on a
//! staged copy; `commit` swaps the copy in, drop discards it. Concurrent
//! jobs therefore serialize on the lock instead of interleaving.
//!
//! The same constraints as the SQL schema are enforced: unique aggregate
//! keys, unique `(alert_id, document_id)` evidence, evidence must reference
//! an existing alert, and an alert cannot be deleted while evidence still
//! points at it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use moodwatch_core::{
    AggregateWindow, Alert, AlertRule, AuditEntry, DailyAggregate, Document, DocumentInference,
    Evidence, Inference, RollingAggregate, SegmentKey,
};

use crate::error::{Result, StoreError};
use crate::{Store, StoreTx};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    documents: Vec<Document>,
    inferences: Vec<Inference>,
    rules: Vec<AlertRule>,
    daily: Vec<DailyAggregate>,
    rolling: Vec<RollingAggregate>,
    alerts: Vec<Alert>,
    evidence: Vec<Evidence>,
    audit: Vec<AuditEntry>,
}

/// Shared in-memory store. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Collaborator fixtures: documents, inferences, rules ──

    pub async fn add_document(&self, doc: Document) {
        self.state.lock().await.documents.push(doc);
    }

    pub async fn add_inference(&self, inference: Inference) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.documents.iter().any(|d| d.id == inference.document_id) {
            return Err(StoreError::Constraint(format!(
                "inference {} references unknown document {}",
                inference.id, inference.document_id
            )));
        }
        state.inferences.push(inference);
        Ok(())
    }

    /// Insert or replace a rule by id. Rule names are unique.
    pub async fn put_rule(&self, rule: AlertRule) -> Result<()> {
        let mut state = self.state.lock().await;
        if state
            .rules
            .iter()
            .any(|r| r.name == rule.name && r.id != rule.id)
        {
            return Err(StoreError::Constraint(format!("duplicate rule name '{}'", rule.name)));
        }
        state.rules.retain(|r| r.id != rule.id);
        state.rules.push(rule);
        Ok(())
    }

    /// Snapshot of the audit trail in append order.
    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.state.lock().await.audit.clone()
    }

    /// Snapshot of all persisted alerts.
    pub async fn all_alerts(&self) -> Vec<Alert> {
        self.state.lock().await.alerts.clone()
    }

    /// Snapshot of all persisted evidence.
    pub async fn all_evidence(&self) -> Vec<Evidence> {
        self.state.lock().await.evidence.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = (*guard).clone();
        Ok(Box::new(MemoryTx {
            guard,
            staged,
            savepoint: None,
        }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
    savepoint: Option<MemoryState>,
}

impl MemoryTx {
    fn join_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> HashMap<Uuid, &Document> {
        self.staged
            .documents
            .iter()
            .filter(|d| {
                let t = d.event_time();
                start <= t && t < end
            })
            .map(|d| (d.id, d))
            .collect()
    }
}

fn sort_by_event(rows: &mut [DocumentInference]) {
    rows.sort_by(|a, b| {
        (a.document.event_time(), a.document.id, a.inference.created_at, a.inference.id).cmp(&(
            b.document.event_time(),
            b.document.id,
            b.inference.created_at,
            b.inference.id,
        ))
    });
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn inferences_between(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DocumentInference>> {
        let docs = self.join_in_range(start, end);
        let mut rows: Vec<DocumentInference> = self
            .staged
            .inferences
            .iter()
            .filter_map(|inf| {
                docs.get(&inf.document_id).map(|doc| DocumentInference {
                    document: (*doc).clone(),
                    inference: inf.clone(),
                })
            })
            .collect();
        sort_by_event(&mut rows);
        Ok(rows)
    }

    async fn latest_inferences_for_segment(
        &mut self,
        segment: &SegmentKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DocumentInference>> {
        let docs = self.join_in_range(start, end);
        let mut latest: HashMap<Uuid, &Inference> = HashMap::new();
        for inf in &self.staged.inferences {
            let Some(doc) = docs.get(&inf.document_id) else {
                continue;
            };
            if &doc.segment != segment {
                continue;
            }
            latest
                .entry(inf.document_id)
                .and_modify(|cur| {
                    if (inf.created_at, inf.id) > (cur.created_at, cur.id) {
                        *cur = inf;
                    }
                })
                .or_insert(inf);
        }
        let mut rows: Vec<DocumentInference> = latest
            .into_iter()
            .filter_map(|(doc_id, inf)| {
                docs.get(&doc_id).map(|doc| DocumentInference {
                    document: (*doc).clone(),
                    inference: inf.clone(),
                })
            })
            .collect();
        sort_by_event(&mut rows);
        Ok(rows)
    }

    async fn delete_daily(&mut self, day: NaiveDate) -> Result<u64> {
        let before = self.staged.daily.len();
        self.staged.daily.retain(|r| r.day != day);
        Ok((before - self.staged.daily.len()) as u64)
    }

    async fn insert_daily(&mut self, rows: &[DailyAggregate]) -> Result<()> {
        let mut keys: HashSet<_> = self
            .staged
            .daily
            .iter()
            .map(|r| (r.day, r.bucket.clone()))
            .collect();
        for row in rows {
            if !keys.insert((row.day, row.bucket.clone())) {
                return Err(StoreError::Constraint(format!(
                    "duplicate daily aggregate for {} {:?}",
                    row.day, row.bucket
                )));
            }
        }
        self.staged.daily.extend_from_slice(rows);
        Ok(())
    }

    async fn daily_between(
        &mut self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyAggregate>> {
        let mut rows: Vec<DailyAggregate> = self
            .staged
            .daily
            .iter()
            .filter(|r| start <= r.day && r.day <= end)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (a.day, &a.bucket).cmp(&(b.day, &b.bucket)));
        Ok(rows)
    }

    async fn delete_rolling(&mut self, window: AggregateWindow) -> Result<u64> {
        let before = self.staged.rolling.len();
        self.staged
            .rolling
            .retain(|r| !(r.as_of_day == window.as_of_day && r.window_days == window.window_days));
        Ok((before - self.staged.rolling.len()) as u64)
    }

    async fn insert_rolling(&mut self, rows: &[RollingAggregate]) -> Result<()> {
        let mut keys: HashSet<_> = self
            .staged
            .rolling
            .iter()
            .map(|r| (r.as_of_day, r.window_days, r.bucket.clone()))
            .collect();
        for row in rows {
            if !keys.insert((row.as_of_day, row.window_days, row.bucket.clone())) {
                return Err(StoreError::Constraint(format!(
                    "duplicate rolling aggregate for {} w{} {:?}",
                    row.as_of_day, row.window_days, row.bucket
                )));
            }
        }
        self.staged.rolling.extend_from_slice(rows);
        Ok(())
    }

    async fn rolling_for(&mut self, window: AggregateWindow) -> Result<Vec<RollingAggregate>> {
        let mut rows: Vec<RollingAggregate> = self
            .staged
            .rolling
            .iter()
            .filter(|r| r.as_of_day == window.as_of_day && r.window_days == window.window_days)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.bucket.cmp(&b.bucket));
        Ok(rows)
    }

    async fn enabled_rules(&mut self) -> Result<Vec<AlertRule>> {
        let mut rules: Vec<AlertRule> =
            self.staged.rules.iter().filter(|r| r.enabled).cloned().collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rules)
    }

    async fn alert_ids(&mut self, day: NaiveDate, alert_type: &str) -> Result<Vec<Uuid>> {
        Ok(self
            .staged
            .alerts
            .iter()
            .filter(|a| a.day == day && a.alert_type == alert_type)
            .map(|a| a.id)
            .collect())
    }

    async fn alerts_for(&mut self, day: NaiveDate, alert_type: &str) -> Result<Vec<Alert>> {
        Ok(self
            .staged
            .alerts
            .iter()
            .filter(|a| a.day == day && a.alert_type == alert_type)
            .cloned()
            .collect())
    }

    async fn delete_evidence_for(&mut self, alert_ids: &[Uuid]) -> Result<u64> {
        let before = self.staged.evidence.len();
        self.staged.evidence.retain(|e| !alert_ids.contains(&e.alert_id));
        Ok((before - self.staged.evidence.len()) as u64)
    }

    async fn delete_alerts(&mut self, alert_ids: &[Uuid]) -> Result<u64> {
        if let Some(e) = self
            .staged
            .evidence
            .iter()
            .find(|e| alert_ids.contains(&e.alert_id))
        {
            return Err(StoreError::Constraint(format!(
                "alert {} still referenced by evidence {}",
                e.alert_id, e.id
            )));
        }
        let before = self.staged.alerts.len();
        self.staged.alerts.retain(|a| !alert_ids.contains(&a.id));
        Ok((before - self.staged.alerts.len()) as u64)
    }

    async fn insert_alert(&mut self, alert: &Alert) -> Result<()> {
        if self.staged.alerts.iter().any(|a| a.id == alert.id) {
            return Err(StoreError::Constraint(format!("duplicate alert id {}", alert.id)));
        }
        self.staged.alerts.push(alert.clone());
        Ok(())
    }

    async fn insert_evidence(&mut self, rows: &[Evidence]) -> Result<()> {
        let alert_ids: HashSet<Uuid> = self.staged.alerts.iter().map(|a| a.id).collect();
        let mut pairs: HashSet<(Uuid, Uuid)> = self
            .staged
            .evidence
            .iter()
            .map(|e| (e.alert_id, e.document_id))
            .collect();
        for row in rows {
            if !alert_ids.contains(&row.alert_id) {
                return Err(StoreError::Constraint(format!(
                    "evidence {} references missing alert {}",
                    row.id, row.alert_id
                )));
            }
            if !pairs.insert((row.alert_id, row.document_id)) {
                return Err(StoreError::Constraint(format!(
                    "duplicate evidence for alert {} document {}",
                    row.alert_id, row.document_id
                )));
            }
        }
        self.staged.evidence.extend_from_slice(rows);
        Ok(())
    }

    async fn evidence_for(&mut self, alert_id: Uuid) -> Result<Vec<Evidence>> {
        let mut rows: Vec<Evidence> = self
            .staged
            .evidence
            .iter()
            .filter(|e| e.alert_id == alert_id)
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.rank);
        Ok(rows)
    }

    async fn append_audit(&mut self, entry: &AuditEntry) -> Result<()> {
        self.staged.audit.push(entry.clone());
        Ok(())
    }

    async fn savepoint(&mut self) -> Result<()> {
        self.savepoint = Some(self.staged.clone());
        Ok(())
    }

    async fn release_savepoint(&mut self) -> Result<()> {
        self.savepoint.take().map(|_| ()).ok_or(StoreError::NoSavepoint)
    }

    async fn rollback_to_savepoint(&mut self) -> Result<()> {
        let snapshot = self.savepoint.take().ok_or(StoreError::NoSavepoint)?;
        self.staged = snapshot;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx {
            mut guard, staged, ..
        } = *self;
        *guard = staged;
        Ok(())
    }
}

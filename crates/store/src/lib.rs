//! Persistence seam for the batch jobs.
//!
//! Jobs never touch a pool or a global session. They call [`Store::begin`]
//! and do all reads and writes through the returned [`StoreTx`] handle, then
//! [`StoreTx::commit`]. Dropping the handle without committing rolls back, so
//! a failed job leaves either the old or the new row set for a key, never a
//! mix.
//!
//! Two implementations:
//! - [`MemoryStore`]: staged-copy transactions over in-process state (tests,
//!   local runs).
//! - [`PgStore`]: PostgreSQL via `sqlx`, schema in `migrations/`.

mod error;
mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use moodwatch_core::{
    AggregateWindow, Alert, AlertRule, AuditEntry, DailyAggregate, DocumentInference, Evidence,
    RollingAggregate, SegmentKey,
};

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::{init_pg_pool, PgStore};

/// Opens transactions. Implementations are cheap to share across jobs.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>>;
}

/// One open transaction. All job I/O goes through this handle.
#[async_trait]
pub trait StoreTx: Send {
    // ── Document / inference reads (external collaborator data) ──

    /// Every inference whose document's event time falls in `[start, end)`,
    /// ordered by event time, document id, then inference creation.
    async fn inferences_between(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DocumentInference>>;

    /// Documents of `segment` with event time in `[start, end)`, each paired
    /// with its latest inference only. Ordered by event time, then document id.
    async fn latest_inferences_for_segment(
        &mut self,
        segment: &SegmentKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DocumentInference>>;

    // ── Daily aggregates ──

    async fn delete_daily(&mut self, day: NaiveDate) -> Result<u64>;
    async fn insert_daily(&mut self, rows: &[DailyAggregate]) -> Result<()>;
    /// Daily rows with `start <= day <= end`.
    async fn daily_between(&mut self, start: NaiveDate, end: NaiveDate)
        -> Result<Vec<DailyAggregate>>;

    // ── Rolling aggregates ──

    async fn delete_rolling(&mut self, window: AggregateWindow) -> Result<u64>;
    async fn insert_rolling(&mut self, rows: &[RollingAggregate]) -> Result<()>;
    async fn rolling_for(&mut self, window: AggregateWindow) -> Result<Vec<RollingAggregate>>;

    // ── Rules ──

    async fn enabled_rules(&mut self) -> Result<Vec<AlertRule>>;

    // ── Alerts / evidence ──

    async fn alert_ids(&mut self, day: NaiveDate, alert_type: &str) -> Result<Vec<Uuid>>;
    async fn alerts_for(&mut self, day: NaiveDate, alert_type: &str) -> Result<Vec<Alert>>;
    async fn delete_evidence_for(&mut self, alert_ids: &[Uuid]) -> Result<u64>;
    async fn delete_alerts(&mut self, alert_ids: &[Uuid]) -> Result<u64>;
    async fn insert_alert(&mut self, alert: &Alert) -> Result<()>;
    /// Fails with [`StoreError::Constraint`] if an alert is missing or an
    /// `(alert_id, document_id)` pair already exists.
    async fn insert_evidence(&mut self, rows: &[Evidence]) -> Result<()>;
    async fn evidence_for(&mut self, alert_id: Uuid) -> Result<Vec<Evidence>>;

    // ── Audit ──

    async fn append_audit(&mut self, entry: &AuditEntry) -> Result<()>;

    // ── Transaction control ──

    /// Open a single-level savepoint.
    async fn savepoint(&mut self) -> Result<()>;
    async fn release_savepoint(&mut self) -> Result<()>;
    /// Undo everything since [`savepoint`](StoreTx::savepoint).
    async fn rollback_to_savepoint(&mut self) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

//! PostgreSQL-backed store.
//!
//! [`PgStore`] wraps a `PgPool`; every [`StoreTx`] is one `sqlx` transaction.
//! Segment dimensions map to nullable text columns and are matched with
//! `IS NOT DISTINCT FROM`, so an unset dimension only ever matches another
//! unset dimension.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use moodwatch_core::config::PostgresConfig;
use moodwatch_core::{
    AggregateWindow, Alert, AlertRule, AuditEntry, BucketKey, DailyAggregate, Dimension, Document,
    DocumentInference, Evidence, Highlight, Inference, RollingAggregate, SegmentKey,
};

use crate::error::{Result, StoreError};
use crate::{Store, StoreTx};

const SAVEPOINT: &str = "pair_evaluation";

/// Create a PostgreSQL connection pool and run migrations.
pub async fn init_pg_pool(config: &PostgresConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.connection_string())
        .await?;
    info!("PostgreSQL connected: {}", config.host);
    sqlx::migrate!("../../migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

/// Store backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx {
            tx,
            savepoint_open: false,
        }))
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
    savepoint_open: bool,
}

// ── Row mapping ──────────────────────────────────────────────────────

fn segment_from(
    org: Option<String>,
    team: Option<String>,
    channel: Option<String>,
    source: Option<String>,
) -> SegmentKey {
    SegmentKey {
        org: Dimension::from(org),
        team: Dimension::from(team),
        channel: Dimension::from(channel),
        source: Dimension::from(source),
    }
}

/// Emotion labels are free-form JSON upstream; keep only string entries.
fn labels_from(value: Option<serde_json::Value>) -> Option<Vec<String>> {
    match value? {
        serde_json::Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        ),
        _ => None,
    }
}

fn window_days_i32(window: AggregateWindow) -> Result<i32> {
    i32::try_from(window.window_days)
        .map_err(|_| StoreError::Constraint(format!("window_days {} too large", window.window_days)))
}

#[derive(sqlx::FromRow)]
struct JoinedRow {
    document_id: Uuid,
    org_id: Option<String>,
    team_id: Option<String>,
    channel: Option<String>,
    source: Option<String>,
    text_redacted: String,
    timestamp: Option<DateTime<Utc>>,
    document_created_at: DateTime<Utc>,
    inference_id: Uuid,
    sentiment: Option<String>,
    emotion_labels: Option<serde_json::Value>,
    calibrated_confidence: Option<f64>,
    inference_created_at: DateTime<Utc>,
}

impl From<JoinedRow> for DocumentInference {
    fn from(r: JoinedRow) -> Self {
        DocumentInference {
            document: Document {
                id: r.document_id,
                segment: segment_from(r.org_id, r.team_id, r.channel, r.source),
                text_redacted: r.text_redacted,
                timestamp: r.timestamp,
                created_at: r.document_created_at,
            },
            inference: Inference {
                id: r.inference_id,
                document_id: r.document_id,
                sentiment: r.sentiment,
                emotion_labels: labels_from(r.emotion_labels),
                calibrated_confidence: r.calibrated_confidence,
                created_at: r.inference_created_at,
            },
        }
    }
}

const JOINED_COLUMNS: &str = "d.id AS document_id, d.org_id, d.team_id, d.channel, d.source,
       d.text_redacted, d.timestamp, d.created_at AS document_created_at,
       di.id AS inference_id, di.sentiment, di.emotion_labels, di.calibrated_confidence,
       di.created_at AS inference_created_at";

#[derive(sqlx::FromRow)]
struct DailyRow {
    id: Uuid,
    day: NaiveDate,
    org_id: Option<String>,
    team_id: Option<String>,
    channel: Option<String>,
    source: Option<String>,
    sentiment: Option<String>,
    emotion: Option<String>,
    doc_count: i64,
    avg_confidence: Option<f64>,
    created_at: DateTime<Utc>,
}

impl From<DailyRow> for DailyAggregate {
    fn from(r: DailyRow) -> Self {
        DailyAggregate {
            id: r.id,
            day: r.day,
            bucket: BucketKey {
                segment: segment_from(r.org_id, r.team_id, r.channel, r.source),
                sentiment: r.sentiment,
                emotion: r.emotion,
            },
            doc_count: r.doc_count,
            avg_confidence: r.avg_confidence,
            created_at: r.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RollingRow {
    id: Uuid,
    as_of_day: NaiveDate,
    window_days: i32,
    org_id: Option<String>,
    team_id: Option<String>,
    channel: Option<String>,
    source: Option<String>,
    sentiment: Option<String>,
    emotion: Option<String>,
    doc_count: i64,
    avg_confidence: Option<f64>,
    created_at: DateTime<Utc>,
}

impl TryFrom<RollingRow> for RollingAggregate {
    type Error = StoreError;

    fn try_from(r: RollingRow) -> Result<Self> {
        Ok(RollingAggregate {
            id: r.id,
            as_of_day: r.as_of_day,
            window_days: u32::try_from(r.window_days)
                .map_err(|_| StoreError::Corrupt(format!("negative window_days {}", r.window_days)))?,
            bucket: BucketKey {
                segment: segment_from(r.org_id, r.team_id, r.channel, r.source),
                sentiment: r.sentiment,
                emotion: r.emotion,
            },
            doc_count: r.doc_count,
            avg_confidence: r.avg_confidence,
            created_at: r.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RuleRow {
    id: Uuid,
    name: String,
    is_enabled: bool,
    definition: serde_json::Value,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct AlertRow {
    id: Uuid,
    created_at: DateTime<Utc>,
    day: NaiveDate,
    alert_type: String,
    severity: String,
    org_id: Option<String>,
    team_id: Option<String>,
    channel: Option<String>,
    source: Option<String>,
    metric: String,
    value: f64,
    baseline: serde_json::Value,
    message: String,
}

impl TryFrom<AlertRow> for Alert {
    type Error = StoreError;

    fn try_from(r: AlertRow) -> Result<Self> {
        Ok(Alert {
            id: r.id,
            created_at: r.created_at,
            day: r.day,
            alert_type: r.alert_type,
            severity: r.severity.parse().map_err(StoreError::Corrupt)?,
            segment: segment_from(r.org_id, r.team_id, r.channel, r.source),
            metric: r.metric,
            value: r.value,
            baseline: serde_json::from_value(r.baseline)?,
            message: r.message,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EvidenceRow {
    id: Uuid,
    alert_id: Uuid,
    document_id: Uuid,
    rank: i32,
    contribution: f64,
    emotion_match: Option<String>,
    keyword_hits: serde_json::Value,
    highlights: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<EvidenceRow> for Evidence {
    type Error = StoreError;

    fn try_from(r: EvidenceRow) -> Result<Self> {
        let highlights: Vec<Highlight> = serde_json::from_value(r.highlights)?;
        Ok(Evidence {
            id: r.id,
            alert_id: r.alert_id,
            document_id: r.document_id,
            rank: u32::try_from(r.rank)
                .map_err(|_| StoreError::Corrupt(format!("negative rank {}", r.rank)))?,
            contribution: r.contribution,
            emotion_match: r.emotion_match,
            keyword_hits: serde_json::from_value(r.keyword_hits)?,
            highlights,
            created_at: r.created_at,
        })
    }
}

// ── Transaction ──────────────────────────────────────────────────────

#[async_trait]
impl StoreTx for PgTx {
    async fn inferences_between(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DocumentInference>> {
        let sql = format!(
            "SELECT {JOINED_COLUMNS}
             FROM document_inference di
             JOIN documents d ON d.id = di.document_id
             WHERE COALESCE(d.timestamp, d.created_at) >= $1
               AND COALESCE(d.timestamp, d.created_at) <  $2
             ORDER BY COALESCE(d.timestamp, d.created_at), d.id, di.created_at, di.id"
        );
        let rows = sqlx::query_as::<_, JoinedRow>(&sql)
            .bind(start)
            .bind(end)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows.into_iter().map(DocumentInference::from).collect())
    }

    async fn latest_inferences_for_segment(
        &mut self,
        segment: &SegmentKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DocumentInference>> {
        let sql = format!(
            "SELECT * FROM (
                SELECT DISTINCT ON (d.id) {JOINED_COLUMNS},
                       COALESCE(d.timestamp, d.created_at) AS event_time
                FROM documents d
                JOIN document_inference di ON di.document_id = d.id
                WHERE d.org_id  IS NOT DISTINCT FROM $1::text
                  AND d.team_id IS NOT DISTINCT FROM $2::text
                  AND d.channel IS NOT DISTINCT FROM $3::text
                  AND d.source  IS NOT DISTINCT FROM $4::text
                  AND COALESCE(d.timestamp, d.created_at) >= $5
                  AND COALESCE(d.timestamp, d.created_at) <  $6
                ORDER BY d.id, di.created_at DESC, di.id DESC
             ) latest
             ORDER BY event_time, document_id"
        );
        let rows = sqlx::query_as::<_, JoinedRow>(&sql)
            .bind(segment.org.as_deref())
            .bind(segment.team.as_deref())
            .bind(segment.channel.as_deref())
            .bind(segment.source.as_deref())
            .bind(start)
            .bind(end)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows.into_iter().map(DocumentInference::from).collect())
    }

    async fn delete_daily(&mut self, day: NaiveDate) -> Result<u64> {
        let res = sqlx::query("DELETE FROM emotion_daily WHERE day = $1")
            .bind(day)
            .execute(&mut *self.tx)
            .await?;
        Ok(res.rows_affected())
    }

    async fn insert_daily(&mut self, rows: &[DailyAggregate]) -> Result<()> {
        for r in rows {
            let s = &r.bucket.segment;
            sqlx::query(
                "INSERT INTO emotion_daily
                    (id, day, org_id, team_id, channel, source, sentiment, emotion,
                     doc_count, avg_confidence, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            )
            .bind(r.id)
            .bind(r.day)
            .bind(s.org.as_deref())
            .bind(s.team.as_deref())
            .bind(s.channel.as_deref())
            .bind(s.source.as_deref())
            .bind(r.bucket.sentiment.as_deref())
            .bind(r.bucket.emotion.as_deref())
            .bind(r.doc_count)
            .bind(r.avg_confidence)
            .bind(r.created_at)
            .execute(&mut *self.tx)
            .await?;
        }
        debug!(rows = rows.len(), "inserted daily aggregates");
        Ok(())
    }

    async fn daily_between(
        &mut self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyAggregate>> {
        let rows = sqlx::query_as::<_, DailyRow>(
            "SELECT id, day, org_id, team_id, channel, source, sentiment, emotion,
                    doc_count, avg_confidence, created_at
             FROM emotion_daily
             WHERE day >= $1 AND day <= $2
             ORDER BY day, org_id NULLS FIRST, team_id NULLS FIRST, channel NULLS FIRST,
                      source NULLS FIRST, sentiment NULLS FIRST, emotion NULLS FIRST",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(DailyAggregate::from).collect())
    }

    async fn delete_rolling(&mut self, window: AggregateWindow) -> Result<u64> {
        let res = sqlx::query("DELETE FROM emotion_rolling WHERE as_of_day = $1 AND window_days = $2")
            .bind(window.as_of_day)
            .bind(window_days_i32(window)?)
            .execute(&mut *self.tx)
            .await?;
        Ok(res.rows_affected())
    }

    async fn insert_rolling(&mut self, rows: &[RollingAggregate]) -> Result<()> {
        for r in rows {
            let s = &r.bucket.segment;
            let window = AggregateWindow::new(r.as_of_day, r.window_days);
            sqlx::query(
                "INSERT INTO emotion_rolling
                    (id, as_of_day, window_days, org_id, team_id, channel, source,
                     sentiment, emotion, doc_count, avg_confidence, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            )
            .bind(r.id)
            .bind(r.as_of_day)
            .bind(window_days_i32(window)?)
            .bind(s.org.as_deref())
            .bind(s.team.as_deref())
            .bind(s.channel.as_deref())
            .bind(s.source.as_deref())
            .bind(r.bucket.sentiment.as_deref())
            .bind(r.bucket.emotion.as_deref())
            .bind(r.doc_count)
            .bind(r.avg_confidence)
            .bind(r.created_at)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn rolling_for(&mut self, window: AggregateWindow) -> Result<Vec<RollingAggregate>> {
        let rows = sqlx::query_as::<_, RollingRow>(
            "SELECT id, as_of_day, window_days, org_id, team_id, channel, source,
                    sentiment, emotion, doc_count, avg_confidence, created_at
             FROM emotion_rolling
             WHERE as_of_day = $1 AND window_days = $2",
        )
        .bind(window.as_of_day)
        .bind(window_days_i32(window)?)
        .fetch_all(&mut *self.tx)
        .await?;
        let mut out = rows
            .into_iter()
            .map(RollingAggregate::try_from)
            .collect::<Result<Vec<_>>>()?;
        out.sort_by(|a, b| a.bucket.cmp(&b.bucket));
        Ok(out)
    }

    async fn enabled_rules(&mut self) -> Result<Vec<AlertRule>> {
        let rows = sqlx::query_as::<_, RuleRow>(
            "SELECT id, name, is_enabled, definition, created_at
             FROM alert_rules
             WHERE is_enabled
             ORDER BY name",
        )
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| AlertRule {
                id: r.id,
                name: r.name,
                enabled: r.is_enabled,
                definition: r.definition,
                created_at: r.created_at,
            })
            .collect())
    }

    async fn alert_ids(&mut self, day: NaiveDate, alert_type: &str) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM alerts WHERE day = $1 AND alert_type = $2",
        )
        .bind(day)
        .bind(alert_type)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(ids)
    }

    async fn alerts_for(&mut self, day: NaiveDate, alert_type: &str) -> Result<Vec<Alert>> {
        let rows = sqlx::query_as::<_, AlertRow>(
            "SELECT id, created_at, day, alert_type, severity, org_id, team_id, channel, source,
                    metric, value, baseline, message
             FROM alerts
             WHERE day = $1 AND alert_type = $2
             ORDER BY created_at, id",
        )
        .bind(day)
        .bind(alert_type)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(Alert::try_from).collect()
    }

    async fn delete_evidence_for(&mut self, alert_ids: &[Uuid]) -> Result<u64> {
        if alert_ids.is_empty() {
            return Ok(0);
        }
        let res = sqlx::query("DELETE FROM alert_evidence WHERE alert_id = ANY($1)")
            .bind(alert_ids)
            .execute(&mut *self.tx)
            .await?;
        Ok(res.rows_affected())
    }

    async fn delete_alerts(&mut self, alert_ids: &[Uuid]) -> Result<u64> {
        if alert_ids.is_empty() {
            return Ok(0);
        }
        let res = sqlx::query("DELETE FROM alerts WHERE id = ANY($1)")
            .bind(alert_ids)
            .execute(&mut *self.tx)
            .await?;
        Ok(res.rows_affected())
    }

    async fn insert_alert(&mut self, alert: &Alert) -> Result<()> {
        let s = &alert.segment;
        sqlx::query(
            "INSERT INTO alerts
                (id, created_at, day, alert_type, severity, org_id, team_id, channel, source,
                 metric, value, baseline, message)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(alert.id)
        .bind(alert.created_at)
        .bind(alert.day)
        .bind(&alert.alert_type)
        .bind(alert.severity.as_str())
        .bind(s.org.as_deref())
        .bind(s.team.as_deref())
        .bind(s.channel.as_deref())
        .bind(s.source.as_deref())
        .bind(&alert.metric)
        .bind(alert.value)
        .bind(serde_json::to_value(&alert.baseline)?)
        .bind(&alert.message)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_evidence(&mut self, rows: &[Evidence]) -> Result<()> {
        for e in rows {
            let rank = i32::try_from(e.rank)
                .map_err(|_| StoreError::Constraint(format!("rank {} too large", e.rank)))?;
            sqlx::query(
                "INSERT INTO alert_evidence
                    (id, alert_id, document_id, rank, contribution, emotion_match,
                     keyword_hits, highlights, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(e.id)
            .bind(e.alert_id)
            .bind(e.document_id)
            .bind(rank)
            .bind(e.contribution)
            .bind(e.emotion_match.as_deref())
            .bind(serde_json::to_value(&e.keyword_hits)?)
            .bind(serde_json::to_value(&e.highlights)?)
            .bind(e.created_at)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn evidence_for(&mut self, alert_id: Uuid) -> Result<Vec<Evidence>> {
        let rows = sqlx::query_as::<_, EvidenceRow>(
            "SELECT id, alert_id, document_id, rank, contribution, emotion_match,
                    keyword_hits, highlights, created_at
             FROM alert_evidence
             WHERE alert_id = $1
             ORDER BY rank",
        )
        .bind(alert_id)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(Evidence::try_from).collect()
    }

    async fn append_audit(&mut self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_log (id, actor, action, entity_type, entity_id, meta, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(entry.id)
        .bind(&entry.actor)
        .bind(&entry.action)
        .bind(entry.entity_type.as_deref())
        .bind(entry.entity_id.as_deref())
        .bind(&entry.metadata)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn savepoint(&mut self) -> Result<()> {
        sqlx::query(&format!("SAVEPOINT {SAVEPOINT}"))
            .execute(&mut *self.tx)
            .await?;
        self.savepoint_open = true;
        Ok(())
    }

    async fn release_savepoint(&mut self) -> Result<()> {
        if !self.savepoint_open {
            return Err(StoreError::NoSavepoint);
        }
        sqlx::query(&format!("RELEASE SAVEPOINT {SAVEPOINT}"))
            .execute(&mut *self.tx)
            .await?;
        self.savepoint_open = false;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self) -> Result<()> {
        if !self.savepoint_open {
            return Err(StoreError::NoSavepoint);
        }
        sqlx::query(&format!("ROLLBACK TO SAVEPOINT {SAVEPOINT}"))
            .execute(&mut *self.tx)
            .await?;
        // ROLLBACK TO keeps the savepoint; release it so the next pair starts clean.
        sqlx::query(&format!("RELEASE SAVEPOINT {SAVEPOINT}"))
            .execute(&mut *self.tx)
            .await?;
        self.savepoint_open = false;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

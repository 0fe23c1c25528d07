//! Rule definition documents.
//!
//! An [`AlertRule`]'s `definition` is a free-form JSON object. The engine
//! only evaluates `"type": "risk_spike"`; every other field is optional and
//! falls back to the job-level [`SpikeDefaults`].
//!
//! ```json
//! {
//!   "type": "risk_spike",
//!   "metric": "negative_rate",
//!   "baseline_days": 30,
//!   "z_threshold": 3.5,
//!   "min_docs": 10,
//!   "keywords": ["refund", "cancel"],
//!   "top_k_evidence": 10
//! }
//! ```

use serde::{Deserialize, Serialize};

use moodwatch_core::config::JobConfig;
use moodwatch_core::{AlertRule, NEGATIVE_RATE};

/// Errors raised while interpreting a single rule definition.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("rule '{rule}': malformed definition: {source}")]
    Malformed {
        rule: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("rule '{rule}': unsupported metric '{metric}'")]
    UnsupportedMetric { rule: String, metric: String },

    #[error("rule '{rule}': {field} must be positive")]
    NonPositive { rule: String, field: &'static str },
}

/// Raw definition as stored. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    #[serde(rename = "type", default)]
    pub rule_type: Option<String>,
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default)]
    pub baseline_days: Option<u32>,
    #[serde(default)]
    pub z_threshold: Option<f64>,
    #[serde(default)]
    pub min_docs: Option<i64>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub top_k_evidence: Option<usize>,
}

impl RuleDefinition {
    /// Detector type named by the definition, if any.
    pub fn rule_type(value: &serde_json::Value) -> Option<&str> {
        value.get("type").and_then(serde_json::Value::as_str)
    }
}

/// Job-level parameters a rule definition may override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeDefaults {
    pub baseline_days: u32,
    pub z_threshold: f64,
    pub min_docs: i64,
    pub top_k_evidence: usize,
}

impl Default for SpikeDefaults {
    fn default() -> Self {
        JobConfig::default().into()
    }
}

impl From<JobConfig> for SpikeDefaults {
    fn from(c: JobConfig) -> Self {
        Self {
            baseline_days: c.baseline_days,
            z_threshold: c.z_threshold,
            min_docs: c.min_docs,
            top_k_evidence: c.top_k_evidence,
        }
    }
}

impl From<&JobConfig> for SpikeDefaults {
    fn from(c: &JobConfig) -> Self {
        c.clone().into()
    }
}

/// A `risk_spike` rule with every parameter resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskSpikeRule {
    pub rule_id: uuid::Uuid,
    pub rule_name: String,
    pub metric: String,
    pub baseline_days: u32,
    pub z_threshold: f64,
    pub min_docs: i64,
    pub keywords: Vec<String>,
    pub top_k_evidence: usize,
}

impl RiskSpikeRule {
    /// Resolve a stored rule against the job defaults.
    ///
    /// The caller has already checked the rule type; this only validates
    /// the remaining fields.
    pub fn resolve(rule: &AlertRule, defaults: &SpikeDefaults) -> Result<Self, RuleError> {
        let def: RuleDefinition =
            serde_json::from_value(rule.definition.clone()).map_err(|source| RuleError::Malformed {
                rule: rule.name.clone(),
                source,
            })?;

        let metric = def.metric.unwrap_or_else(|| NEGATIVE_RATE.to_string());
        if metric != NEGATIVE_RATE {
            return Err(RuleError::UnsupportedMetric {
                rule: rule.name.clone(),
                metric,
            });
        }

        let baseline_days = def.baseline_days.unwrap_or(defaults.baseline_days);
        if baseline_days == 0 {
            return Err(RuleError::NonPositive {
                rule: rule.name.clone(),
                field: "baseline_days",
            });
        }

        Ok(Self {
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            metric,
            baseline_days,
            z_threshold: def.z_threshold.unwrap_or(defaults.z_threshold),
            min_docs: def.min_docs.unwrap_or(defaults.min_docs),
            keywords: def.keywords,
            top_k_evidence: def.top_k_evidence.unwrap_or(defaults.top_k_evidence),
        })
    }
}

//! Spike detection, rule evaluation and evidence ranking.
//!
//! This crate provides:
//! - Rule definitions read from stored JSON, with job-level defaults
//! - A robust (median/MAD) negative-rate spike detector
//! - Keyword-aware evidence ranking for triggered alerts
//! - The rule engine job and a read-only spike report job
//! - Cron scheduling for the batch jobs and the `moodwatch-worker` binary

pub mod audit;
pub mod definition;
pub mod detector;
pub mod engine;
pub mod evidence;
pub mod scheduler;

pub use audit::{AuditAction, AuditRecorder, RunTotals};
pub use definition::{RiskSpikeRule, RuleDefinition, RuleError, SpikeDefaults};
pub use detector::{Detection, SkipReason, Spike, SpikeParams};
pub use engine::{detect_spikes, run_rules, run_rules_for, EngineError, RunSummary, SpikeReport};
pub use evidence::{select_evidence, KeywordMatcher};

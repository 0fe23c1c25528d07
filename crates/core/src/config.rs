use std::env;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    match profiled_env_opt(profile, key) {
        Some(v) => match v.parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                tracing::warn!(key, value = %v, "unparseable config value, using default");
                default
            }
        },
        None => default,
    }
}

/// Parse a comma-separated list of window sizes ("7,30,90").
fn parse_windows(raw: &str) -> Option<Vec<u32>> {
    raw.split(',')
        .map(|s| s.trim().parse::<u32>().ok())
        .collect::<Option<Vec<_>>>()
        .filter(|w| !w.is_empty())
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub postgres: PostgresConfig,
    pub jobs: JobConfig,
    pub schedule: ScheduleConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `MOODWATCH_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("MOODWATCH_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            postgres: PostgresConfig::from_env_profiled(p),
            jobs: JobConfig::from_env_profiled(p),
            schedule: ScheduleConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  postgres:    host={}, db={}", self.postgres.host, self.postgres.database);
        tracing::info!(
            "  jobs:        baseline_days={}, z_threshold={}, min_docs={}, windows={:?}",
            self.jobs.baseline_days,
            self.jobs.z_threshold,
            self.jobs.min_docs,
            self.jobs.rolling_windows
        );
        tracing::info!(
            "  schedule:    daily='{}' rolling='{}' detect='{}' rules='{}'",
            self.schedule.daily_cron,
            self.schedule.rolling_cron,
            self.schedule.detect_cron,
            self.schedule.rules_cron
        );
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Full connection URL; takes precedence over the discrete fields.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            url: profiled_env_opt(p, "DATABASE_URL"),
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_parse(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "moodwatch"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_parse(p, "PG_MAX_CONNECTIONS", 5),
        }
    }

    pub fn connection_string(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }
}

// ── Job defaults ──────────────────────────────────────────────

/// Defaults applied when a job argument or rule definition field is omitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobConfig {
    pub baseline_days: u32,
    pub z_threshold: f64,
    pub min_docs: i64,
    pub top_k_evidence: usize,
    pub rolling_windows: Vec<u32>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            baseline_days: 30,
            z_threshold: 3.5,
            min_docs: 10,
            top_k_evidence: 10,
            rolling_windows: vec![7, 30, 90],
        }
    }
}

impl JobConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        let rolling_windows = profiled_env_opt(p, "ROLLING_WINDOWS")
            .and_then(|raw| {
                let parsed = parse_windows(&raw);
                if parsed.is_none() {
                    tracing::warn!(value = %raw, "invalid ROLLING_WINDOWS, using default");
                }
                parsed
            })
            .unwrap_or(d.rolling_windows);
        Self {
            baseline_days: profiled_env_parse(p, "BASELINE_DAYS", d.baseline_days),
            z_threshold: profiled_env_parse(p, "Z_THRESHOLD", d.z_threshold),
            min_docs: profiled_env_parse(p, "MIN_DOCS", d.min_docs),
            top_k_evidence: profiled_env_parse(p, "TOP_K_EVIDENCE", d.top_k_evidence),
            rolling_windows,
        }
    }
}

// ── Schedule ──────────────────────────────────────────────────

/// 5-field UTC cron expressions for the four batch jobs.
///
/// The defaults stagger each job ten minutes after its upstream dependency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleConfig {
    pub daily_cron: String,
    pub rolling_cron: String,
    pub detect_cron: String,
    pub rules_cron: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            daily_cron: "10 0 * * *".to_string(),
            rolling_cron: "20 0 * * *".to_string(),
            detect_cron: "30 0 * * *".to_string(),
            rules_cron: "40 0 * * *".to_string(),
        }
    }
}

impl ScheduleConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            daily_cron: profiled_env_or(p, "DAILY_CRON", &d.daily_cron),
            rolling_cron: profiled_env_or(p, "ROLLING_CRON", &d.rolling_cron),
            detect_cron: profiled_env_or(p, "DETECT_CRON", &d.detect_cron),
            rules_cron: profiled_env_or(p, "RULES_CRON", &d.rules_cron),
        }
    }
}

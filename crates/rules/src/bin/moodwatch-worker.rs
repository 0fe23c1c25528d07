//! moodwatch-worker: runs the batch jobs against PostgreSQL.
//!
//! One-shot commands print the job's JSON summary:
//! - `moodwatch-worker daily [--day YYYY-MM-DD]`
//! - `moodwatch-worker rolling [--day YYYY-MM-DD] [--windows 7,30,90]`
//! - `moodwatch-worker detect [--day YYYY-MM-DD] [spike flags]`
//! - `moodwatch-worker rules [--day YYYY-MM-DD] [spike flags]`
//!
//! Spike flags (`--baseline-days`, `--z-threshold`, `--min-docs`) override
//! `BASELINE_DAYS`, `Z_THRESHOLD` and `MIN_DOCS` for that run.
//!
//! `moodwatch-worker serve` runs the cron scheduler loop until Ctrl-C.

use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use moodwatch_aggregate::{compute_daily, compute_rolling};
use moodwatch_core::config::{load_dotenv, JobConfig};
use moodwatch_core::Config;
use moodwatch_rules::detector::SpikeParams;
use moodwatch_rules::scheduler::{JobKind, JobScheduler};
use moodwatch_rules::{detect_spikes, run_rules, SpikeDefaults};
use moodwatch_store::{init_pg_pool, PgStore, Store};

// ── CLI ─────────────────────────────────────────────────────────────

/// Negative-sentiment aggregation and spike alerting jobs.
#[derive(Parser, Debug)]
#[command(name = "moodwatch-worker", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recompute daily aggregates.
    Daily {
        /// UTC day (YYYY-MM-DD). Defaults to yesterday.
        #[arg(long)]
        day: Option<String>,
    },
    /// Recompute rolling window aggregates.
    Rolling {
        /// As-of UTC day (YYYY-MM-DD). Defaults to yesterday.
        #[arg(long)]
        day: Option<String>,
        /// Window sizes in days. Defaults to ROLLING_WINDOWS.
        #[arg(long, value_delimiter = ',')]
        windows: Vec<u32>,
    },
    /// Report negative-rate spikes without persisting them.
    Detect {
        #[arg(long)]
        day: Option<String>,
        #[command(flatten)]
        spike: SpikeArgs,
    },
    /// Run the rule engine and regenerate alerts.
    Rules {
        #[arg(long)]
        day: Option<String>,
        #[command(flatten)]
        spike: SpikeArgs,
    },
    /// Run all jobs on their cron schedules.
    Serve {
        /// Scheduler tick interval in seconds.
        #[arg(long, env = "MOODWATCH_TICK_SECS", default_value_t = 60)]
        tick_secs: u64,
    },
}

/// Per-invocation overrides of the detector defaults from the environment.
/// Rule definitions still take precedence for `rules`.
#[derive(Args, Debug, Default, Clone, PartialEq)]
struct SpikeArgs {
    /// Trailing days used as the baseline.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    baseline_days: Option<u32>,
    /// Robust z-score needed to trigger.
    #[arg(long)]
    z_threshold: Option<f64>,
    /// Minimum documents per segment and day.
    #[arg(long)]
    min_docs: Option<i64>,
}

impl SpikeArgs {
    fn apply(&self, jobs: &JobConfig) -> JobConfig {
        let mut jobs = jobs.clone();
        if let Some(v) = self.baseline_days {
            jobs.baseline_days = v;
        }
        if let Some(v) = self.z_threshold {
            jobs.z_threshold = v;
        }
        if let Some(v) = self.min_docs {
            jobs.min_docs = v;
        }
        jobs
    }
}

// ── Jobs ────────────────────────────────────────────────────────────

fn spike_params(jobs: &JobConfig) -> SpikeParams {
    SpikeParams {
        baseline_days: jobs.baseline_days,
        z_threshold: jobs.z_threshold,
        min_docs: jobs.min_docs,
    }
}

async fn run_job(
    store: &dyn Store,
    jobs: &JobConfig,
    job: JobKind,
    day: Option<&str>,
    windows: Option<&[u32]>,
) -> anyhow::Result<serde_json::Value> {
    let summary = match job {
        JobKind::Daily => serde_json::to_value(compute_daily(store, day).await?)?,
        JobKind::Rolling => {
            let windows = windows.or(Some(jobs.rolling_windows.as_slice()));
            serde_json::to_value(compute_rolling(store, day, windows).await?)?
        }
        JobKind::Detect => serde_json::to_value(detect_spikes(store, day, &spike_params(jobs)).await?)?,
        JobKind::Rules => serde_json::to_value(run_rules(store, day, &SpikeDefaults::from(jobs)).await?)?,
    };
    Ok(summary)
}

/// Tick until Ctrl-C. A failed job is not recorded, so it and the jobs
/// that depend on it are retried on the next tick.
async fn serve(store: &dyn Store, config: &Config, tick: Duration) -> anyhow::Result<()> {
    let mut scheduler = JobScheduler::from_config(&config.schedule);
    let mut interval = tokio::time::interval(tick);
    info!(tick_secs = tick.as_secs(), "scheduler started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = Utc::now();
                for job in scheduler.due_jobs(now) {
                    match run_job(store, &config.jobs, job, None, None).await {
                        Ok(summary) => {
                            info!(%job, %summary, "job finished");
                            scheduler.record_trigger_at(job, now);
                        }
                        Err(e) => {
                            error!(%job, error = %e, "job failed; downstream jobs deferred");
                            break;
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }
    Ok(())
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_summary();

    let pool = init_pg_pool(&config.postgres)
        .await
        .context("failed to connect to PostgreSQL")?;
    let store = PgStore::new(pool);

    let (job, day, windows, spike) = match cli.command {
        Command::Serve { tick_secs } => {
            serve(&store, &config, Duration::from_secs(tick_secs.max(1))).await?;
            info!("moodwatch-worker exited cleanly");
            return Ok(());
        }
        Command::Daily { day } => (JobKind::Daily, day, Vec::new(), SpikeArgs::default()),
        Command::Rolling { day, windows } => (JobKind::Rolling, day, windows, SpikeArgs::default()),
        Command::Detect { day, spike } => (JobKind::Detect, day, Vec::new(), spike),
        Command::Rules { day, spike } => (JobKind::Rules, day, Vec::new(), spike),
    };

    let jobs = spike.apply(&config.jobs);
    let windows = (!windows.is_empty()).then_some(windows.as_slice());
    let summary = run_job(&store, &jobs, job, day.as_deref(), windows)
        .await
        .with_context(|| format!("{job} job failed"))?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

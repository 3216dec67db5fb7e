//! fxsignal CLI: layer maintenance, inference and the daily run.
//!
//! Commands:
//! - `ingest`: fetch observations into bronze snapshots
//! - `silver` / `gold`: merge pending upstream data into the next layer
//! - `infer`: score the configured gold series into the decision parquet
//! - `daily`: the full daily run with optional publish and notify
//! - `latest`: per-pair latest artifacts, or show one pair
//!
//! Logs go to stderr (`RUST_LOG`, default `info`); stdout carries only the
//! result line.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use fxsignal_core::data::bronze::{ingest_series, IngestWindow, DEFAULT_LOOKBACK_DAYS};
use fxsignal_core::data::gold::merge_silver_to_gold;
use fxsignal_core::data::silver::merge_bronze_to_silver;
use fxsignal_core::data::valet::{RetryPolicy, ValetProvider};
use fxsignal_core::data::{DataError, LayerKeys, LocalStore, MergeOutcome, ObjectStore};
use fxsignal_runner::inference::{run_inference, InferenceOptions, PREDICTIONS_FILE};
use fxsignal_runner::latest::artifact_json;
use fxsignal_runner::manifest::git_sha;
use fxsignal_runner::model::load_model_artifacts;
use fxsignal_runner::run_date::{parse_run_date, toronto_today};
use fxsignal_runner::{
    build_all_latest, run_daily, DailyOptions, LatestReader, PipelineConfig, DEFAULT_LIMIT_ROWS,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fxsignal", about = "fxsignal: daily FX direction signals")]
struct Cli {
    /// Pipeline config (TOML).
    #[arg(long, global = true, default_value = "config/pipeline.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch observations from the rate provider into bronze.
    Ingest {
        /// Series to fetch. Defaults to every configured series.
        #[arg(long = "series")]
        series: Vec<String>,

        /// Backfill from this date (YYYY-MM-DD) instead of the lookback window.
        #[arg(long)]
        backfill_start: Option<String>,

        /// Backfill end date (YYYY-MM-DD). Defaults to today.
        #[arg(long, requires = "backfill_start")]
        backfill_end: Option<String>,

        /// Trailing window for incremental ingest.
        #[arg(long, default_value_t = DEFAULT_LOOKBACK_DAYS)]
        lookback_days: i64,

        /// Provider base URL override.
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Merge pending bronze snapshots into silver partitions.
    Silver {
        /// Ignore the watermark and rebuild from every snapshot.
        #[arg(long, default_value_t = false)]
        full_refresh: bool,
    },
    /// Merge new silver partitions into the gold series files.
    Gold {
        /// Ignore the watermark and rebuild from all of silver.
        #[arg(long, default_value_t = false)]
        full_refresh: bool,
    },
    /// Score the configured gold series.
    Infer {
        /// Output parquet. Defaults to today's run directory.
        #[arg(long)]
        out: Option<PathBuf>,

        /// Validate and score without writing.
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Decision threshold override.
        #[arg(long)]
        threshold: Option<f64>,

        /// Model artifact directory override.
        #[arg(long)]
        models_dir: Option<PathBuf>,
    },
    /// Run the daily pipeline.
    Daily {
        /// Run date (YYYY-MM-DD). Defaults to today in America/Toronto.
        #[arg(long)]
        run_date: Option<String>,

        /// Pull gold files from the object store first.
        #[arg(long, default_value_t = false)]
        sync_gold: bool,

        /// Publish run and latest outputs.
        #[arg(long, default_value_t = false)]
        publish: bool,

        /// Send the signal notification.
        #[arg(long, default_value_t = false)]
        notify: bool,

        /// Model artifact directory override.
        #[arg(long)]
        models_dir: Option<PathBuf>,
    },
    /// Write per-pair latest artifacts from a decision parquet.
    Latest {
        /// Decision parquet. Defaults to the promoted one in `latest_dir`.
        #[arg(long)]
        predictions: Option<PathBuf>,

        /// Output directory. Defaults to `latest_dir`.
        #[arg(long)]
        target_dir: Option<PathBuf>,

        /// Most recent rows kept per pair.
        #[arg(long, default_value_t = DEFAULT_LIMIT_ROWS)]
        limit: usize,

        /// Print the artifact for one pair (e.g. USD_CAD) instead of writing.
        #[arg(long)]
        show: Option<String>,
    },
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(line) => {
            println!("{line}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("[FAIL] {e:#}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<String> {
    let cfg = PipelineConfig::load(&cli.config)?;

    match cli.command {
        Commands::Ingest {
            series,
            backfill_start,
            backfill_end,
            lookback_days,
            base_url,
        } => run_ingest(&cfg, series, backfill_start, backfill_end, lookback_days, base_url),
        Commands::Silver { full_refresh } => {
            run_merge(&cfg, "silver", full_refresh, merge_bronze_to_silver)
        }
        Commands::Gold { full_refresh } => {
            run_merge(&cfg, "gold", full_refresh, merge_silver_to_gold)
        }
        Commands::Infer {
            out,
            dry_run,
            threshold,
            models_dir,
        } => run_infer(&cfg, out, dry_run, threshold, models_dir),
        Commands::Daily {
            run_date,
            sync_gold,
            publish,
            notify,
            models_dir,
        } => {
            let opts = DailyOptions {
                run_date,
                sync_gold,
                publish,
                notify,
                models_dir,
            };
            Ok(run_daily(&cfg, &opts, Utc::now())?.summary_line())
        }
        Commands::Latest {
            predictions,
            target_dir,
            limit,
            show,
        } => run_latest(&cfg, predictions, target_dir, limit, show),
    }
}

fn parse_date(flag: &str, text: &str) -> Result<NaiveDate> {
    parse_run_date(text).with_context(|| format!("--{flag}"))
}

fn run_ingest(
    cfg: &PipelineConfig,
    series: Vec<String>,
    backfill_start: Option<String>,
    backfill_end: Option<String>,
    lookback_days: i64,
    base_url: Option<String>,
) -> Result<String> {
    if lookback_days < 0 {
        bail!("--lookback-days must not be negative");
    }
    let window = match backfill_start {
        Some(start) => IngestWindow::Backfill {
            start: parse_date("backfill-start", &start)?,
            end: backfill_end
                .map(|end| parse_date("backfill-end", &end))
                .transpose()?,
        },
        None => IngestWindow::Incremental { lookback_days },
    };
    let series = if series.is_empty() { cfg.series_ids() } else { series };

    let mut provider = ValetProvider::new(RetryPolicy::default())?;
    if let Some(url) = base_url {
        provider = provider.with_base_url(url);
    }
    let store = LocalStore::new(&cfg.storage.root);
    let report = ingest_series(&provider, &store, &series, window, Utc::now());

    for snapshot in &report.snapshots {
        tracing::info!(
            series_id = %snapshot.series_id,
            key = %snapshot.payload_key,
            observations = snapshot.observation_count,
            "snapshot written"
        );
    }
    if report.snapshots.is_empty() && !report.errors.is_empty() {
        let failed: Vec<String> = report
            .errors
            .iter()
            .map(|(id, e)| format!("{id}: {e}"))
            .collect();
        bail!("every series failed to ingest: {}", failed.join("; "));
    }
    let failed: Vec<&str> = report.errors.iter().map(|(id, _)| id.as_str()).collect();
    Ok(format!(
        "[OK] ingested={} failed={}",
        report.snapshots.len(),
        if failed.is_empty() { "-".to_string() } else { failed.join(",") }
    ))
}

type MergeFn =
    fn(&dyn ObjectStore, &LayerKeys, bool, DateTime<Utc>) -> Result<MergeOutcome, DataError>;

fn run_merge(
    cfg: &PipelineConfig,
    layer: &str,
    full_refresh: bool,
    merge: MergeFn,
) -> Result<String> {
    let store = LocalStore::new(&cfg.storage.root);
    let now = Utc::now();
    let mut rows = 0;
    for series_id in cfg.series_ids() {
        let keys = LayerKeys::new(cfg.storage.source.as_str(), series_id.as_str());
        let outcome = merge(&store, &keys, full_refresh, now)
            .with_context(|| format!("{layer} merge failed for {series_id}"))?;
        tracing::info!(%outcome, "merge finished");
        rows += outcome.rows_written;
    }
    Ok(format!("[OK] layer={layer} series={} rows={rows}", cfg.series.len()))
}

fn run_infer(
    cfg: &PipelineConfig,
    out: Option<PathBuf>,
    dry_run: bool,
    threshold: Option<f64>,
    models_dir: Option<PathBuf>,
) -> Result<String> {
    let models_dir = models_dir.unwrap_or_else(|| cfg.artifacts.dir.clone());
    let loaded = load_model_artifacts(&models_dir, &cfg.artifact_names())
        .with_context(|| format!("Failed to load model artifacts from {}", models_dir.display()))?;
    let out = out.unwrap_or_else(|| {
        let today = toronto_today(Utc::now()).format("%Y-%m-%d").to_string();
        cfg.run_dir(&today).join(PREDICTIONS_FILE)
    });

    let summary = run_inference(
        &cfg.series_inputs(),
        &loaded.model,
        &loaded.spec,
        &out,
        InferenceOptions {
            threshold: threshold.unwrap_or(cfg.threshold),
            dry_run,
        },
    )?;
    let date = |d: Option<NaiveDate>| d.map_or_else(|| "-".to_string(), |d| d.to_string());
    Ok(format!(
        "[OK] rows={} range={}..{} out={}",
        summary.rows,
        date(summary.min_obs_date),
        date(summary.max_obs_date),
        summary
            .written
            .as_deref()
            .map_or_else(|| "(dry-run)".to_string(), |p| p.display().to_string())
    ))
}

fn run_latest(
    cfg: &PipelineConfig,
    predictions: Option<PathBuf>,
    target_dir: Option<PathBuf>,
    limit: usize,
    show: Option<String>,
) -> Result<String> {
    let target_dir = target_dir.unwrap_or_else(|| cfg.outputs.latest_dir.clone());

    if let Some(pair) = show {
        let reader = LatestReader::new(&target_dir, Duration::from_secs(60));
        let artifact = reader.artifact(&pair)?;
        return artifact_json(&artifact);
    }

    if limit == 0 {
        bail!("--limit must be positive");
    }
    let predictions = predictions.unwrap_or_else(|| cfg.outputs.latest_dir.join(PREDICTIONS_FILE));
    let written = build_all_latest(
        &predictions,
        &target_dir,
        &git_sha(),
        limit,
        cfg.threshold,
        Utc::now(),
    )?;
    Ok(format!("[OK] pairs={} dir={}", written.len(), target_dir.display()))
}

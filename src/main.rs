//! roadsnap - GPS trace road-type classifier
//!
//! Parses positioning logs or KML route markup, snaps every point to the
//! nearest road via OSRM and labels the sequence as highway or service road
//! with a two-state Gaussian HMM.
//!
//! Module structure:
//! - `domain/` - Records, points, error kinds
//! - `io/` - Parsers, CSV, OSRM client, egress sinks
//! - `services/` - Snap pool, classifier, pipeline
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use roadsnap::domain::types::SnappedPoint;
use roadsnap::infra::{Config, Metrics};
use roadsnap::io::{
    position_log, route_markup, tabular, CsvEgress, JsonlEgress, MultiSink, OsrmClient,
    OsrmConfig, PointSink,
};
use roadsnap::services::{Pipeline, SequenceClassifier, SnapPool, TraceSource};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const CLEANED_POSITIONS_FILE: &str = "cleaned_pos_data.csv";
const CLEANED_ROUTE_FILE: &str = "cleaned_kml_data.csv";

/// roadsnap - snap GPS traces to roads and classify road type
#[derive(Parser, Debug)]
#[command(name = "roadsnap", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Override the routing service base URL
    #[arg(long, global = true)]
    base_url: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Clean a positioning log and/or KML route into CSV
    Extract {
        /// Positioning log (.pos)
        #[arg(long)]
        pos: Option<PathBuf>,

        /// KML route markup
        #[arg(long)]
        kml: Option<PathBuf>,

        /// Output directory (defaults to output.dir)
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// Snap every row of a latitude/longitude CSV to the nearest road
    Snap {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Classify an already-snapped CSV
    Classify {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Also write JSONL records for the map renderer
        #[arg(long)]
        jsonl: Option<PathBuf>,
    },

    /// Full pipeline: parse, snap, classify, write outputs
    Run {
        /// Trace file (defaults to input.trace_file); .kml is route markup
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Default: INFO, use RUST_LOG=debug for per-request visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let run_id = Uuid::now_v7().to_string();

    info!(
        version = %env!("CARGO_PKG_VERSION"),
        git_hash = %env!("GIT_HASH"),
        run_id = %run_id,
        "roadsnap_starting"
    );

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(url) = &cli.base_url {
        config = config.with_snap_base_url(url);
    }

    info!(
        config_file = %config.config_file(),
        snap_base_url = %config.snap_base_url(),
        snap_profile = %config.snap_profile(),
        snap_concurrency = %config.snap_concurrency(),
        snap_max_retries = %config.snap_max_retries(),
        label_policy = %config.classifier().label_policy,
        output_dir = %config.output_dir(),
        "config_loaded"
    );

    let metrics = Arc::new(Metrics::new());

    let result = match cli.command {
        Commands::Extract { pos, kml, out_dir } => {
            let out_dir = out_dir.unwrap_or_else(|| PathBuf::from(config.output_dir()));
            extract(pos.as_deref(), kml.as_deref(), &out_dir, config.route_namespace(), &metrics)
        }
        Commands::Snap { input, output } => {
            let reporter = spawn_metrics_reporter(metrics.clone(), config.metrics_interval_secs());
            let result = snap(&config, &metrics, &input, &output).await;
            stop(reporter);
            result
        }
        Commands::Classify { input, output, jsonl } => {
            classify(&config, &metrics, &input, &output, jsonl.as_deref(), &run_id)
        }
        Commands::Run { input } => {
            let reporter = spawn_metrics_reporter(metrics.clone(), config.metrics_interval_secs());
            let result = run(&config, &metrics, input, &run_id).await;
            stop(reporter);
            result
        }
    };

    metrics.report().log();
    match &result {
        Ok(()) => info!(run_id = %run_id, "roadsnap_finished"),
        Err(e) => tracing::error!(run_id = %run_id, error = %format!("{e:#}"), "roadsnap_failed"),
    }
    result
}

/// Periodic metrics summary while network work is in flight
fn spawn_metrics_reporter(metrics: Arc<Metrics>, interval_secs: u64) -> Option<JoinHandle<()>> {
    if interval_secs == 0 {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        // First tick fires immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics.report().log();
        }
    }))
}

fn stop(reporter: Option<JoinHandle<()>>) {
    if let Some(handle) = reporter {
        handle.abort();
    }
}

fn build_pool(config: &Config, metrics: &Arc<Metrics>) -> Result<SnapPool> {
    let client = OsrmClient::new(OsrmConfig::from_config(config), metrics.clone())?;
    Ok(SnapPool::new(Arc::new(client), config.snap_concurrency(), metrics.clone()))
}

fn extract(
    pos: Option<&Path>,
    kml: Option<&Path>,
    out_dir: &Path,
    namespace: &str,
    metrics: &Metrics,
) -> Result<()> {
    if pos.is_none() && kml.is_none() {
        bail!("extract needs --pos and/or --kml");
    }

    if let Some(path) = pos {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let records = position_log::parse_position_log(&text);
        metrics.record_parsed(records.len() as u64);
        let rows = tabular::write_records_to_path(&out_dir.join(CLEANED_POSITIONS_FILE), &records)?;
        info!(source = %path.display(), records = %rows, "positions_extracted");
    }

    if let Some(path) = kml {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let coordinates = route_markup::parse_route_markup_ns(&text, namespace)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        metrics.record_parsed(coordinates.len() as u64);
        let rows = tabular::write_records_to_path(&out_dir.join(CLEANED_ROUTE_FILE), &coordinates)?;
        info!(source = %path.display(), coordinates = %rows, "route_extracted");
    }

    Ok(())
}

async fn snap(config: &Config, metrics: &Arc<Metrics>, input: &Path, output: &Path) -> Result<()> {
    let points = tabular::read_geo_points_from_path(input)?;
    metrics.record_parsed(points.len() as u64);

    let pool = build_pool(config, metrics)?;
    let outcome = pool.snap_all(&points).await;
    tabular::write_records_to_path(output, &outcome.snapped)?;
    Ok(())
}

fn classify(
    config: &Config,
    metrics: &Metrics,
    input: &Path,
    output: &Path,
    jsonl: Option<&Path>,
    run_id: &str,
) -> Result<()> {
    let points = tabular::read_geo_points_from_path(input)?;
    metrics.record_parsed(points.len() as u64);

    // Input is already on the road network
    let snapped: Vec<SnappedPoint> =
        points.iter().map(|&point| SnappedPoint::new(point, point, Some(0.0))).collect();

    let classification = SequenceClassifier::new(config.classifier().clone())
        .classify(&snapped)
        .with_context(|| format!("failed to classify {}", input.display()))?;
    metrics.record_classified(classification.points.len() as u64);

    CsvEgress::new(output).deliver(&classification.points)?;
    if let Some(path) = jsonl {
        JsonlEgress::new(path, run_id).deliver(&classification.points)?;
    }
    Ok(())
}

async fn run(
    config: &Config,
    metrics: &Arc<Metrics>,
    input: Option<PathBuf>,
    run_id: &str,
) -> Result<()> {
    let trace = input
        .or_else(|| config.trace_file().map(PathBuf::from))
        .context("no trace file: pass --input or set input.trace_file")?;
    let source = TraceSource::from_path(&trace, config.route_namespace())?;

    let pipeline = Pipeline::new(
        build_pool(config, metrics)?,
        SequenceClassifier::new(config.classifier().clone()),
        metrics.clone(),
    )
    .with_snapped_output(config.snapped_path());

    let mut csv = CsvEgress::new(config.classified_path());
    let mut jsonl = config.egress_path().map(|path| JsonlEgress::new(path, run_id));

    let mut sinks: Vec<&mut dyn PointSink> = vec![&mut csv];
    if let Some(jsonl) = jsonl.as_mut() {
        sinks.push(jsonl);
    }
    let mut sink = MultiSink::new(sinks);

    let report = pipeline
        .run(&source, &mut sink)
        .await
        .with_context(|| format!("pipeline failed for {}", trace.display()))?;

    info!(
        trace = %trace.display(),
        classified = %report.points_classified,
        dropped = %report.snap_failures,
        iterations = %report.fit_iterations,
        converged = %report.fit_converged,
        classified_file = %config.classified_path().display(),
        "run_complete"
    );
    Ok(())
}

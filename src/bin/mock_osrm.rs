//! Mock OSRM `nearest` service
//!
//! Stands in for a routing backend during local runs.
//!
//! Behavior:
//! 1. Listens on a configurable port (default 5000)
//! 2. `GET /nearest/v1/{profile}/{lon},{lat}` snaps the query to a grid
//! 3. Latitudes beyond ±85° answer `NoSegment`
//! 4. `--fail-first` / `--fail-every` inject failures to exercise retries
//!
//! Usage:
//!   cargo run --bin mock-osrm -- --port 5000 --fail-every 10
//!   roadsnap --base-url http://localhost:5000 run --input trace.pos

use clap::Parser;
use roadsnap::io::{start_nearest_server, NearestServerConfig, NearestServerStats};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mock-osrm")]
#[command(about = "Mock OSRM nearest service for local runs")]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "5000")]
    port: u16,

    /// Grid spacing in degrees
    #[arg(long, default_value = "0.001")]
    grid_deg: f64,

    /// Fail the first N requests
    #[arg(long, default_value = "0")]
    fail_first: u64,

    /// Fail every Nth request (0 disables)
    #[arg(long, default_value = "0")]
    fail_every: u64,

    /// HTTP status for injected failures
    #[arg(long, default_value = "503")]
    fail_status: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = NearestServerConfig {
        grid_deg: args.grid_deg,
        fail_first: args.fail_first,
        fail_every: args.fail_every,
        fail_status: args.fail_status,
    };

    let listener = TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;
    let stats = Arc::new(NearestServerStats::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server_stats = stats.clone();
    let server = tokio::spawn(async move {
        start_nearest_server(listener, config, server_stats, shutdown_rx).await
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);
    server.await??;

    info!(
        requests = %stats.requests(),
        failures_injected = %stats.failures_injected(),
        "mock_osrm_stopped"
    );
    Ok(())
}

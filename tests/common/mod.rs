//! Shared helpers: in-process `nearest` stub and client construction
#![allow(dead_code)]

use roadsnap::infra::Metrics;
use roadsnap::io::{
    start_nearest_server, NearestServerConfig, NearestServerStats, OsrmClient, OsrmConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Running stub; shuts down when dropped
pub struct StubServer {
    pub base_url: String,
    pub stats: Arc<NearestServerStats>,
    shutdown: watch::Sender<bool>,
}

impl Drop for StubServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

pub async fn start_stub(config: NearestServerConfig) -> StubServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stats = Arc::new(NearestServerStats::default());
    let (shutdown, shutdown_rx) = watch::channel(false);

    let server_stats = stats.clone();
    tokio::spawn(async move {
        let _ = start_nearest_server(listener, config, server_stats, shutdown_rx).await;
    });

    StubServer { base_url: format!("http://{}", addr), stats, shutdown }
}

pub fn client_config(base_url: &str, max_retries: u32) -> OsrmConfig {
    OsrmConfig {
        base_url: base_url.to_string(),
        profile: "driving".to_string(),
        timeout: Duration::from_secs(2),
        max_retries,
        backoff_base: Duration::from_millis(10),
        backoff_max: Duration::from_millis(40),
    }
}

pub fn client(base_url: &str, max_retries: u32) -> (OsrmClient, Arc<Metrics>) {
    let metrics = Arc::new(Metrics::new());
    (client_with_metrics(base_url, max_retries, metrics.clone()), metrics)
}

/// Client recording into a caller-owned `Metrics`, shared with the pool under test
pub fn client_with_metrics(base_url: &str, max_retries: u32, metrics: Arc<Metrics>) -> OsrmClient {
    OsrmClient::new(client_config(base_url, max_retries), metrics).unwrap()
}

//! OSRM `nearest` client
//!
//! One GET per point against `{base_url}/nearest/v1/{profile}/{lon},{lat}`.
//! Transient failures (transport, 429, 5xx) are retried with exponential
//! backoff; everything else is returned to the caller on the first attempt.

use crate::domain::error::SnapFailure;
use crate::domain::types::{GeoPoint, SnappedPoint};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::snapper::RoadSnapper;
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct OsrmConfig {
    /// Service root, no trailing slash
    pub base_url: String,
    pub profile: String,
    pub timeout: Duration,
    /// Extra attempts after the first for transient failures
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl OsrmConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.snap_base_url().to_string(),
            profile: config.snap_profile().to_string(),
            timeout: config.snap_timeout(),
            max_retries: config.snap_max_retries(),
            backoff_base: config.snap_backoff_base(),
            backoff_max: config.snap_backoff_max(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NearestResponse {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    waypoints: Vec<Waypoint>,
}

#[derive(Debug, Deserialize)]
struct Waypoint {
    /// `[lon, lat]`
    location: [f64; 2],
    #[serde(default)]
    distance: Option<f64>,
}

/// Interpret a `nearest` response body for `query`
pub fn parse_nearest_response(body: &[u8], query: GeoPoint) -> Result<SnappedPoint, SnapFailure> {
    let response: NearestResponse =
        serde_json::from_slice(body).map_err(|e| SnapFailure::MalformedBody(e.to_string()))?;

    match response.code.as_deref() {
        None | Some("Ok") => {}
        Some("NoSegment") => return Err(SnapFailure::NoMatch),
        Some(code) => {
            return Err(SnapFailure::MalformedBody(format!(
                "response code {}: {}",
                code,
                response.message.as_deref().unwrap_or("")
            )))
        }
    }

    let waypoint = response.waypoints.into_iter().next().ok_or(SnapFailure::NoMatch)?;
    let [longitude, latitude] = waypoint.location;
    Ok(SnappedPoint::new(GeoPoint::new(latitude, longitude), query, waypoint.distance))
}

pub struct OsrmClient {
    http: reqwest::Client,
    config: OsrmConfig,
    metrics: Arc<Metrics>,
}

impl OsrmClient {
    pub fn new(config: OsrmConfig, metrics: Arc<Metrics>) -> anyhow::Result<Self> {
        // Built once so connections are pooled across points
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("roadsnap/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build routing HTTP client")?;

        debug!(
            base_url = %config.base_url,
            profile = %config.profile,
            timeout_ms = %config.timeout.as_millis(),
            max_retries = %config.max_retries,
            "osrm_client_created"
        );

        Ok(Self { http, config, metrics })
    }

    pub fn nearest_url(&self, point: GeoPoint) -> String {
        format!(
            "{}/nearest/v1/{}/{},{}",
            self.config.base_url, self.config.profile, point.longitude, point.latitude
        )
    }

    /// Delay before retry number `attempt + 1`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.config
            .backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.config.backoff_max)
    }

    async fn request_once(&self, point: GeoPoint) -> Result<SnappedPoint, SnapFailure> {
        let start = Instant::now();
        let result = self.fetch(point).await;
        self.metrics.record_snap_request(start.elapsed().as_millis() as u64);
        let body = result?;
        parse_nearest_response(&body, point)
    }

    async fn fetch(&self, point: GeoPoint) -> Result<bytes::Bytes, SnapFailure> {
        let response = self
            .http
            .get(self.nearest_url(point))
            .send()
            .await
            .map_err(|e| SnapFailure::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::BAD_REQUEST {
            // OSRM answers 400 with code NoSegment when nothing is in range
            let body = response.bytes().await.unwrap_or_default();
            return Err(match parse_nearest_response(&body, point) {
                Err(SnapFailure::NoMatch) => SnapFailure::NoMatch,
                _ => SnapFailure::Status(status.as_u16()),
            });
        }
        if status != reqwest::StatusCode::OK {
            return Err(SnapFailure::Status(status.as_u16()));
        }

        response.bytes().await.map_err(|e| SnapFailure::Transport(e.to_string()))
    }
}

#[async_trait]
impl RoadSnapper for OsrmClient {
    async fn snap_to_nearest_road(&self, point: GeoPoint) -> Result<SnappedPoint, SnapFailure> {
        let mut attempt = 0;
        loop {
            match self.request_once(point).await {
                Ok(snapped) => return Ok(snapped),
                Err(failure) if failure.is_transient() && attempt < self.config.max_retries => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        point = %point,
                        attempt = %(attempt + 1),
                        delay_ms = %delay.as_millis(),
                        error = %failure,
                        "snap_retry"
                    );
                    self.metrics.record_snap_retry();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(failure) => return Err(failure),
            }
        }
    }
}

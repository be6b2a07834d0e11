//! Local stand-in for the OSRM `nearest` service
//!
//! Serves `GET /nearest/v1/{profile}/{lon},{lat}` by snapping the query to
//! a regular grid. Can be told to fail requests so the client retry path
//! can be exercised without a real routing backend.
//! Uses hyper for the HTTP server.

use crate::domain::types::GeoPoint;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Beyond this latitude the stub reports `NoSegment`
const MAX_ROAD_LATITUDE: f64 = 85.0;

#[derive(Debug, Clone)]
pub struct NearestServerConfig {
    /// Grid spacing in degrees; snapped points land on multiples of it
    pub grid_deg: f64,
    /// Fail the first N requests
    pub fail_first: u64,
    /// Fail every Nth request (0 disables)
    pub fail_every: u64,
    /// Status used for injected failures
    pub fail_status: u16,
}

impl Default for NearestServerConfig {
    fn default() -> Self {
        Self { grid_deg: 0.001, fail_first: 0, fail_every: 0, fail_status: 503 }
    }
}

impl NearestServerConfig {
    fn should_fail(&self, request_number: u64) -> bool {
        request_number <= self.fail_first
            || (self.fail_every > 0 && request_number % self.fail_every == 0)
    }
}

#[derive(Debug, Default)]
pub struct NearestServerStats {
    requests: AtomicU64,
    failures_injected: AtomicU64,
}

impl NearestServerStats {
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn failures_injected(&self) -> u64 {
        self.failures_injected.load(Ordering::Relaxed)
    }
}

fn snap_to_grid(value: f64, grid: f64) -> f64 {
    if grid > 0.0 {
        (value / grid).round() * grid
    } else {
        value
    }
}

/// `/nearest/v1/{profile}/{lon},{lat}` -> query point
fn parse_nearest_path(path: &str) -> Option<GeoPoint> {
    let rest = path.strip_prefix("/nearest/v1/")?;
    let (_profile, coordinates) = rest.split_once('/')?;
    let coordinates = coordinates.strip_suffix(".json").unwrap_or(coordinates);
    let (lon, lat) = coordinates.split_once(',')?;
    let longitude: f64 = lon.parse().ok()?;
    let latitude: f64 = lat.parse().ok()?;
    if !latitude.is_finite() || !longitude.is_finite() {
        return None;
    }
    Some(GeoPoint::new(latitude, longitude))
}

fn json_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

fn nearest_body(query: GeoPoint, grid: f64) -> (StatusCode, String) {
    if query.latitude.abs() > MAX_ROAD_LATITUDE {
        let body = serde_json::json!({
            "code": "NoSegment",
            "message": "Could not find a matching segment for coordinate",
        });
        return (StatusCode::BAD_REQUEST, body.to_string());
    }

    let snapped =
        GeoPoint::new(snap_to_grid(query.latitude, grid), snap_to_grid(query.longitude, grid));
    let body = serde_json::json!({
        "code": "Ok",
        "waypoints": [{
            "name": "",
            "location": [snapped.longitude, snapped.latitude],
            "distance": query.haversine_m(&snapped),
        }],
    });
    (StatusCode::OK, body.to_string())
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    config: Arc<NearestServerConfig>,
    stats: Arc<NearestServerStats>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();

    if req.method() == Method::GET && path == "/health" {
        return Ok(Response::new(Full::new(Bytes::from("ok"))));
    }
    if req.method() != Method::GET || !path.starts_with("/nearest/v1/") {
        return Ok(json_response(
            StatusCode::NOT_FOUND,
            r#"{"code":"InvalidUrl","message":"URL string malformed"}"#.to_string(),
        ));
    }

    let request_number = stats.requests.fetch_add(1, Ordering::Relaxed) + 1;
    if config.should_fail(request_number) {
        stats.failures_injected.fetch_add(1, Ordering::Relaxed);
        let status =
            StatusCode::from_u16(config.fail_status).unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
        debug!(request = %request_number, status = %status.as_u16(), "nearest_failure_injected");
        return Ok(json_response(
            status,
            r#"{"code":"Unavailable","message":"injected failure"}"#.to_string(),
        ));
    }

    let Some(query) = parse_nearest_path(&path) else {
        return Ok(json_response(
            StatusCode::BAD_REQUEST,
            r#"{"code":"InvalidQuery","message":"Query string malformed"}"#.to_string(),
        ));
    };

    let (status, body) = nearest_body(query, config.grid_deg);
    debug!(request = %request_number, query = %query, "nearest_served");
    Ok(json_response(status, body))
}

/// Serve `nearest` requests on `listener` until `shutdown` flips to true
pub async fn start_nearest_server(
    listener: TcpListener,
    config: NearestServerConfig,
    stats: Arc<NearestServerStats>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Arc::new(config);
    let addr = listener.local_addr()?;

    info!(
        addr = %addr,
        grid_deg = %config.grid_deg,
        fail_first = %config.fail_first,
        fail_every = %config.fail_every,
        "nearest_server_started"
    );

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let config = config.clone();
                        let stats = stats.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let config = config.clone();
                                let stats = stats.clone();
                                async move { handle_request(req, config, stats).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "nearest_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "nearest_accept_error");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("nearest_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

//! Bounded-concurrency snapping of a point sequence
//!
//! Each point is snapped on its own task; a semaphore caps how many
//! requests are in flight. Results are collected in input order, so the
//! surviving sequence keeps the trace order the classifier relies on.

use crate::domain::error::SnapFailure;
use crate::domain::types::{GeoPoint, SnappedPoint};
use crate::infra::metrics::Metrics;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Anything that can move a point onto the nearest road
#[async_trait]
pub trait RoadSnapper: Send + Sync {
    async fn snap_to_nearest_road(&self, point: GeoPoint) -> Result<SnappedPoint, SnapFailure>;
}

/// Outcome of snapping a whole sequence
#[derive(Debug, Default)]
pub struct SnapOutcome {
    /// Successful snaps, input order
    pub snapped: Vec<SnappedPoint>,
    /// `(input index, failure)` for every dropped point
    pub failures: Vec<(usize, SnapFailure)>,
}

pub struct SnapPool {
    snapper: Arc<dyn RoadSnapper>,
    concurrency: usize,
    metrics: Arc<Metrics>,
}

impl SnapPool {
    pub fn new(snapper: Arc<dyn RoadSnapper>, concurrency: usize, metrics: Arc<Metrics>) -> Self {
        Self { snapper, concurrency: concurrency.max(1), metrics }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Snap every point. Failed points are logged and dropped.
    pub async fn snap_all(&self, points: &[GeoPoint]) -> SnapOutcome {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(points.len());

        for &point in points {
            let semaphore = semaphore.clone();
            let snapper = self.snapper.clone();
            handles.push(tokio::spawn(async move {
                // Semaphore is never closed
                let _permit = semaphore.acquire_owned().await.ok();
                snapper.snap_to_nearest_road(point).await
            }));
        }

        let mut outcome = SnapOutcome {
            snapped: Vec::with_capacity(points.len()),
            failures: Vec::new(),
        };

        for (index, (handle, point)) in handles.into_iter().zip(points).enumerate() {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!(index = %index, point = %point, error = %e, "snap_task_failed");
                    Err(SnapFailure::Transport(format!("snap task failed: {}", e)))
                }
            };

            match result {
                Ok(snapped) => {
                    self.metrics.record_snap_result(true);
                    outcome.snapped.push(snapped);
                }
                Err(failure) => {
                    warn!(index = %index, point = %point, error = %failure, "snap_failed_point_dropped");
                    self.metrics.record_snap_result(false);
                    outcome.failures.push((index, failure));
                }
            }
        }

        info!(
            requested = %points.len(),
            snapped = %outcome.snapped.len(),
            dropped = %outcome.failures.len(),
            concurrency = %self.concurrency,
            "snap_complete"
        );

        outcome
    }
}

//! Parse, snap, classify, hand off
//!
//! One `run` processes one trace end to end:
//! 1. parse the trace text into raw records
//! 2. coerce to `GeoPoint`s, skipping records with non-numeric coordinates
//! 3. snap through the pool, dropping points that fail
//! 4. classify the surviving sequence once
//! 5. deliver the classified points to the sink

use crate::domain::error::PipelineError;
use crate::domain::types::GeoPoint;
use crate::infra::metrics::Metrics;
use crate::io::egress::PointSink;
use crate::io::{position_log, route_markup, tabular};
use crate::services::classifier::SequenceClassifier;
use crate::services::snapper::SnapPool;
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Raw trace text with its format
#[derive(Debug, Clone, PartialEq)]
pub enum TraceSource {
    /// Positioning log (`%` comments, whitespace-separated fields)
    PositionLog(String),
    /// Route markup with the namespace its elements must be bound to
    RouteMarkup { document: String, namespace: String },
}

impl TraceSource {
    /// Read a trace file; `.kml` is route markup, anything else a position log
    pub fn from_path(path: &Path, namespace: &str) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read trace {}", path.display()))?;
        let is_markup = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("kml"));

        Ok(if is_markup {
            TraceSource::RouteMarkup { document: text, namespace: namespace.to_string() }
        } else {
            TraceSource::PositionLog(text)
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TraceSource::PositionLog(_) => "position_log",
            TraceSource::RouteMarkup { .. } => "route_markup",
        }
    }
}

/// Per-stage counts for one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineReport {
    pub records_parsed: usize,
    pub records_skipped: usize,
    pub points_snapped: usize,
    pub snap_failures: usize,
    pub points_classified: usize,
    pub fit_iterations: usize,
    pub fit_converged: bool,
    pub log_likelihood: f64,
}

pub struct Pipeline {
    pool: SnapPool,
    classifier: Arc<SequenceClassifier>,
    metrics: Arc<Metrics>,
    snapped_output: Option<PathBuf>,
}

impl Pipeline {
    pub fn new(pool: SnapPool, classifier: SequenceClassifier, metrics: Arc<Metrics>) -> Self {
        Self { pool, classifier: Arc::new(classifier), metrics, snapped_output: None }
    }

    /// Also write the snapped sequence as CSV before classifying
    pub fn with_snapped_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapped_output = Some(path.into());
        self
    }

    /// Parse `source` and coerce its records.
    ///
    /// Returns the points plus the parsed and skipped record counts.
    pub fn extract_points(
        &self,
        source: &TraceSource,
    ) -> Result<(Vec<GeoPoint>, usize, usize), PipelineError> {
        let coerced: Vec<_> = match source {
            TraceSource::PositionLog(text) => position_log::parse_position_log(text)
                .iter()
                .map(|record| record.to_geo_point())
                .collect(),
            TraceSource::RouteMarkup { document, namespace } => {
                route_markup::parse_route_markup_ns(document, namespace)?
                    .iter()
                    .map(|coordinate| coordinate.to_geo_point())
                    .collect()
            }
        };

        let parsed = coerced.len();
        self.metrics.record_parsed(parsed as u64);

        let mut points = Vec::with_capacity(parsed);
        let mut skipped = 0;
        for (index, result) in coerced.into_iter().enumerate() {
            match result {
                Ok(point) => points.push(point),
                Err(e) => {
                    warn!(index = %index, error = %e, "record_skipped");
                    self.metrics.record_skipped();
                    skipped += 1;
                }
            }
        }

        Ok((points, parsed, skipped))
    }

    pub async fn run(
        &self,
        source: &TraceSource,
        sink: &mut dyn PointSink,
    ) -> Result<PipelineReport, PipelineError> {
        let (points, records_parsed, records_skipped) = self.extract_points(source)?;
        info!(
            source = %source.kind(),
            records = %records_parsed,
            skipped = %records_skipped,
            "trace_parsed"
        );

        let outcome = self.pool.snap_all(&points).await;

        if let Some(path) = &self.snapped_output {
            tabular::write_records_to_path(path, &outcome.snapped).map_err(PipelineError::Export)?;
        }

        let points_snapped = outcome.snapped.len();
        let snap_failures = outcome.failures.len();

        // EM runs up to max_iterations passes; keep it off the async workers
        let classifier = self.classifier.clone();
        let snapped = outcome.snapped;
        let classification = tokio::task::spawn_blocking(move || classifier.classify(&snapped))
            .await
            .map_err(PipelineError::Task)??;
        self.metrics.record_classified(classification.points.len() as u64);

        sink.deliver(&classification.points).map_err(PipelineError::Sink)?;

        let report = PipelineReport {
            records_parsed,
            records_skipped,
            points_snapped,
            snap_failures,
            points_classified: classification.points.len(),
            fit_iterations: classification.report.iterations,
            fit_converged: classification.report.converged,
            log_likelihood: classification.report.log_likelihood,
        };

        info!(
            parsed = %report.records_parsed,
            skipped = %report.records_skipped,
            snapped = %report.points_snapped,
            dropped = %report.snap_failures,
            classified = %report.points_classified,
            "pipeline_complete"
        );

        Ok(report)
    }
}

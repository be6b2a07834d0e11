//! Classified point egress - hands labeled points to the map renderer
//!
//! The renderer is an external consumer; it reads records shaped
//! `{latitude, longitude, label}`. Two sinks are provided:
//! - `JsonlEgress` - one JSON object per line
//! - `CsvEgress` - `latitude,longitude,label` table

use crate::domain::types::{ClassifiedPoint, LabeledRecord};
use crate::io::tabular;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Destination for the terminal classified sequence
pub trait PointSink {
    /// Accept the whole run at once. Returns the number of points delivered.
    fn deliver(&mut self, points: &[ClassifiedPoint]) -> Result<usize>;
}

/// In-memory sink, mostly for tests and library callers
impl PointSink for Vec<ClassifiedPoint> {
    fn deliver(&mut self, points: &[ClassifiedPoint]) -> Result<usize> {
        self.extend_from_slice(points);
        Ok(points.len())
    }
}

/// JSONL writer for classified points
pub struct JsonlEgress {
    file_path: PathBuf,
    run_id: String,
}

impl JsonlEgress {
    pub fn new(file_path: impl Into<PathBuf>, run_id: &str) -> Self {
        let file_path = file_path.into();
        info!(file_path = %file_path.display(), run_id = %run_id, "egress_initialized");
        Self { file_path, run_id: run_id.to_string() }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Replace the egress file with `points`
    fn write_points(&self, points: &[ClassifiedPoint]) -> std::io::Result<usize> {
        let path = self.file_path.as_path();

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).write(true).truncate(true).open(path)?;
        let mut out = BufWriter::new(file);

        for point in points {
            let line = serde_json::to_string(&LabeledRecord::from(point))?;
            writeln!(out, "{}", line)?;
        }
        out.flush()?;

        debug!(file = %path.display(), lines = %points.len(), "egress_written");
        Ok(points.len())
    }
}

impl PointSink for JsonlEgress {
    fn deliver(&mut self, points: &[ClassifiedPoint]) -> Result<usize> {
        let count = self
            .write_points(points)
            .with_context(|| format!("failed to write {}", self.file_path.display()))?;
        info!(
            run_id = %self.run_id,
            file = %self.file_path.display(),
            points = %count,
            "classified_points_egressed"
        );
        Ok(count)
    }
}

/// CSV writer for classified points
pub struct CsvEgress {
    file_path: PathBuf,
}

impl CsvEgress {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self { file_path: file_path.into() }
    }
}

impl PointSink for CsvEgress {
    fn deliver(&mut self, points: &[ClassifiedPoint]) -> Result<usize> {
        tabular::write_records_to_path(&self.file_path, points)
    }
}

/// Fans a run out to several sinks in order
pub struct MultiSink<'a> {
    sinks: Vec<&'a mut dyn PointSink>,
}

impl<'a> MultiSink<'a> {
    pub fn new(sinks: Vec<&'a mut dyn PointSink>) -> Self {
        Self { sinks }
    }
}

impl PointSink for MultiSink<'_> {
    fn deliver(&mut self, points: &[ClassifiedPoint]) -> Result<usize> {
        for sink in self.sinks.iter_mut() {
            sink.deliver(points)?;
        }
        Ok(points.len())
    }
}

//! Flat CSV files between pipeline stages
//!
//! Every export writes its header row first, even when there are no rows,
//! so downstream readers always see the expected columns.

use crate::domain::types::{
    ClassifiedPoint, GeoPoint, LabeledRecord, RawPositionRecord, RawRouteCoordinate, SnappedPoint,
};
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::info;

pub const POSITION_HEADERS: [&str; 7] = ["latitude", "longitude", "height", "Q", "ns", "sdn", "sde"];
pub const ROUTE_HEADERS: [&str; 2] = ["latitude", "longitude"];
pub const SNAPPED_HEADERS: [&str; 2] = ["snapped_latitude", "snapped_longitude"];
pub const CLASSIFIED_HEADERS: [&str; 3] = ["latitude", "longitude", "label"];

/// A row type with a fixed header set
pub trait TabularRecord {
    type Row<'a>: Serialize
    where
        Self: 'a;

    fn headers() -> &'static [&'static str];
    fn row(&self) -> Self::Row<'_>;
}

impl TabularRecord for RawPositionRecord {
    type Row<'a> = &'a RawPositionRecord;

    fn headers() -> &'static [&'static str] {
        &POSITION_HEADERS
    }

    fn row(&self) -> Self::Row<'_> {
        self
    }
}

impl TabularRecord for RawRouteCoordinate {
    type Row<'a> = &'a RawRouteCoordinate;

    fn headers() -> &'static [&'static str] {
        &ROUTE_HEADERS
    }

    fn row(&self) -> Self::Row<'_> {
        self
    }
}

#[derive(Serialize)]
pub struct SnappedRow {
    snapped_latitude: f64,
    snapped_longitude: f64,
}

impl TabularRecord for SnappedPoint {
    type Row<'a> = SnappedRow;

    fn headers() -> &'static [&'static str] {
        &SNAPPED_HEADERS
    }

    fn row(&self) -> Self::Row<'_> {
        SnappedRow {
            snapped_latitude: self.location.latitude,
            snapped_longitude: self.location.longitude,
        }
    }
}

impl TabularRecord for ClassifiedPoint {
    type Row<'a> = LabeledRecord;

    fn headers() -> &'static [&'static str] {
        &CLASSIFIED_HEADERS
    }

    fn row(&self) -> Self::Row<'_> {
        LabeledRecord::from(self)
    }
}

/// Write header plus one row per record. Returns the number of rows.
pub fn write_records<W: Write, T: TabularRecord>(writer: W, records: &[T]) -> Result<usize> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    writer.write_record(T::headers())?;
    for record in records {
        writer.serialize(record.row())?;
    }
    writer.flush()?;
    Ok(records.len())
}

/// Write records to `path`, creating parent directories as needed
pub fn write_records_to_path<T: TabularRecord>(path: &Path, records: &[T]) -> Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let rows = write_records(file, records)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), rows = %rows, "csv_written");
    Ok(rows)
}

/// Read coordinates from a CSV with `latitude,longitude` or
/// `snapped_latitude,snapped_longitude` columns.
pub fn read_geo_points<R: Read>(reader: R) -> Result<Vec<GeoPoint>> {
    let mut reader = csv::Reader::from_reader(reader);
    let headers = reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h.trim() == name);

    let (lat_idx, lon_idx) = match (column("latitude"), column("longitude")) {
        (Some(lat), Some(lon)) => (lat, lon),
        _ => match (column("snapped_latitude"), column("snapped_longitude")) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => {
                return Err(anyhow!(
                    "CSV must contain 'latitude' and 'longitude' (or snapped_*) columns"
                ))
            }
        },
    };

    let mut points = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        // Header is line 1
        let line = i + 2;
        let field = |idx: usize, name: &str| -> Result<f64> {
            let raw = record.get(idx).unwrap_or("");
            raw.trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| anyhow!("line {}: invalid {} '{}'", line, name, raw))
        };
        points.push(GeoPoint::new(field(lat_idx, "latitude")?, field(lon_idx, "longitude")?));
    }
    Ok(points)
}

pub fn read_geo_points_from_path(path: &Path) -> Result<Vec<GeoPoint>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    read_geo_points(file).with_context(|| format!("failed to read {}", path.display()))
}

//! Domain models - records, points and error kinds
//!
//! This module contains the canonical data types used throughout the system:
//! - `RawPositionRecord` / `RawRouteCoordinate` - parser output, fields as text
//! - `GeoPoint` - normalized coordinate passed between stages
//! - `SnappedPoint` - road-network point with its pre-snap source
//! - `ClassifiedPoint` - snapped point with HMM state and `RoadType`
//! - `error` - typed failures for parsing, snapping and classification

pub mod error;
pub mod types;

// Re-export commonly used types at module level
pub use error::{ClassifyError, ParseError, PipelineError, SnapFailure};
pub use types::{
    ClassifiedPoint, GeoPoint, LabeledRecord, RawPositionRecord, RawRouteCoordinate, RoadType,
    SnappedPoint,
};

//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `position_log` - positioning log parser (`%` comments, fixed field offsets)
//! - `route_markup` - KML route markup parser (namespace-aware)
//! - `tabular` - CSV export/import between pipeline stages
//! - `osrm` - HTTP client for the OSRM `nearest` service
//! - `egress` - classified point sinks (JSONL, CSV)
//! - `nearest_server` - local stand-in for the `nearest` service

pub mod egress;
pub mod nearest_server;
pub mod osrm;
pub mod position_log;
pub mod route_markup;
pub mod tabular;

// Re-export commonly used types
pub use egress::{CsvEgress, JsonlEgress, MultiSink, PointSink};
pub use nearest_server::{start_nearest_server, NearestServerConfig, NearestServerStats};
pub use osrm::{OsrmClient, OsrmConfig};

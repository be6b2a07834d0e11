//! Shared types for the roadsnap pipeline

use crate::domain::error::ParseError;
use serde::{Deserialize, Serialize};

/// Mean Earth radius used for haversine distances
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// A position in WGS84 degrees, the currency passed between every stage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    #[inline]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Great-circle distance in metres
    pub fn haversine_m(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.7},{:.7}", self.latitude, self.longitude)
    }
}

fn parse_coordinate(field: &'static str, value: &str) -> Result<f64, ParseError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ParseError::InvalidNumber { field, value: value.to_string() })
}

/// One data line of a positioning log.
///
/// Fields are kept verbatim; numeric coercion happens in [`to_geo_point`](Self::to_geo_point).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawPositionRecord {
    pub latitude: String,
    pub longitude: String,
    pub height: String,
    #[serde(rename = "Q")]
    pub quality: String,
    #[serde(rename = "ns")]
    pub satellite_count: String,
    #[serde(rename = "sdn")]
    pub sd_north: String,
    #[serde(rename = "sde")]
    pub sd_east: String,
}

impl RawPositionRecord {
    pub fn to_geo_point(&self) -> Result<GeoPoint, ParseError> {
        Ok(GeoPoint::new(
            parse_coordinate("latitude", &self.latitude)?,
            parse_coordinate("longitude", &self.longitude)?,
        ))
    }
}

/// One placemark coordinate from route markup, already in (lat, lon) order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawRouteCoordinate {
    pub latitude: String,
    pub longitude: String,
}

impl RawRouteCoordinate {
    pub fn to_geo_point(&self) -> Result<GeoPoint, ParseError> {
        Ok(GeoPoint::new(
            parse_coordinate("latitude", &self.latitude)?,
            parse_coordinate("longitude", &self.longitude)?,
        ))
    }
}

/// A point moved onto the road network.
///
/// `source` keeps the pre-snap position so before/after comparisons stay possible;
/// downstream stages only read `location`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnappedPoint {
    pub location: GeoPoint,
    pub source: GeoPoint,
    pub distance_m: f64,
}

impl SnappedPoint {
    pub fn new(location: GeoPoint, source: GeoPoint, distance_m: Option<f64>) -> Self {
        let distance_m = distance_m.unwrap_or_else(|| source.haversine_m(&location));
        Self { location, source, distance_m }
    }
}

/// Latent road type assigned to an HMM state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoadType {
    Highway,
    ServiceRoad,
}

impl RoadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoadType::Highway => "highway",
            RoadType::ServiceRoad => "service_road",
        }
    }
}

impl std::fmt::Display for RoadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RoadType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "highway" => Ok(RoadType::Highway),
            "service_road" => Ok(RoadType::ServiceRoad),
            other => Err(format!("unknown road type '{}'", other)),
        }
    }
}

/// A snapped point with its decoded HMM state and road type.
///
/// Keeps the whole [`SnappedPoint`], so the pre-snap position and snap distance
/// reach every sink.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifiedPoint {
    pub snapped: SnappedPoint,
    pub state: usize,
    pub label: RoadType,
}

impl ClassifiedPoint {
    #[inline]
    pub fn location(&self) -> GeoPoint {
        self.snapped.location
    }
}

/// Record shape expected by the map renderer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabeledRecord {
    pub latitude: f64,
    pub longitude: f64,
    pub label: RoadType,
}

impl From<&ClassifiedPoint> for LabeledRecord {
    fn from(point: &ClassifiedPoint) -> Self {
        Self {
            latitude: point.snapped.location.latitude,
            longitude: point.snapped.location.longitude,
            label: point.label,
        }
    }
}

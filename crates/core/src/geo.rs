//! Geographic primitives: coordinates and great-circle distance.
//!
//! Distances are haversine over a spherical Earth. At the merge radii used by
//! the pipeline (tens of metres) the spherical error is far below GPS noise.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Mean Earth radius in metres.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Check that both components are finite and inside the WGS84 ranges.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.lat.is_finite() || !self.lon.is_finite() {
            return Err(CoreError::Validation(
                "Coordinates must be finite numbers".to_string(),
            ));
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(CoreError::Validation(format!(
                "Latitude {} must be between -90 and 90",
                self.lat
            )));
        }
        if !(-180.0..=180.0).contains(&self.lon) {
            return Err(CoreError::Validation(format!(
                "Longitude {} must be between -180 and 180",
                self.lon
            )));
        }
        Ok(())
    }

    /// Great-circle distance to `other` in metres.
    pub fn distance_meters(&self, other: &GeoPoint) -> f64 {
        haversine_meters(self.lat, self.lon, other.lat, other.lon)
    }

    /// Point `meters` due north of `self`. Used to build fixtures at known distances.
    pub fn offset_north(&self, meters: f64) -> GeoPoint {
        GeoPoint::new(self.lat + (meters / EARTH_RADIUS_METERS).to_degrees(), self.lon)
    }

    /// Point `meters` due east of `self` along the parallel.
    pub fn offset_east(&self, meters: f64) -> GeoPoint {
        let radius_at_lat = EARTH_RADIUS_METERS * self.lat.to_radians().cos();
        GeoPoint::new(self.lat, self.lon + (meters / radius_at_lat).to_degrees())
    }
}

/// Haversine distance between two lat/lon points in metres.
pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);

    // Clamp guards asin against a > 1.0 from rounding on antipodal points.
    let c = 2.0 * a.sqrt().min(1.0).asin();
    EARTH_RADIUS_METERS * c
}

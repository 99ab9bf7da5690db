//! Core data types for the patrol planner

use serde::{Deserialize, Serialize};

/// Geographic coordinate: latitude/longitude in degrees, altitude in meters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lon: f64, alt: f64) -> Self {
        Self { lat, lon, alt }
    }

    /// Same horizontal position at a different altitude
    pub const fn with_alt(self, alt: f64) -> Self {
        Self { alt, ..self }
    }

    /// Latitude and longitude are finite and inside their ranges
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && self.alt.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.7}, {:.7}, {:.1} m)", self.lat, self.lon, self.alt)
    }
}

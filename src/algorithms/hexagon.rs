//! Flat-earth waypoint generation for the hexagonal patrol
//!
//! Offsets are computed on a local tangent plane around an origin, treating
//! the earth as a sphere of radius [`EARTH_RADIUS_M`]. The approximation is
//! only meant for offsets of tens of meters; it degrades with distance and
//! near the poles, where `cos(lat)` goes to zero.

use crate::core::{GeoPoint, EARTH_RADIUS_M, WAYPOINT_ALTITUDE_M};
use nalgebra::Vector2;
use thiserror::Error;

/// Number of vertices of the patrol polygon
pub const HEXAGON_VERTICES: usize = 6;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("invalid side length {0} m, must be finite and positive")]
    InvalidSideLength(f64),
    #[error("invalid origin {0}")]
    InvalidOrigin(GeoPoint),
}

/// Move `origin` by `d_north`/`d_east` meters.
///
/// The returned point always carries [`WAYPOINT_ALTITUDE_M`], whatever the
/// origin's altitude.
pub fn offset(origin: &GeoPoint, d_north: f64, d_east: f64) -> GeoPoint {
    let d_lat = d_north / EARTH_RADIUS_M;
    let d_lon = d_east / (EARTH_RADIUS_M * origin.lat.to_radians().cos());

    GeoPoint {
        lat: origin.lat + d_lat.to_degrees(),
        lon: origin.lon + d_lon.to_degrees(),
        alt: WAYPOINT_ALTITUDE_M,
    }
}

/// Inverse of [`offset`]: north/east meters from `origin` to `point`
pub fn inverse_offset(origin: &GeoPoint, point: &GeoPoint) -> Vector2<f64> {
    let d_lat = (point.lat - origin.lat).to_radians();
    let d_lon = (point.lon - origin.lon).to_radians();

    Vector2::new(
        d_lat * EARTH_RADIUS_M,
        d_lon * EARTH_RADIUS_M * origin.lat.to_radians().cos(),
    )
}

/// Horizontal distance between two nearby points (m)
pub fn ground_distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
    inverse_offset(a, b).norm()
}

/// Regular hexagon of waypoints around a center point
#[derive(Debug, Clone)]
pub struct Hexagon {
    center: GeoPoint,
    side_length_m: f64,
    vertices: [GeoPoint; HEXAGON_VERTICES],
}

impl Hexagon {
    pub fn new(center: GeoPoint, side_length_m: f64) -> Result<Self, GeometryError> {
        if !side_length_m.is_finite() || side_length_m <= 0.0 {
            return Err(GeometryError::InvalidSideLength(side_length_m));
        }
        if !center.is_valid() {
            return Err(GeometryError::InvalidOrigin(center));
        }

        let vertices = Self::local_vertices(side_length_m)
            .map(|ne| offset(&center, ne.x, ne.y));

        Ok(Self {
            center,
            side_length_m,
            vertices,
        })
    }

    /// North/east offsets of the vertices in flight order.
    ///
    /// Starts due east of the center and walks counter-clockwise.
    pub fn local_vertices(side_length_m: f64) -> [Vector2<f64>; HEXAGON_VERTICES] {
        let a = side_length_m;
        let h = apothem(a);
        [
            Vector2::new(0.0, a),
            Vector2::new(h, a / 2.0),
            Vector2::new(h, -a / 2.0),
            Vector2::new(0.0, -a),
            Vector2::new(-h, -a / 2.0),
            Vector2::new(-h, a / 2.0),
        ]
    }

    pub fn center(&self) -> &GeoPoint {
        &self.center
    }

    pub fn side_length_m(&self) -> f64 {
        self.side_length_m
    }

    pub fn vertices(&self) -> &[GeoPoint; HEXAGON_VERTICES] {
        &self.vertices
    }

    /// The center as a flyable target, at waypoint altitude
    pub fn home(&self) -> GeoPoint {
        offset(&self.center, 0.0, 0.0)
    }

    /// Patrol loop: every vertex in order, then the first one again
    pub fn closed_path(&self) -> Vec<GeoPoint> {
        let mut path = self.vertices.to_vec();
        path.push(self.vertices[0]);
        path
    }

    /// Centroid of the vertices in local north/east meters around the center
    pub fn local_centroid(&self) -> Vector2<f64> {
        let sum = self
            .vertices
            .iter()
            .map(|v| inverse_offset(&self.center, v))
            .fold(Vector2::zeros(), |acc, ne| acc + ne);
        sum / HEXAGON_VERTICES as f64
    }
}

/// Center-to-edge distance of a regular hexagon with side `a`
pub fn apothem(side_length_m: f64) -> f64 {
    side_length_m * 3f64.sqrt() / 2.0
}

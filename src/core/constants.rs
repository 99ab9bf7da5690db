//! Physical constants and mission defaults

/// Radius of the "spherical" earth used by the flat-earth offset (m)
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Altitude stamped on every generated waypoint, relative to home (m)
pub const WAYPOINT_ALTITUDE_M: f64 = 10.0;

/// Hexagon side length flown by the patrol (m)
pub const DEFAULT_SIDE_LENGTH_M: f64 = 38.0;

/// Takeoff target altitude (m)
pub const DEFAULT_TAKEOFF_ALTITUDE_M: f64 = 10.0;

/// Ground speed requested for every leg (m/s)
pub const DEFAULT_GROUNDSPEED_MS: f64 = 10.0;

/// Fraction of the takeoff altitude that counts as "reached"
pub const TAKEOFF_ALTITUDE_FRACTION: f64 = 0.95;

/// Default MAVLink endpoint of the vehicle
pub const DEFAULT_CONNECTION: &str = "udpin:127.0.0.1:14551";

//! Hexagonal Patrol Planner
//!
//! Generates a regular hexagon of waypoints around a vehicle's home position
//! and flies it over a MAVLink link: upload, arm, take off, visit every
//! vertex, return home.

pub mod core;
pub mod algorithms;
pub mod hardware;
pub mod mission;
pub mod utils;

// Re-export commonly used types
pub use core::{GeoPoint, EARTH_RADIUS_M, WAYPOINT_ALTITUDE_M};
pub use algorithms::{Hexagon, GeometryError, offset, inverse_offset, ground_distance};
pub use hardware::{VehicleLink, VehicleMode, Telemetry, MavlinkVehicle, MockVehicle, LinkError};
pub use mission::{MissionCommand, MissionPhase, MissionSequencer, MissionReport, MissionError};
pub use utils::{ConfigurationManager, MissionConfig, ArrivalPolicy};

//! Waypoint geometry

pub mod hexagon;

pub use hexagon::{Hexagon, GeometryError, offset, inverse_offset, ground_distance};

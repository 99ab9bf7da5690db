//! Vehicle link abstraction
//!
//! The mission sequencer only talks to a [`VehicleLink`]. [`MavlinkVehicle`]
//! drives a real autopilot over MAVLink; [`MockVehicle`] simulates one for
//! tests and dry runs.

pub mod vehicle;
pub mod mavlink_link;
pub mod transport;
pub mod mock;
pub mod error;

pub use vehicle::{VehicleLink, VehicleMode, Telemetry};
pub use mavlink_link::{MavlinkVehicle, LinkSettings};
pub use transport::Endpoint;
pub use mock::{MockVehicle, MockCall};
pub use error::{LinkError, LinkResult};

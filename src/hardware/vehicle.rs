//! Vehicle link trait and telemetry types

use crate::core::GeoPoint;
use crate::hardware::LinkResult;
use crate::mission::MissionCommand;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Session with a flight controller.
///
/// Status getters read the latest telemetry snapshot; call [`refresh`]
/// to pull new data off the link before polling them.
///
/// [`refresh`]: VehicleLink::refresh
pub trait VehicleLink {
    /// Delete every stored mission item on the vehicle
    fn clear_mission(&mut self) -> LinkResult<()>;

    /// Replace the stored mission with `commands`. Blocks until the vehicle
    /// acknowledges the whole upload.
    fn upload_mission(&mut self, commands: &[MissionCommand]) -> LinkResult<()>;

    /// Drain pending telemetry into the snapshot
    fn refresh(&mut self) -> LinkResult<()>;

    /// Latest telemetry snapshot
    fn telemetry(&self) -> Telemetry;

    /// Switch flight mode
    fn set_mode(&mut self, mode: VehicleMode) -> LinkResult<()>;

    /// Request motor arming
    fn arm(&mut self) -> LinkResult<()>;

    /// Climb to `altitude_m` above home. Vehicle must be armed in guided mode.
    fn simple_takeoff(&mut self, altitude_m: f64) -> LinkResult<()>;

    /// Fly to `target` (altitude relative to home) at `groundspeed_ms`
    fn simple_goto(&mut self, target: GeoPoint, groundspeed_ms: f64) -> LinkResult<()>;

    /// Release the link. Further calls fail with `LinkError::Closed`.
    fn close(&mut self) -> LinkResult<()>;

    fn is_armable(&self) -> bool {
        self.telemetry().armable
    }

    fn is_armed(&self) -> bool {
        self.telemetry().armed
    }
}

/// Flight modes used by the patrol, with their ArduCopter custom mode numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VehicleMode {
    Stabilize,
    Auto,
    Guided,
    Loiter,
    Rtl,
    Land,
    Other(u32),
}

impl VehicleMode {
    pub fn custom_mode(self) -> u32 {
        match self {
            VehicleMode::Stabilize => 0,
            VehicleMode::Auto => 3,
            VehicleMode::Guided => 4,
            VehicleMode::Loiter => 5,
            VehicleMode::Rtl => 6,
            VehicleMode::Land => 9,
            VehicleMode::Other(mode) => mode,
        }
    }

    pub fn from_custom_mode(mode: u32) -> Self {
        match mode {
            0 => VehicleMode::Stabilize,
            3 => VehicleMode::Auto,
            4 => VehicleMode::Guided,
            5 => VehicleMode::Loiter,
            6 => VehicleMode::Rtl,
            9 => VehicleMode::Land,
            other => VehicleMode::Other(other),
        }
    }
}

/// Snapshot of what the vehicle last reported
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Telemetry {
    /// Global position, altitude above mean sea level
    pub location: Option<GeoPoint>,
    /// Altitude above home (m)
    pub relative_alt_m: f64,
    pub armed: bool,
    /// Pre-arm checks passed and position fix available
    pub armable: bool,
    pub mode: Option<VehicleMode>,
    /// Time since the last heartbeat; `None` before the first one
    pub heartbeat_age: Option<Duration>,
}

impl Telemetry {
    /// No heartbeat yet, or the last one is older than `timeout`
    pub fn heartbeat_stale(&self, timeout: Duration) -> bool {
        self.heartbeat_age.map_or(true, |age| age > timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_numbers_round_trip() {
        for mode in [
            VehicleMode::Stabilize,
            VehicleMode::Auto,
            VehicleMode::Guided,
            VehicleMode::Loiter,
            VehicleMode::Rtl,
            VehicleMode::Land,
        ] {
            assert_eq!(VehicleMode::from_custom_mode(mode.custom_mode()), mode);
        }
        assert_eq!(VehicleMode::from_custom_mode(17), VehicleMode::Other(17));
        assert_eq!(VehicleMode::Guided.custom_mode(), 4);
    }

    #[test]
    fn test_heartbeat_staleness() {
        let mut telemetry = Telemetry::default();
        assert!(telemetry.heartbeat_stale(Duration::from_secs(5)));

        telemetry.heartbeat_age = Some(Duration::from_secs(1));
        assert!(!telemetry.heartbeat_stale(Duration::from_secs(5)));

        telemetry.heartbeat_age = Some(Duration::from_secs(6));
        assert!(telemetry.heartbeat_stale(Duration::from_secs(5)));
    }
}

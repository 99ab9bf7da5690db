//! Mission commands uploaded to the vehicle

use crate::algorithms::Hexagon;
use crate::core::GeoPoint;
use serde::{Deserialize, Serialize};

/// One stored mission item
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MissionCommand {
    /// Climb to `altitude` meters above home. Ignored if already airborne.
    Takeoff { altitude: f64 },
    /// Fly to `point`; `seq` is the vertex number along the patrol
    Waypoint { point: GeoPoint, seq: u16 },
    /// Return to `point` and land
    ReturnToLaunch { point: GeoPoint },
}

impl MissionCommand {
    /// Target position, if the command has one
    pub fn target(&self) -> Option<&GeoPoint> {
        match self {
            MissionCommand::Takeoff { .. } => None,
            MissionCommand::Waypoint { point, .. } | MissionCommand::ReturnToLaunch { point } => {
                Some(point)
            }
        }
    }
}

/// Takeoff followed by one waypoint per hexagon vertex, in flight order
pub fn build_patrol_mission(hexagon: &Hexagon, takeoff_altitude_m: f64) -> Vec<MissionCommand> {
    let mut commands = Vec::with_capacity(hexagon.vertices().len() + 1);
    commands.push(MissionCommand::Takeoff {
        altitude: takeoff_altitude_m,
    });
    commands.extend(
        hexagon
            .vertices()
            .iter()
            .zip(1u16..)
            .map(|(point, seq)| MissionCommand::Waypoint { point: *point, seq }),
    );
    commands
}

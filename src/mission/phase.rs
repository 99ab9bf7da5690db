//! Mission phases

use std::fmt;

/// Where the sequencer is in the patrol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionPhase {
    /// Waiting for the first heartbeat and position fix
    Connecting,
    /// Clearing and uploading the stored mission
    Uploading,
    /// Waiting for pre-arm checks, switching to guided, arming
    Arming,
    /// Climbing to the takeoff altitude
    TakingOff,
    /// Flying leg `i` of the closed patrol path (0-based)
    EnRoute(usize),
    /// Flying back to the home point
    Returning,
    Done,
    /// A failure stopped the mission
    Aborted,
}

impl MissionPhase {
    /// The vehicle may be in the air in this phase
    pub fn is_airborne(self) -> bool {
        matches!(
            self,
            MissionPhase::TakingOff | MissionPhase::EnRoute(_) | MissionPhase::Returning
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MissionPhase::Done | MissionPhase::Aborted)
    }
}

impl fmt::Display for MissionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissionPhase::Connecting => write!(f, "connecting"),
            MissionPhase::Uploading => write!(f, "uploading"),
            MissionPhase::Arming => write!(f, "arming"),
            MissionPhase::TakingOff => write!(f, "taking off"),
            MissionPhase::EnRoute(leg) => write!(f, "en route (leg {})", leg + 1),
            MissionPhase::Returning => write!(f, "returning"),
            MissionPhase::Done => write!(f, "done"),
            MissionPhase::Aborted => write!(f, "aborted"),
        }
    }
}

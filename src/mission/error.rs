//! Mission error types

use crate::algorithms::GeometryError;
use crate::hardware::LinkError;
use crate::mission::MissionPhase;
use crate::utils::ConfigError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MissionError {
    #[error("vehicle link error: {0}")]
    Link(#[from] LinkError),

    #[error("geometry error: {0}")]
    Geometry(#[from] GeometryError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A poll loop hit its deadline
    #[error("timed out while {phase} after {waited:?}")]
    Timeout { phase: MissionPhase, waited: Duration },

    /// Heartbeats stopped arriving
    #[error("lost vehicle heartbeat while {phase}")]
    LinkLost { phase: MissionPhase },
}

pub type MissionResult<T> = Result<T, MissionError>;

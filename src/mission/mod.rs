//! Patrol mission building and sequencing

pub mod command;
pub mod phase;
pub mod sequencer;
pub mod error;

pub use command::{MissionCommand, build_patrol_mission};
pub use phase::MissionPhase;
pub use sequencer::{MissionSequencer, MissionReport};
pub use error::{MissionError, MissionResult};

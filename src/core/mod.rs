//! Core types and constants for the patrol planner

pub mod types;
pub mod constants;

pub use types::*;
pub use constants::*;

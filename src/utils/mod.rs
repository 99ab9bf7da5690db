//! Configuration and logging

pub mod config;
pub mod logging;

pub use config::{ConfigurationManager, MissionConfig, ArrivalPolicy, ConfigError};

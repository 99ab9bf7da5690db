//! Mission configuration
//!
//! [`MissionConfig`] holds every tunable of a patrol: the vehicle endpoint,
//! hexagon size, speeds and the timeouts of each wait. It loads from and saves
//! to JSON through [`ConfigurationManager`], which validates before accepting
//! any change.

use crate::core::{
    DEFAULT_CONNECTION, DEFAULT_GROUNDSPEED_MS, DEFAULT_SIDE_LENGTH_M,
    DEFAULT_TAKEOFF_ALTITUDE_M, TAKEOFF_ALTITUDE_FRACTION,
};
use crate::hardware::LinkSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// How the sequencer decides a leg is finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalPolicy {
    /// Wait until the vehicle is within `arrival_radius_m` of the target
    Confirmed,
    /// Wait a fixed dwell per leg whether or not the vehicle has arrived
    FixedDwell,
}

/// Mission parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MissionConfig {
    /// MAVLink connection string of the vehicle
    pub connection: String,
    /// Hexagon side length (meters)
    pub side_length_m: f64,
    /// Takeoff target altitude above home (meters)
    pub takeoff_altitude_m: f64,
    /// Fraction of the takeoff altitude that counts as reached
    pub takeoff_altitude_fraction: f64,
    /// Ground speed for every leg (m/s)
    pub groundspeed_ms: f64,
    /// Telemetry poll interval (milliseconds)
    pub poll_interval_ms: u64,
    /// Pause after the mission upload before arming (milliseconds)
    pub settle_delay_ms: u64,
    /// Maximum wait for the first heartbeat and position (milliseconds)
    pub connect_timeout_ms: u64,
    /// Maximum wait for a command or mission acknowledgement (milliseconds)
    pub request_timeout_ms: u64,
    /// Maximum wait for the mission upload handshake (milliseconds)
    pub upload_timeout_ms: u64,
    /// Maximum wait for pre-arm checks to pass (milliseconds)
    pub ready_timeout_ms: u64,
    /// Maximum wait for the vehicle to report armed (milliseconds)
    pub arm_timeout_ms: u64,
    /// Maximum wait to reach takeoff altitude (milliseconds)
    pub takeoff_timeout_ms: u64,
    /// Maximum wait for arrival at a waypoint (milliseconds)
    pub leg_timeout_ms: u64,
    /// Heartbeat age after which the link counts as lost (milliseconds)
    pub heartbeat_timeout_ms: u64,
    /// Distance at which a waypoint counts as reached (meters)
    pub arrival_radius_m: f64,
    pub arrival_policy: ArrivalPolicy,
    /// Dwell per patrol leg under `FixedDwell` (milliseconds)
    pub leg_dwell_ms: u64,
    /// Dwell for the leg home under `FixedDwell` (milliseconds)
    pub home_dwell_ms: u64,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            connection: DEFAULT_CONNECTION.to_string(),
            side_length_m: DEFAULT_SIDE_LENGTH_M,
            takeoff_altitude_m: DEFAULT_TAKEOFF_ALTITUDE_M,
            takeoff_altitude_fraction: TAKEOFF_ALTITUDE_FRACTION,
            groundspeed_ms: DEFAULT_GROUNDSPEED_MS,
            poll_interval_ms: 1000,
            settle_delay_ms: 5000,
            connect_timeout_ms: 30_000,
            request_timeout_ms: 3000,
            upload_timeout_ms: 15_000,
            ready_timeout_ms: 120_000,
            arm_timeout_ms: 30_000,
            takeoff_timeout_ms: 60_000,
            leg_timeout_ms: 60_000,
            heartbeat_timeout_ms: 5000,
            arrival_radius_m: 1.5,
            arrival_policy: ArrivalPolicy::Confirmed,
            leg_dwell_ms: 18_000,
            home_dwell_ms: 20_000,
        }
    }
}

impl MissionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            upload_timeout: Duration::from_millis(self.upload_timeout_ms),
        }
    }

    /// Every parameter problem found, empty when the configuration is usable
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.connection.trim().is_empty() {
            errors.push(ConfigError::invalid("connection", &self.connection, "must not be empty"));
        }

        let positive = [
            ("side_length_m", self.side_length_m),
            ("takeoff_altitude_m", self.takeoff_altitude_m),
            ("groundspeed_ms", self.groundspeed_ms),
            ("arrival_radius_m", self.arrival_radius_m),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                errors.push(ConfigError::invalid(name, value, "must be finite and positive"));
            }
        }

        if !(self.takeoff_altitude_fraction > 0.0 && self.takeoff_altitude_fraction <= 1.0) {
            errors.push(ConfigError::invalid(
                "takeoff_altitude_fraction",
                self.takeoff_altitude_fraction,
                "must be in (0, 1]",
            ));
        }

        // Beyond this the flat-earth offset error stops being negligible
        if self.side_length_m > 1000.0 {
            errors.push(ConfigError::invalid(
                "side_length_m",
                self.side_length_m,
                "flat-earth offsets are only valid up to 1000 m",
            ));
        }

        let nonzero = [
            ("poll_interval_ms", self.poll_interval_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("request_timeout_ms", self.request_timeout_ms),
            ("upload_timeout_ms", self.upload_timeout_ms),
            ("ready_timeout_ms", self.ready_timeout_ms),
            ("arm_timeout_ms", self.arm_timeout_ms),
            ("takeoff_timeout_ms", self.takeoff_timeout_ms),
            ("leg_timeout_ms", self.leg_timeout_ms),
            ("heartbeat_timeout_ms", self.heartbeat_timeout_ms),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                errors.push(ConfigError::invalid(name, value, "must be greater than zero"));
            }
        }

        errors
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {parameter} = {value}: {reason}")]
    InvalidParameter {
        parameter: String,
        value: String,
        reason: String,
    },
    #[error("config file I/O error: {message}")]
    IoError { message: String },
    #[error("config serialization error: {message}")]
    SerializationError { message: String },
}

impl ConfigError {
    fn invalid(parameter: &str, value: impl ToString, reason: &str) -> Self {
        ConfigError::InvalidParameter {
            parameter: parameter.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Loads, validates and saves the mission configuration
pub struct ConfigurationManager {
    config: MissionConfig,
    config_file_path: Option<String>,
    is_modified: bool,
}

impl ConfigurationManager {
    /// Create a configuration manager with default settings
    pub fn new() -> Self {
        Self {
            config: MissionConfig::default(),
            config_file_path: None,
            is_modified: false,
        }
    }

    /// Create configuration manager and load from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut manager = Self::new();
        manager.load_from_file(path)?;
        Ok(manager)
    }

    pub fn config(&self) -> &MissionConfig {
        &self.config
    }

    pub fn into_config(self) -> MissionConfig {
        self.config
    }

    /// Replace the configuration if it validates
    pub fn update_config(&mut self, config: MissionConfig) -> Result<(), ConfigError> {
        if let Some(error) = config.validate().into_iter().next() {
            return Err(error);
        }
        self.config = config;
        self.is_modified = true;
        Ok(())
    }

    /// Override the connection string, e.g. from the environment
    pub fn set_connection(&mut self, connection: &str) -> Result<String, ConfigError> {
        if connection.trim().is_empty() {
            return Err(ConfigError::invalid("connection", connection, "must not be empty"));
        }
        self.is_modified = true;
        Ok(std::mem::replace(&mut self.config.connection, connection.to_string()))
    }

    /// Load configuration from a JSON file. Missing keys take their defaults.
    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
            message: format!("Failed to read config file '{}': {}", path_str, e),
        })?;

        let config: MissionConfig =
            serde_json::from_str(&content).map_err(|e| ConfigError::SerializationError {
                message: format!("Failed to parse config file '{}': {}", path_str, e),
            })?;

        if let Some(error) = config.validate().into_iter().next() {
            return Err(error);
        }

        self.config = config;
        self.config_file_path = Some(path_str);
        self.is_modified = false;
        Ok(())
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content = serde_json::to_string_pretty(&self.config).map_err(|e| {
            ConfigError::SerializationError {
                message: format!("Failed to serialize config: {}", e),
            }
        })?;

        fs::write(&path, content).map_err(|e| ConfigError::IoError {
            message: format!("Failed to write config file '{}': {}", path_str, e),
        })?;

        self.config_file_path = Some(path_str);
        self.is_modified = false;
        Ok(())
    }

    pub fn config_file_path(&self) -> Option<&str> {
        self.config_file_path.as_deref()
    }

    /// Check if configuration has been modified since last load or save
    pub fn is_modified(&self) -> bool {
        self.is_modified
    }
}

impl Default for ConfigurationManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_default_config_matches_patrol() {
        let config = MissionConfig::default();
        assert_eq!(config.side_length_m, 38.0);
        assert_eq!(config.takeoff_altitude_m, 10.0);
        assert_eq!(config.groundspeed_ms, 10.0);
        assert_eq!(config.leg_dwell_ms, 18_000);
        assert_eq!(config.home_dwell_ms, 20_000);
        assert_eq!(config.connection, "udpin:127.0.0.1:14551");
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_invalid_parameters_reported() {
        let config = MissionConfig {
            side_length_m: -1.0,
            groundspeed_ms: f64::NAN,
            takeoff_altitude_fraction: 1.5,
            arm_timeout_ms: 0,
            ..Default::default()
        };

        let errors = config.validate();
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().all(|e| matches!(e, ConfigError::InvalidParameter { .. })));
    }

    #[test]
    fn test_oversized_hexagon_rejected() {
        let mut manager = ConfigurationManager::new();
        let config = MissionConfig {
            side_length_m: 5000.0,
            ..Default::default()
        };
        assert!(manager.update_config(config).is_err());
        assert!(!manager.is_modified());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let json = r#"{ "side_length_m": 20.0, "arrival_policy": "fixed_dwell" }"#;
        let config: MissionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.side_length_m, 20.0);
        assert_eq!(config.arrival_policy, ArrivalPolicy::FixedDwell);
        assert_eq!(config.takeoff_altitude_m, 10.0);
    }

    #[test]
    fn test_config_file_round_trip() {
        let mut manager = ConfigurationManager::new();
        manager.set_connection("tcpout:127.0.0.1:5760").unwrap();
        assert!(manager.is_modified());

        let temp_path = PathBuf::from("test_mission_config.json");
        manager.save_to_file(&temp_path).unwrap();
        assert!(!manager.is_modified());

        let loaded = ConfigurationManager::from_file(&temp_path).unwrap();
        assert_eq!(loaded.config().connection, "tcpout:127.0.0.1:5760");
        assert_eq!(loaded.config_file_path(), Some("test_mission_config.json"));

        let _ = fs::remove_file(temp_path);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = ConfigurationManager::from_file("does_not_exist.json");
        assert!(matches!(result, Err(ConfigError::IoError { .. })));
    }

    #[test]
    fn test_empty_connection_rejected() {
        let mut manager = ConfigurationManager::new();
        assert!(manager.set_connection("  ").is_err());
        assert_eq!(manager.config().connection, "udpin:127.0.0.1:14551");
    }
}

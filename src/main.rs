use hexpatrol::hardware::MavlinkVehicle;
use hexpatrol::mission::MissionSequencer;
use hexpatrol::utils::{logging, ConfigurationManager};
use tracing::{error, info};

/// Environment variable that overrides the configured connection string
const CONNECTION_ENV: &str = "HEXPATROL_CONNECTION";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() > 2 || args.get(1).is_some_and(|a| a == "-h" || a == "--help") {
        eprintln!(
            "Usage: {} [mission_config.json]",
            args.first().map_or("hexpatrol", |s| s.as_str())
        );
        eprintln!("   Set {} to override the vehicle connection string.", CONNECTION_ENV);
        return Err("Invalid arguments".into());
    }

    let mut manager = match args.get(1) {
        Some(path) => ConfigurationManager::from_file(path)?,
        None => ConfigurationManager::new(),
    };
    if let Ok(connection) = std::env::var(CONNECTION_ENV) {
        manager.set_connection(&connection)?;
    }
    let config = manager.into_config();

    let vehicle = MavlinkVehicle::connect(&config.connection, config.link_settings())?;
    let mut sequencer = MissionSequencer::new(vehicle, config)?;

    match sequencer.run() {
        Ok(report) => {
            info!(
                legs = report.legs_flown,
                elapsed = ?report.elapsed,
                "mission finished at home {}", report.home
            );
            Ok(())
        }
        Err(e) => {
            error!(phase = %sequencer.phase(), "mission aborted: {e}");
            Err(e.into())
        }
    }
}

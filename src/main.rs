//! Server binary: load configuration, bootstrap logging, and run the control core until a
//! termination signal arrives.
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rimoserver::config::Config;
use rimoserver::machine::Machine;
use rimoserver::LevelFilter;

const DEFAULT_CONFIG_PATH: &str = "/etc/rimoserver/config.json";

/// Control core for a dual-arm gantry robot.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// path to the JSON configuration document
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// log verbosity
    #[arg(short, long, default_value = "info")]
    log_level: LevelFilter,
}

fn main() -> ExitCode {
    let args = Args::parse();
    rimoserver::configure_logger(args.log_level);

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            log::error!("failed to load configuration from {}: {}", args.config.display(), e);
            return ExitCode::from(1);
        }
    };

    let machine = match Machine::new(&config) {
        Ok(machine) => machine,
        Err(e) => {
            log::error!("failed to build Machine: {}", e);
            return ExitCode::from(2);
        }
    };

    if let Err(e) = machine.run() {
        log::error!("Machine exited with an error: {}", e);
        return ExitCode::from(2);
    }

    ExitCode::SUCCESS
}

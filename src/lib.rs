//! Control core for a dual-arm gantry robot: drives AR-KD2 stepper drivers over
//! Modbus RTU, a Contec discrete I/O module over Modbus-TCP, and a serial
//! control panel, while serving status and commands to remote clients.
#![deny(missing_docs)]

use std::io::Write;
use std::{env, num};

pub use log::LevelFilter;

/// Modbus client adapter: uniform TCP/RTU transport
pub mod modbus;
/// Reliable TCP/Serial communications backing the Modbus adapter and the control panel
pub mod comm;
/// Typed configuration document
pub mod config;
/// Shared robot-domain data model (enumerations, status snapshot)
pub mod types;
/// Component lifecycle (initialize/reset/state) shared by hardware subsystems
pub mod component;
/// Discrete I/O module (Contec)
pub mod contec;
/// AR-KD2 motor register map and per-motor protocol
pub mod motor;
/// Fleet-level motor orchestrator over a shared Modbus bus
pub mod motor_control;
/// Serial control panel reader (joysticks + buttons)
pub mod control_panel;
/// Reactive control policy (default + RimoKun)
pub mod policy;
/// Injectable-clock monotonic scheduler
pub mod clock;
/// Cyclic control/command/update scheduling
pub mod control_loop;
/// Thread-safe command queue with shutdown semantics
pub mod command_queue;
/// Command document parsing/dispatch
pub mod command;
/// Command server event loop
pub mod command_server;
/// RobotStatus assembly and publication
pub mod status;
/// Pub/Rep network transport
pub mod transport;
/// The Machine orchestrator
pub mod machine;

/// The crate result type
pub type Result<T> = std::result::Result<T, Error>;

/// The crate error type
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// missing/invalid configuration key, unknown enum value, out-of-range mapping index
    #[error("configuration error: {0}")]
    Config(String),
    /// Modbus/serial/socket transport failure, recoverable via reset + initialize
    #[error("transport error: {0}")]
    Transport(String),
    /// a motor operation was invoked before the bus was initialized
    #[error("not ready")]
    NotReady,
    /// unknown motor id, invalid enum, or out-of-range value
    #[error("operation rejected: {0}")]
    OperationRejected(String),
    /// command deadline exceeded
    #[error("command processing timed out")]
    Timeout,
    /// submission after shutdown, or pending command drained on shutdown
    #[error("Machine is shutting down")]
    ShuttingDown,
    /// standard I/O errors
    #[error("I/O error: {0}")]
    IO(String),
    /// data could not be parsed/decoded
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

macro_rules! impl_error {
    ($t: ty, $key: ident) => {
        impl From<$t> for Error {
            fn from(err: $t) -> Self {
                Error::$key(err.to_string())
            }
        }
    };
}

impl_error!(rmodbus::ErrorKind, Transport);
impl_error!(oneshot::RecvError, Transport);
impl_error!(num::ParseIntError, InvalidData);
impl_error!(num::ParseFloatError, InvalidData);
impl_error!(binrw::Error, InvalidData);
impl_error!(serde_json::Error, InvalidData);

impl Error {
    /// Creates a new configuration error
    pub fn config<S: std::fmt::Display>(msg: S) -> Self {
        Error::Config(msg.to_string())
    }
    /// Creates a new operation-rejected error
    pub fn rejected<S: std::fmt::Display>(msg: S) -> Self {
        Error::OperationRejected(msg.to_string())
    }
    /// Creates a new transport error
    pub fn transport<S: std::fmt::Display>(msg: S) -> Self {
        Error::Transport(msg.to_string())
    }
}

/// Returns true if started in production mode (as a systemd unit)
pub fn is_production() -> bool {
    env::var("INVOCATION_ID").map_or(false, |v| !v.is_empty())
}

/// Configures stdout logger with the given filter. If started in production mode, does not log
/// timestamps
pub fn configure_logger(filter: LevelFilter) {
    let mut builder = env_logger::Builder::new();
    builder.target(env_logger::Target::Stdout);
    builder.filter_level(filter);
    if is_production() {
        builder.format(|buf, record| writeln!(buf, "{} {}", record.level(), record.args()));
    }
    builder.init();
}

/// Prelude module
pub mod prelude {
    pub use crate::{Error, Result};
    pub use crate::types::*;
}

//! Typed configuration document: one `serde_json` value tree, loaded once at startup and handed
//! to each component's constructor. There is no global config singleton.
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::types::Motor;
use crate::{Error, Result};

fn default_contec_timeout() -> u64 {
    1000
}

/// `classes.Contec`
#[derive(Debug, Clone, Deserialize)]
pub struct ContecConfig {
    /// Modbus-TCP host
    #[serde(rename = "ipAddress")]
    pub ip_address: String,
    /// Modbus-TCP port
    pub port: u16,
    /// Modbus unit (slave) id
    #[serde(rename = "slaveId")]
    pub slave_id: u16,
    /// digital input count
    #[serde(rename = "nDI")]
    pub n_di: usize,
    /// digital output count
    #[serde(rename = "nDO")]
    pub n_do: usize,
    /// response timeout, milliseconds
    #[serde(rename = "responseTimeoutMS", default = "default_contec_timeout")]
    pub response_timeout_ms: u64,
}

fn default_baud() -> u32 {
    9600
}
fn default_character_size() -> u8 {
    8
}
fn default_parity() -> char {
    'N'
}
fn default_stop_bits() -> u8 {
    1
}
fn default_read_timeout() -> u64 {
    1000
}
fn default_line_terminator() -> String {
    "\n".to_owned()
}

/// `classes.ControlPanel.comm.serial`
#[derive(Debug, Clone, Deserialize)]
pub struct ControlPanelSerialConfig {
    /// device path
    pub port: String,
    /// baud rate
    #[serde(rename = "baudRate", default = "default_baud")]
    pub baud_rate: u32,
    /// data bits per character
    #[serde(rename = "characterSize", default = "default_character_size")]
    pub character_size: u8,
    /// hardware flow control; unused by the AR-KD2/panel link but accepted for forward compat
    #[serde(rename = "flowControl", default)]
    pub flow_control: bool,
    /// parity: 'N'/'E'/'O'
    #[serde(default = "default_parity")]
    pub parity: char,
    /// stop bits
    #[serde(rename = "stopBits", default = "default_stop_bits")]
    pub stop_bits: u8,
    /// read timeout, milliseconds
    #[serde(rename = "readTimeoutMS", default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// line terminator; must be exactly one character
    #[serde(rename = "lineTerminator", default = "default_line_terminator")]
    pub line_terminator: String,
}

impl ControlPanelSerialConfig {
    /// The terminator as a single byte, after validating it is exactly one character.
    pub fn terminator_byte(&self) -> Result<u8> {
        let mut chars = self.line_terminator.chars();
        let first = chars
            .next()
            .ok_or_else(|| Error::config("ControlPanel.comm.serial.lineTerminator must not be empty"))?;
        if chars.next().is_some() || !first.is_ascii() {
            return Err(Error::config(
                "ControlPanel.comm.serial.lineTerminator must be exactly one ASCII character",
            ));
        }
        Ok(first as u8)
    }
}

/// `classes.ControlPanel.comm`
#[derive(Debug, Clone, Deserialize)]
pub struct ControlPanelCommConfig {
    /// backend kind; only "serial" is currently supported
    #[serde(rename = "type")]
    pub kind: String,
    /// serial backend parameters
    pub serial: ControlPanelSerialConfig,
}

fn default_moving_average_depth() -> usize {
    5
}
fn default_baseline_samples() -> usize {
    50
}
fn default_button_debounce_samples() -> usize {
    3
}

/// `classes.ControlPanel.processing`
#[derive(Debug, Clone, Deserialize)]
pub struct ControlPanelProcessingConfig {
    /// moving-average window length, in samples
    #[serde(rename = "movingAverageDepth", default = "default_moving_average_depth")]
    pub moving_average_depth: usize,
    /// number of samples averaged to establish the joystick baseline
    #[serde(rename = "baselineSamples", default = "default_baseline_samples")]
    pub baseline_samples: usize,
    /// consecutive samples required before a button transition is accepted
    #[serde(rename = "buttonDebounceSamples", default = "default_button_debounce_samples")]
    pub button_debounce_samples: usize,
}

impl ControlPanelProcessingConfig {
    fn validate(&self) -> Result<()> {
        if self.moving_average_depth < 1 {
            return Err(Error::config("ControlPanel.processing.movingAverageDepth must be >= 1"));
        }
        if self.baseline_samples < 1 {
            return Err(Error::config("ControlPanel.processing.baselineSamples must be >= 1"));
        }
        if self.button_debounce_samples < 1 {
            return Err(Error::config("ControlPanel.processing.buttonDebounceSamples must be >= 1"));
        }
        Ok(())
    }
}

/// `classes.ControlPanel`
#[derive(Debug, Clone, Deserialize)]
pub struct ControlPanelConfig {
    /// communication backend
    pub comm: ControlPanelCommConfig,
    /// signal-processing parameters
    #[serde(default = "default_control_panel_processing")]
    pub processing: ControlPanelProcessingConfig,
}

fn default_control_panel_processing() -> ControlPanelProcessingConfig {
    ControlPanelProcessingConfig {
        moving_average_depth: default_moving_average_depth(),
        baseline_samples: default_baseline_samples(),
        button_debounce_samples: default_button_debounce_samples(),
    }
}

/// `classes.MotorControl.transport.serial`
#[derive(Debug, Clone, Deserialize)]
pub struct MotorSerialConfig {
    /// device path
    pub device: String,
    /// baud rate
    pub baud: u32,
    /// parity: 'N'/'E'/'O'
    pub parity: char,
    /// data bits per character
    #[serde(rename = "dataBits")]
    pub data_bits: u8,
    /// stop bits
    #[serde(rename = "stopBits")]
    pub stop_bits: u8,
}

/// `classes.MotorControl.transport`
#[derive(Debug, Clone, Deserialize)]
pub struct MotorTransportConfig {
    /// transport kind; only "serialRtu" is currently supported
    #[serde(rename = "type")]
    pub kind: String,
    /// serial parameters
    pub serial: MotorSerialConfig,
}

/// `classes.MotorControl.motors.<name>`
#[derive(Debug, Clone, Deserialize)]
pub struct MotorEntryConfig {
    /// Modbus slave address, 1..247
    pub address: u8,
    /// run current override, driver units
    #[serde(rename = "runCurrent")]
    pub run_current: Option<u16>,
    /// stop current override, driver units
    #[serde(rename = "stopCurrent")]
    pub stop_current: Option<u16>,
}

fn default_motor_timeout() -> u64 {
    1000
}

/// `classes.MotorControl`
#[derive(Debug, Clone, Deserialize)]
pub struct MotorControlConfig {
    /// driver model; only "AR-KD2" is currently supported
    pub model: String,
    /// bus transport
    pub transport: MotorTransportConfig,
    /// response timeout, milliseconds
    #[serde(rename = "responseTimeoutMS", default = "default_motor_timeout")]
    pub response_timeout_ms: u64,
    /// per-motor configuration
    pub motors: BTreeMap<Motor, MotorEntryConfig>,
}

impl MotorControlConfig {
    fn validate(&self) -> Result<()> {
        if self.model != "AR-KD2" {
            return Err(Error::config(format!(
                "unsupported MotorControl.model '{}': only AR-KD2 is supported",
                self.model
            )));
        }
        for (motor, entry) in &self.motors {
            if entry.address < 1 || entry.address > 247 {
                return Err(Error::config(format!(
                    "MotorControl.motors.{}.address {} out of range 1..247",
                    motor, entry.address
                )));
            }
        }
        Ok(())
    }
}

/// `classes.Machine`
#[derive(Debug, Clone, Deserialize)]
pub struct MachineConfig {
    /// nominal control-loop cadence, milliseconds
    #[serde(rename = "loopIntervalMS")]
    pub loop_interval_ms: u64,
    /// status-publication cadence, milliseconds
    #[serde(rename = "updateIntervalMS")]
    pub update_interval_ms: u64,
    /// named digital input indices
    #[serde(rename = "inputMapping", default)]
    pub input_mapping: BTreeMap<String, usize>,
    /// named digital output indices
    #[serde(rename = "outputMapping", default)]
    pub output_mapping: BTreeMap<String, usize>,
}

impl MachineConfig {
    fn validate(&self, contec: &ContecConfig) -> Result<()> {
        for (name, &index) in &self.input_mapping {
            if index >= contec.n_di {
                return Err(Error::config(format!("{}: index {} out of bounds for nDI", name, index)));
            }
        }
        for (name, &index) in &self.output_mapping {
            if index >= contec.n_do {
                return Err(Error::config(format!("{}: index {} out of bounds for nDO", name, index)));
            }
        }
        Ok(())
    }
}

/// `classes.RimoServer`
#[derive(Debug, Clone, Deserialize)]
pub struct RimoServerConfig {
    /// status publish socket URI
    #[serde(rename = "statusAddress")]
    pub status_address: String,
    /// command reply socket URI
    #[serde(rename = "commandAddress")]
    pub command_address: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Classes {
    #[serde(rename = "Contec")]
    contec: ContecConfig,
    #[serde(rename = "ControlPanel")]
    control_panel: ControlPanelConfig,
    #[serde(rename = "MotorControl")]
    motor_control: MotorControlConfig,
    #[serde(rename = "Machine")]
    machine: MachineConfig,
    #[serde(rename = "RimoServer")]
    rimo_server: RimoServerConfig,
}

/// The full, validated configuration document
#[derive(Debug, Clone)]
pub struct Config {
    /// `classes.Contec`
    pub contec: ContecConfig,
    /// `classes.ControlPanel`
    pub control_panel: ControlPanelConfig,
    /// `classes.MotorControl`
    pub motor_control: MotorControlConfig,
    /// `classes.Machine`
    pub machine: MachineConfig,
    /// `classes.RimoServer`
    pub rimo_server: RimoServerConfig,
}

#[derive(Debug, Deserialize)]
struct Document {
    classes: Classes,
}

impl Config {
    /// Load and validate configuration from a JSON file on disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())
            .map_err(|e| Error::config(format!("cannot read {}: {}", path.as_ref().display(), e)))?;
        Self::parse(&text)
    }

    /// Parse and validate configuration from a JSON document.
    pub fn parse(text: &str) -> Result<Self> {
        let doc: Document = serde_json::from_str(text).map_err(|e| Error::config(e.to_string()))?;
        let config = Config {
            contec: doc.classes.contec,
            control_panel: doc.classes.control_panel,
            motor_control: doc.classes.motor_control,
            machine: doc.classes.machine,
            rimo_server: doc.classes.rimo_server,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.control_panel.processing.validate()?;
        self.control_panel.comm.serial.terminator_byte()?;
        self.motor_control.validate()?;
        self.machine.validate(&self.contec)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> String {
        serde_json::json!({
            "classes": {
                "Contec": {"ipAddress": "127.0.0.1", "port": 502, "slaveId": 1, "nDI": 8, "nDO": 8},
                "ControlPanel": {
                    "comm": {"type": "serial", "serial": {"port": "/dev/ttyUSB0"}},
                },
                "MotorControl": {
                    "model": "AR-KD2",
                    "transport": {"type": "serialRtu", "serial": {"device": "/dev/ttyUSB1", "baud": 115200, "parity": "N", "dataBits": 8, "stopBits": 1}},
                    "motors": {"XLeft": {"address": 1}},
                },
                "Machine": {"loopIntervalMS": 10, "updateIntervalMS": 100, "inputMapping": {"button1": 0}, "outputMapping": {}},
                "RimoServer": {"statusAddress": "tcp://*:5556", "commandAddress": "tcp://*:5557"},
            }
        })
        .to_string()
    }

    #[test]
    fn parses_a_well_formed_document() {
        let config = Config::parse(&sample()).unwrap();
        assert_eq!(config.contec.n_di, 8);
        assert_eq!(config.motor_control.motors.len(), 1);
    }

    #[test]
    fn rejects_out_of_range_motor_address() {
        let mut doc: serde_json::Value = serde_json::from_str(&sample()).unwrap();
        doc["classes"]["MotorControl"]["motors"]["XLeft"]["address"] = serde_json::json!(248);
        let err = Config::parse(&doc.to_string()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_out_of_bounds_input_mapping() {
        let mut doc: serde_json::Value = serde_json::from_str(&sample()).unwrap();
        doc["classes"]["Machine"]["inputMapping"]["button1"] = serde_json::json!(99);
        let err = Config::parse(&doc.to_string()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_multi_character_line_terminator() {
        let mut doc: serde_json::Value = serde_json::from_str(&sample()).unwrap();
        doc["classes"]["ControlPanel"]["comm"]["serial"]["lineTerminator"] = serde_json::json!("\r\n");
        let err = Config::parse(&doc.to_string()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_unsupported_motor_model() {
        let mut doc: serde_json::Value = serde_json::from_str(&sample()).unwrap();
        doc["classes"]["MotorControl"]["model"] = serde_json::json!("AR-KD3");
        let err = Config::parse(&doc.to_string()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}

//! Command documents: wire parsing, dispatchable command values, and response assembly.
use std::time::Duration;

use serde_json::{json, Value};

use crate::types::{Arm, Motor, RobotComponent, ToolChangerAction};
use crate::{Error, Result};

/// How long the CommandProcessor waits for a dispatched command's reply before reporting a
/// timeout to the caller (the command itself is left queued; a late reply is simply ignored).
pub const DISPATCH_DEADLINE: Duration = Duration::from_secs(2);

/// A command ready to be queued and dispatched, parsed out of a wire request document.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// open or close one arm's tool changer
    ToolChanger {
        /// which arm
        position: Arm,
        /// open or close
        action: ToolChangerAction,
    },
    /// reconnect one hardware subsystem (reset then initialize)
    Reset {
        /// which subsystem
        system: RobotComponent,
    },
    /// read back a motor's current alarm/warning/communication-error diagnostics
    MotorDiagnostics {
        /// which motor
        motor: Motor,
    },
    /// clear a motor's latched alarm
    ResetMotorAlarm {
        /// which motor
        motor: Motor,
    },
    /// read back the Contec component's state and last-known I/O snapshot
    ContecDiagnostics,
}

fn enum_field<T: std::str::FromStr>(document: &Value, field: &str) -> Option<T> {
    document.get(field)?.as_str()?.parse().ok()
}

/// Parse a wire request document into a dispatchable [`Command`]. Returns the exact error
/// message the wire protocol expects on malformed input.
pub fn parse_command(document: &Value) -> std::result::Result<Command, String> {
    let Some(map) = document.as_object() else {
        return Err("Command must be a map! Ignoring!".to_owned());
    };
    let Some(kind) = map.get("type").and_then(Value::as_str) else {
        return Err("Command must be a map! Ignoring!".to_owned());
    };
    match kind {
        "toolChanger" => {
            let position = enum_field::<Arm>(document, "position");
            let action = enum_field::<ToolChangerAction>(document, "action");
            match (position, action) {
                (Some(position), Some(action)) => Ok(Command::ToolChanger { position, action }),
                _ => Err("Invalid toolChanger command".to_owned()),
            }
        }
        "reset" => match enum_field::<RobotComponent>(document, "system") {
            Some(system) => Ok(Command::Reset { system }),
            None => Err("Invalid reset command".to_owned()),
        },
        "motorDiagnostics" => match enum_field::<Motor>(document, "motor") {
            Some(motor) => Ok(Command::MotorDiagnostics { motor }),
            None => Err("Invalid motorDiagnostics command".to_owned()),
        },
        "resetMotorAlarm" => match enum_field::<Motor>(document, "motor") {
            Some(motor) => Ok(Command::ResetMotorAlarm { motor }),
            None => Err("Invalid resetMotorAlarm command".to_owned()),
        },
        "contecDiagnostics" => Ok(Command::ContecDiagnostics),
        other => Err(format!("Unknown command type '{}'!", other)),
    }
}

/// Dispatches a parsed command and blocks up to `deadline` for its reply: `Ok("")` for a plain
/// success, `Ok(json_text)` when the command carries a response payload, or an `Err` describing
/// why it failed (including [`Error::Timeout`]).
pub trait Dispatch {
    /// Queue `command` and wait up to `deadline` for its outcome.
    fn dispatch(&self, command: Command, deadline: Duration) -> Result<String>;
}

impl<F: Fn(Command, Duration) -> Result<String>> Dispatch for F {
    fn dispatch(&self, command: Command, deadline: Duration) -> Result<String> {
        self(command, deadline)
    }
}

/// Parses wire request documents, dispatches the resulting command, and assembles the wire
/// response document.
pub struct CommandProcessor<D> {
    dispatch: D,
}

impl<D: Dispatch> CommandProcessor<D> {
    /// Build a processor around an injected dispatch function, hiding all queueing/waiting.
    pub fn new(dispatch: D) -> Self {
        Self { dispatch }
    }

    /// Process one wire request document, returning the wire response document.
    pub fn process(&self, document: &Value) -> Value {
        let command = match parse_command(document) {
            Ok(command) => command,
            Err(message) => return error_response(message),
        };
        match self.dispatch.dispatch(command, DISPATCH_DEADLINE) {
            Ok(payload) if payload.is_empty() => ok_response(None),
            Ok(payload) => match serde_json::from_str::<Value>(&payload) {
                Ok(value) => ok_response(Some(value)),
                Err(_) => ok_response(None),
            },
            Err(e) => error_response(e.to_string()),
        }
    }
}

fn ok_response(response: Option<Value>) -> Value {
    match response {
        Some(response) => json!({"status": "OK", "message": "", "response": response}),
        None => json!({"status": "OK", "message": ""}),
    }
}

fn error_response(message: String) -> Value {
    json!({"status": "Error", "message": message})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_map_document_is_rejected() {
        let processor = CommandProcessor::new(|_: Command, _: Duration| -> Result<String> { Ok(String::new()) });
        let response = processor.process(&json!("not a map"));
        assert_eq!(response["status"], "Error");
        assert_eq!(response["message"], "Command must be a map! Ignoring!");
    }

    #[test]
    fn unknown_type_is_rejected() {
        let processor = CommandProcessor::new(|_: Command, _: Duration| -> Result<String> { Ok(String::new()) });
        let response = processor.process(&json!({"type": "frobnicate"}));
        assert_eq!(response["status"], "Error");
        assert_eq!(response["message"], "Unknown command type 'frobnicate'!");
    }

    #[test]
    fn malformed_tool_changer_is_rejected_before_dispatch() {
        let processor = CommandProcessor::new(|_: Command, _: Duration| -> Result<String> {
            panic!("dispatch must not run for a malformed command");
        });
        let response = processor.process(&json!({"type": "toolChanger", "position": "Left"}));
        assert_eq!(response["status"], "Error");
        assert_eq!(response["message"], "Invalid toolChanger command");
    }

    #[test]
    fn well_formed_tool_changer_dispatches_and_reports_ok() {
        let processor = CommandProcessor::new(|command: Command, _: Duration| -> Result<String> {
            assert_eq!(command, Command::ToolChanger { position: Arm::Left, action: ToolChangerAction::Open });
            Ok(String::new())
        });
        let response = processor.process(&json!({"type": "toolChanger", "position": "Left", "action": "Open"}));
        assert_eq!(response["status"], "OK");
    }

    #[test]
    fn dispatch_failure_surfaces_as_error_message() {
        let processor = CommandProcessor::new(|_: Command, _: Duration| -> Result<String> { Err(Error::NotReady) });
        let response = processor.process(&json!({"type": "contecDiagnostics"}));
        assert_eq!(response["status"], "Error");
        assert_eq!(response["message"], "not ready");
    }

    #[test]
    fn diagnostics_payload_is_embedded_as_response() {
        let processor = CommandProcessor::new(|_: Command, _: Duration| -> Result<String> {
            Ok(json!({"alarm": {"known": true}}).to_string())
        });
        let response = processor.process(&json!({"type": "motorDiagnostics", "motor": "XLeft"}));
        assert_eq!(response["status"], "OK");
        assert_eq!(response["response"]["alarm"]["known"], true);
    }
}

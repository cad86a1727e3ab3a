//! Shared robot-domain data model: enumerations and the RobotStatus snapshot.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

macro_rules! wire_enum {
    ($name:ident { $($variant:ident),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// All variants, in declaration order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $($name::$variant => write!(f, stringify!($variant))),+
                }
            }
        }

        impl FromStr for $name {
            type Err = Error;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $(stringify!($variant) => Ok($name::$variant),)+
                    other => Err(Error::config(format!(
                        concat!("unknown ", stringify!($name), " value '{}'"),
                        other
                    ))),
                }
            }
        }
    };
}

wire_enum!(Motor { XLeft, XRight, YLeft, YRight, ZLeft, ZRight });
wire_enum!(Arm { Left, Right, Gantry });
wire_enum!(RobotComponent { Contec, MotorControl, ControlPanel });
wire_enum!(LedState { On, Off, Error, ErrorBlinking, Warning });
wire_enum!(ToolChangerAction { Open, Close });
wire_enum!(ToolChangerFlag { ProxSen, OpenSen, ClosedSen, OpenValve, ClosedValve });
wire_enum!(MotorStatusFlag { BrakeApplied, Enabled, Error });

/// Current reported state of a single motor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SingleMotorStatus {
    /// the motor's current position in driver pulses
    #[serde(rename = "currentPosition")]
    pub current_position: f64,
    /// the motor's requested target position in driver pulses
    #[serde(rename = "targetPosition")]
    pub target_position: f64,
    /// current speed in driver pulses/s
    pub speed: f64,
    /// current torque, driver units
    pub torque: i32,
    /// status flags, normalized to LED-panel colors
    pub flags: BTreeMap<MotorStatusFlag, LedState>,
}

/// Current reported state of one arm's tool changer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolChangerStatus {
    /// status flags, normalized to LED-panel colors
    pub flags: BTreeMap<ToolChangerFlag, LedState>,
}

/// Normalized joystick reading for one arm's control-panel stick
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct JoystickStatus {
    /// horizontal axis, normalized to [-1, 1]
    pub x: f64,
    /// vertical axis, normalized to [-1, 1]
    pub y: f64,
    /// debounced button state
    pub btn: bool,
}

/// The canonical robot-status snapshot, published at each control-loop update tick
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RobotStatus {
    /// per-motor status
    pub motors: BTreeMap<Motor, SingleMotorStatus>,
    /// per-arm tool-changer status
    #[serde(rename = "toolChangers")]
    pub tool_changers: BTreeMap<Arm, ToolChangerStatus>,
    /// hardware-subsystem health, as LED colors
    #[serde(rename = "robotComponents")]
    pub robot_components: BTreeMap<RobotComponent, LedState>,
    /// per-arm joystick reading
    #[serde(rename = "joystics")]
    pub joysticks: BTreeMap<Arm, JoystickStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_round_trips_through_display_and_from_str() {
        for m in Motor::ALL {
            let parsed: Motor = m.to_string().parse().unwrap();
            assert_eq!(parsed, *m);
        }
        assert_eq!(Motor::XLeft.to_string(), "XLeft");
    }

    #[test]
    fn unknown_enum_value_is_config_error() {
        let err = "nonsense".parse::<Arm>().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn robot_status_serializes_with_expected_keys() {
        let mut status = RobotStatus::default();
        status.robot_components.insert(RobotComponent::Contec, LedState::On);
        let json = serde_json::to_value(&status).unwrap();
        assert!(json.get("robotComponents").is_some());
        assert!(json.get("joystics").is_some());
    }
}

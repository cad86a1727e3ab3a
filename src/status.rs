//! Assembles a [`RobotStatus`] snapshot from the live component state each control-loop update
//! tick: component health as LED colors, the control panel's joystick snapshot, Contec's
//! discrete I/O mapped to tool-changer flags, and per-motor position/speed/flags.
use std::collections::BTreeMap;

use crate::component::Component;
use crate::config::MachineConfig;
use crate::contec::Contec;
use crate::control_panel::ControlPanel;
use crate::motor::{DirectIoStatus, FlagStatus};
use crate::motor_control::MotorControl;
use crate::types::{Arm, LedState, Motor as MotorId, RobotComponent, RobotStatus, SingleMotorStatus, ToolChangerFlag};

/// Order [`crate::control_panel::Snapshot::joysticks`] is published in.
const JOYSTICK_ARMS: [Arm; 3] = [Arm::Gantry, Arm::Left, Arm::Right];

/// Builds [`RobotStatus`] snapshots from the named digital-IO mapping plus the three hardware
/// components.
pub struct StatusBuilder {
    motor_ids: Vec<MotorId>,
    input_mapping: BTreeMap<String, usize>,
    output_mapping: BTreeMap<String, usize>,
}

impl StatusBuilder {
    /// `motor_ids` should be the configured `MotorControl.motors` keys.
    pub fn new(machine: &MachineConfig, motor_ids: Vec<MotorId>) -> Self {
        Self { motor_ids, input_mapping: machine.input_mapping.clone(), output_mapping: machine.output_mapping.clone() }
    }

    /// Assemble one status snapshot. Never fails: a subsystem that can't be read reports Error
    /// flags for the status fields it would have populated, rather than aborting the snapshot.
    /// `blink_tool_changers` overrides both arms' ProxSen flags to [`LedState::ErrorBlinking`]
    /// when the most recent control-policy evaluation asked for it (e.g. Contec was unavailable
    /// when the policy last ran), taking priority over the raw button mapping.
    pub fn build(&self, contec: &Contec, control_panel: &ControlPanel, motor_control: &MotorControl, blink_tool_changers: bool) -> RobotStatus {
        let mut status = RobotStatus::default();
        status.robot_components.insert(RobotComponent::Contec, contec.state().led_state());
        status.robot_components.insert(RobotComponent::ControlPanel, control_panel.state().led_state());
        status.robot_components.insert(RobotComponent::MotorControl, motor_control.state().led_state());

        self.fill_joysticks(control_panel, &mut status);
        self.fill_tool_changers(contec, &mut status);
        if blink_tool_changers {
            for arm in [Arm::Left, Arm::Right] {
                status.tool_changers.entry(arm).or_default().flags.insert(ToolChangerFlag::ProxSen, LedState::ErrorBlinking);
            }
        }
        self.fill_motors(motor_control, &mut status);
        status
    }

    /// A status carrying only the current joystick snapshot, with every other field left at its
    /// default. Used by the control step every cycle, since policy evaluation needs live
    /// joystick state but not a full I/O round-trip.
    pub fn joystick_status(&self, control_panel: &ControlPanel) -> RobotStatus {
        let mut status = RobotStatus::default();
        self.fill_joysticks(control_panel, &mut status);
        status
    }

    fn fill_joysticks(&self, control_panel: &ControlPanel, status: &mut RobotStatus) {
        let snapshot = control_panel.snapshot();
        for (arm, reading) in JOYSTICK_ARMS.into_iter().zip(snapshot.joysticks) {
            status.joysticks.insert(arm, reading);
        }
    }

    fn mapped_input(&self, inputs: &[bool], name: &str) -> Option<bool> {
        self.input_mapping.get(name).and_then(|&index| inputs.get(index)).copied()
    }

    fn mapped_output(&self, outputs: &[bool], name: &str) -> Option<bool> {
        self.output_mapping.get(name).and_then(|&index| outputs.get(index)).copied()
    }

    fn fill_tool_changers(&self, contec: &Contec, status: &mut RobotStatus) {
        let left = status.tool_changers.entry(Arm::Left).or_default();
        let right = status.tool_changers.entry(Arm::Right).or_default();

        match contec.read_inputs() {
            Ok(inputs) => {
                let button1 = self.mapped_input(&inputs, "button1").unwrap_or(false);
                let button2 = self.mapped_input(&inputs, "button2").unwrap_or(false);
                left.flags.insert(ToolChangerFlag::ProxSen, on_off(button1));
                right.flags.insert(ToolChangerFlag::ProxSen, on_off(button2));
            }
            Err(e) => {
                log::warn!("StatusBuilder: Contec inputs unavailable: {}", e);
                left.flags.insert(ToolChangerFlag::ProxSen, LedState::Error);
                right.flags.insert(ToolChangerFlag::ProxSen, LedState::Error);
            }
        }

        match contec.read_outputs() {
            Ok(outputs) => {
                if let Some(open) = self.mapped_output(&outputs, "toolChangerLeft") {
                    left.flags.insert(ToolChangerFlag::OpenValve, on_off(open));
                    left.flags.insert(ToolChangerFlag::ClosedValve, on_off(!open));
                } else {
                    left.flags.insert(ToolChangerFlag::OpenValve, LedState::Error);
                    left.flags.insert(ToolChangerFlag::ClosedValve, LedState::Error);
                }
                if let Some(open) = self.mapped_output(&outputs, "toolChangerRight") {
                    right.flags.insert(ToolChangerFlag::OpenValve, on_off(open));
                    right.flags.insert(ToolChangerFlag::ClosedValve, on_off(!open));
                } else {
                    right.flags.insert(ToolChangerFlag::OpenValve, LedState::Error);
                    right.flags.insert(ToolChangerFlag::ClosedValve, LedState::Error);
                }
            }
            Err(e) => {
                log::warn!("StatusBuilder: Contec outputs unavailable: {}", e);
                for flag in [ToolChangerFlag::OpenValve, ToolChangerFlag::ClosedValve] {
                    left.flags.insert(flag, LedState::Error);
                    right.flags.insert(flag, LedState::Error);
                }
            }
        }
    }

    fn fill_motors(&self, motor_control: &MotorControl, status: &mut RobotStatus) {
        for &id in &self.motor_ids {
            status.motors.insert(id, self.read_motor_status(motor_control, id));
        }
    }

    fn read_motor_status(&self, motor_control: &MotorControl, id: MotorId) -> SingleMotorStatus {
        let reading = (|| -> crate::Result<SingleMotorStatus> {
            let current_position = motor_control.read_actual_position(id)?;
            let target_position = motor_control.target_position(id)?;
            let speed = motor_control.target_speed(id)?;
            let output_status = motor_control.read_output_status(id)?;
            let direct_io = motor_control.read_direct_io_status(id)?;
            Ok(SingleMotorStatus {
                current_position: f64::from(current_position),
                target_position: f64::from(target_position),
                speed: f64::from(speed),
                torque: 0,
                flags: motor_status_flags(&output_status, &direct_io),
            })
        })();
        match reading {
            Ok(status) => status,
            Err(e) => {
                log::warn!("StatusBuilder: motor {} status unavailable: {}", id, e);
                let mut status = SingleMotorStatus::default();
                status.flags.insert(crate::types::MotorStatusFlag::BrakeApplied, LedState::Error);
                status.flags.insert(crate::types::MotorStatusFlag::Enabled, LedState::Error);
                status.flags.insert(crate::types::MotorStatusFlag::Error, LedState::Error);
                status
            }
        }
    }
}

fn on_off(active: bool) -> LedState {
    if active {
        LedState::On
    } else {
        LedState::Off
    }
}

fn motor_status_flags(output_status: &FlagStatus, direct_io: &DirectIoStatus) -> BTreeMap<crate::types::MotorStatusFlag, LedState> {
    use crate::types::MotorStatusFlag;
    let mut flags = BTreeMap::new();
    flags.insert(MotorStatusFlag::BrakeApplied, on_off(direct_io.active_flags.contains(&"MB")));
    flags.insert(MotorStatusFlag::Enabled, on_off(output_status.active_flags.contains(&"READY")));
    flags.insert(
        MotorStatusFlag::Error,
        if output_status.active_flags.contains(&"ALM") {
            LedState::Error
        } else if output_status.active_flags.contains(&"WNG") {
            LedState::Warning
        } else {
            LedState::On
        },
    );
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn machine_cfg() -> MachineConfig {
        Config::parse(
            &serde_json::json!({
                "classes": {
                    "Contec": {"ipAddress": "127.0.0.1", "port": 502, "slaveId": 1, "nDI": 2, "nDO": 2},
                    "ControlPanel": {"comm": {"type": "serial", "serial": {"port": "/dev/ttyUSB0"}}},
                    "MotorControl": {
                        "model": "AR-KD2",
                        "transport": {"type": "serialRtu", "serial": {"device": "/dev/ttyUSB1", "baud": 115200, "parity": "N", "dataBits": 8, "stopBits": 1}},
                        "motors": {"XLeft": {"address": 7}},
                    },
                    "Machine": {
                        "loopIntervalMS": 10,
                        "updateIntervalMS": 100,
                        "inputMapping": {"button1": 0, "button2": 1},
                        "outputMapping": {"toolChangerLeft": 0, "toolChangerRight": 1},
                    },
                    "RimoServer": {"statusAddress": "tcp://*:5556", "commandAddress": "tcp://*:5557"},
                }
            })
            .to_string(),
        )
        .unwrap()
        .machine
    }

    fn full_config() -> Config {
        Config::parse(
            &serde_json::json!({
                "classes": {
                    "Contec": {"ipAddress": "127.0.0.1", "port": 15099, "slaveId": 1, "nDI": 2, "nDO": 2},
                    "ControlPanel": {"comm": {"type": "serial", "serial": {"port": "/dev/ttyUSB0"}}},
                    "MotorControl": {
                        "model": "AR-KD2",
                        "transport": {"type": "serialRtu", "serial": {"device": "/dev/ttyUSB1", "baud": 115200, "parity": "N", "dataBits": 8, "stopBits": 1}},
                        "motors": {"XLeft": {"address": 7}},
                    },
                    "Machine": {"loopIntervalMS": 10, "updateIntervalMS": 100},
                    "RimoServer": {"statusAddress": "tcp://*:5556", "commandAddress": "tcp://*:5557"},
                }
            })
            .to_string(),
        )
        .unwrap()
    }

    #[test]
    fn disconnected_components_report_error_everywhere() {
        let builder = StatusBuilder::new(&machine_cfg(), vec![MotorId::XLeft]);
        let config = full_config();
        let contec = Contec::new(&config.contec);
        let control_panel = ControlPanel::new(&config.control_panel).unwrap();
        let motor_control = MotorControl::new(&config.motor_control);

        let status = builder.build(&contec, &control_panel, &motor_control, false);
        assert_eq!(status.robot_components[&RobotComponent::Contec], LedState::Error);
        assert_eq!(status.tool_changers[&Arm::Left].flags[&ToolChangerFlag::ProxSen], LedState::Error);
        assert_eq!(status.tool_changers[&Arm::Right].flags[&ToolChangerFlag::OpenValve], LedState::Error);
        let motor_status = &status.motors[&MotorId::XLeft];
        assert_eq!(motor_status.flags[&crate::types::MotorStatusFlag::Enabled], LedState::Error);
    }

    #[test]
    fn blink_override_forces_error_blinking_regardless_of_inputs() {
        let builder = StatusBuilder::new(&machine_cfg(), vec![]);
        let config = full_config();
        let contec = Contec::new(&config.contec);
        let control_panel = ControlPanel::new(&config.control_panel).unwrap();
        let motor_control = MotorControl::new(&config.motor_control);
        let status = builder.build(&contec, &control_panel, &motor_control, true);
        assert_eq!(status.tool_changers[&Arm::Left].flags[&ToolChangerFlag::ProxSen], LedState::ErrorBlinking);
        assert_eq!(status.tool_changers[&Arm::Right].flags[&ToolChangerFlag::ProxSen], LedState::ErrorBlinking);
    }

    #[test]
    fn joystick_snapshot_is_assigned_to_declared_arm_order() {
        let builder = StatusBuilder::new(&machine_cfg(), vec![]);
        assert_eq!(JOYSTICK_ARMS, [Arm::Gantry, Arm::Left, Arm::Right]);
        let _ = builder;
    }
}

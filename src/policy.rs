//! Reactive control policy: a pure function from inputs + component health + current status to
//! output signals, tool-changer error-blinking and motor intents. No I/O of its own.
use std::collections::BTreeMap;

use crate::component::ComponentState;
use crate::motor_control::{Direction, Mode};
use crate::types::{Arm, Motor, RobotStatus};
use crate::{Error, Result};

/// A Speed- or Position-mode adjustment to apply to one motor, emitted by a policy and executed
/// by MotorControl on the control thread after the current cycle's outputs are applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorIntent {
    /// which motor this intent targets
    pub motor: Motor,
    /// operating mode to select, if any
    pub mode: Option<Mode>,
    /// direction to select, if any
    pub direction: Option<Direction>,
    /// Speed-mode magnitude, driver pulses/s
    pub speed: Option<i32>,
    /// Position-mode target, driver pulses
    pub position: Option<i32>,
    /// whether to pulse/engage movement this cycle
    pub start_movement: Option<bool>,
}

impl MotorIntent {
    fn new(motor: Motor) -> Self {
        Self { motor, mode: None, direction: None, speed: None, position: None, start_movement: None }
    }
}

/// What a policy evaluation produces for one control cycle.
#[derive(Debug, Clone, Default)]
pub struct PolicyOutput {
    /// named digital outputs to write to Contec, if the policy decided to drive any this cycle
    pub outputs: Option<BTreeMap<String, bool>>,
    /// whether every tool changer's ProxSen flag should report Error this cycle
    pub set_tool_changer_error_blinking: bool,
    /// motor adjustments to apply after this cycle's outputs
    pub motor_intents: Vec<MotorIntent>,
}

/// A reactive control policy.
pub trait RobotControlPolicy {
    /// Evaluate one control cycle. `inputs` is the named digital-input snapshot (absent when
    /// Contec has never produced one); `contec_state` reflects Contec's current health.
    fn evaluate(
        &self,
        inputs: Option<&BTreeMap<String, bool>>,
        contec_state: ComponentState,
        status: &RobotStatus,
    ) -> Result<PolicyOutput>;
}

/// `light1 = button1`, `light2 = button2`; error-blinks the tool changers whenever inputs are
/// unavailable or Contec is unhealthy.
#[derive(Debug, Default)]
pub struct DefaultPolicy;

impl DefaultPolicy {
    fn evaluate_inner(
        inputs: Option<&BTreeMap<String, bool>>,
        contec_state: ComponentState,
    ) -> Result<PolicyOutput> {
        let inputs = match inputs {
            Some(inputs) if contec_state != ComponentState::Error => inputs,
            _ => {
                return Ok(PolicyOutput {
                    outputs: None,
                    set_tool_changer_error_blinking: true,
                    motor_intents: Vec::new(),
                })
            }
        };
        let button1 = *inputs
            .get("button1")
            .ok_or_else(|| Error::config("RobotControlPolicy requires input 'button1'"))?;
        let button2 = *inputs
            .get("button2")
            .ok_or_else(|| Error::config("RobotControlPolicy requires input 'button2'"))?;
        let mut outputs = BTreeMap::new();
        outputs.insert("light1".to_owned(), button1);
        outputs.insert("light2".to_owned(), button2);
        Ok(PolicyOutput { outputs: Some(outputs), set_tool_changer_error_blinking: false, motor_intents: Vec::new() })
    }
}

impl RobotControlPolicy for DefaultPolicy {
    fn evaluate(
        &self,
        inputs: Option<&BTreeMap<String, bool>>,
        contec_state: ComponentState,
        _status: &RobotStatus,
    ) -> Result<PolicyOutput> {
        Self::evaluate_inner(inputs, contec_state)
    }
}

/// Top speed commanded at full joystick deflection, driver pulses/s.
pub const MAX_SPEED: f64 = 1000.0;
/// Jog distance commanded at full joystick deflection while a joystick button is held, driver
/// pulses.
pub const MAX_JOG_POSITION: f64 = 2000.0;

/// Extends [`DefaultPolicy`] with joystick-driven motor intents: each of the three joysticks
/// (Gantry, Left, Right) drives the pair of motors sharing its side, moving both together on
/// that joystick's y-axis. Released: Speed-mode, magnitude `round(|y| * MAX_SPEED)`, direction
/// from the sign of y. Held: Position-mode, one-shot jog to `round(y * MAX_JOG_POSITION)`.
#[derive(Debug, Default)]
pub struct RimoKunPolicy;

fn motors_for_arm(arm: Arm) -> [Motor; 2] {
    match arm {
        Arm::Left => [Motor::XLeft, Motor::YLeft],
        Arm::Right => [Motor::XRight, Motor::YRight],
        Arm::Gantry => [Motor::ZLeft, Motor::ZRight],
    }
}

fn joystick_intents(arm: Arm, x: f64, y: f64, pressed: bool) -> [MotorIntent; 2] {
    let _ = x; // unused: only y drives motion, matching the resolved scaling rule
    let [a, b] = motors_for_arm(arm);
    let mut ia = MotorIntent::new(a);
    let mut ib = MotorIntent::new(b);
    if pressed {
        let target = (y * MAX_JOG_POSITION).round() as i32;
        for intent in [&mut ia, &mut ib] {
            intent.mode = Some(Mode::Position);
            intent.position = Some(target);
            intent.start_movement = Some(true);
        }
    } else {
        let speed = (y.abs() * MAX_SPEED).round() as i32;
        let direction = if y >= 0.0 { Direction::Forward } else { Direction::Reverse };
        for intent in [&mut ia, &mut ib] {
            intent.mode = Some(Mode::Speed);
            intent.speed = Some(speed);
            intent.direction = Some(direction);
            intent.start_movement = Some(true);
        }
    }
    [ia, ib]
}

impl RobotControlPolicy for RimoKunPolicy {
    fn evaluate(
        &self,
        inputs: Option<&BTreeMap<String, bool>>,
        contec_state: ComponentState,
        status: &RobotStatus,
    ) -> Result<PolicyOutput> {
        let mut output = DefaultPolicy::evaluate_inner(inputs, contec_state)?;
        for arm in [Arm::Gantry, Arm::Left, Arm::Right] {
            if let Some(joystick) = status.joysticks.get(&arm) {
                output.motor_intents.extend(joystick_intents(arm, joystick.x, joystick.y, joystick.btn));
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JoystickStatus;

    fn inputs(button1: bool, button2: bool) -> BTreeMap<String, bool> {
        let mut m = BTreeMap::new();
        m.insert("button1".to_owned(), button1);
        m.insert("button2".to_owned(), button2);
        m
    }

    #[test]
    fn default_policy_blinks_tool_changers_without_inputs() {
        let out = DefaultPolicy.evaluate(None, ComponentState::Normal, &RobotStatus::default()).unwrap();
        assert!(out.set_tool_changer_error_blinking);
        assert!(out.outputs.is_none());
    }

    #[test]
    fn default_policy_blinks_tool_changers_when_contec_errors() {
        let out = DefaultPolicy.evaluate(Some(&inputs(true, false)), ComponentState::Error, &RobotStatus::default()).unwrap();
        assert!(out.set_tool_changer_error_blinking);
    }

    #[test]
    fn default_policy_mirrors_buttons_to_lights() {
        let out = DefaultPolicy.evaluate(Some(&inputs(true, false)), ComponentState::Normal, &RobotStatus::default()).unwrap();
        let outputs = out.outputs.unwrap();
        assert_eq!(outputs["light1"], true);
        assert_eq!(outputs["light2"], false);
    }

    #[test]
    fn default_policy_requires_button_keys() {
        let mut partial = BTreeMap::new();
        partial.insert("button1".to_owned(), true);
        let err = DefaultPolicy.evaluate(Some(&partial), ComponentState::Normal, &RobotStatus::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rimokun_centered_joystick_is_inert() {
        let mut status = RobotStatus::default();
        status.joysticks.insert(Arm::Left, JoystickStatus { x: 0.0, y: 0.0, btn: false });
        let out = RimoKunPolicy.evaluate(Some(&inputs(false, false)), ComponentState::Normal, &status).unwrap();
        let left = out.motor_intents.iter().find(|i| i.motor == Motor::XLeft).unwrap();
        assert_eq!(left.speed, Some(0));
    }

    #[test]
    fn rimokun_full_deflection_hits_max_speed() {
        let mut status = RobotStatus::default();
        status.joysticks.insert(Arm::Right, JoystickStatus { x: 0.0, y: -1.0, btn: false });
        let out = RimoKunPolicy.evaluate(Some(&inputs(false, false)), ComponentState::Normal, &status).unwrap();
        let right = out.motor_intents.iter().find(|i| i.motor == Motor::XRight).unwrap();
        assert_eq!(right.speed, Some(1000));
        assert_eq!(right.direction, Some(Direction::Reverse));
    }

    #[test]
    fn rimokun_pressed_joystick_emits_position_jog() {
        let mut status = RobotStatus::default();
        status.joysticks.insert(Arm::Gantry, JoystickStatus { x: 0.0, y: 0.5, btn: true });
        let out = RimoKunPolicy.evaluate(Some(&inputs(false, false)), ComponentState::Normal, &status).unwrap();
        let z = out.motor_intents.iter().find(|i| i.motor == Motor::ZLeft).unwrap();
        assert_eq!(z.mode, Some(Mode::Position));
        assert_eq!(z.position, Some(1000));
        assert_eq!(z.start_movement, Some(true));
    }
}

//! Fleet-level orchestrator over one shared Modbus RTU link: one [`crate::motor::Motor`] (and its
//! own [`ModbusBus`] transaction view) per configured axis, a per-motor runtime state, and a
//! single mutex serializing every bus operation across the fleet.
use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::Mutex;

use crate::comm::serial::{self, SerialConfig};
use crate::comm::Client;
use crate::component::{Component, ComponentState};
use crate::config::MotorControlConfig;
use crate::modbus::ModbusBus;
use crate::motor::{self, CodeDiagnostic, DirectIoStatus, FlagStatus, Motor, MotorRegisterMap};
use crate::types::{Motor as MotorId, RobotComponent};
use crate::{Error, Result};

/// Which speed/position source a motor is currently driven from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// continuous-speed pair, buffered-switched on update
    Speed,
    /// single-motion incremental positioning on operation slot 2
    Position,
}

/// Commanded rotation sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// FWD input flag
    Forward,
    /// RVS input flag
    Reverse,
}

/// Driver operation-data positioning mode (op-data register encoding is an implementation
/// choice; see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    /// absolute position
    Absolute,
    /// relative to current position
    Incremental,
}

/// Driver operation-data motion function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationFunction {
    /// single positioning move
    SingleMotion,
    /// continuous motion, linked to the next operation slot
    ContinuousLinked,
}

const DEFAULT_ACCEL: i32 = 0x5FFF;
const DEFAULT_DECEL: i32 = 0x5FFF;
const MAX_CURRENT: i32 = 1000;
/// Slot used for single-shot positioning moves; slots 0/1 are reserved for the speed pair.
const POSITION_SLOT: u8 = 2;

struct RuntimeState {
    mode: Mode,
    direction: Direction,
    speed: i32,
    position: i32,
    acceleration: i32,
    deceleration: i32,
    speed_pair_prepared: bool,
    position_prepared: bool,
    selected_operation_id: u8,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            mode: Mode::Speed,
            direction: Direction::Forward,
            speed: 1000,
            position: 0,
            acceleration: DEFAULT_ACCEL,
            deceleration: DEFAULT_DECEL,
            speed_pair_prepared: false,
            position_prepared: false,
            selected_operation_id: 0,
        }
    }
}

struct MotorEntry {
    motor: Motor,
    bus: ModbusBus,
    runtime: RuntimeState,
    run_current: i32,
    stop_current: i32,
}

struct Inner {
    client: Option<Client>,
    motors: BTreeMap<MotorId, MotorEntry>,
}

/// Fleet-level motor orchestrator.
pub struct MotorControl {
    serial: SerialConfig,
    register_map: MotorRegisterMap,
    addresses: BTreeMap<MotorId, u8>,
    currents: BTreeMap<MotorId, (i32, i32)>,
    inner: Mutex<Inner>,
    state: Mutex<ComponentState>,
}

fn entry_mut<'a>(inner: &'a mut Inner, id: MotorId) -> Result<&'a mut MotorEntry> {
    inner.motors.get_mut(&id).ok_or_else(|| Error::rejected(format!("motor {} is not configured in MotorControl", id)))
}

impl MotorControl {
    /// Build a MotorControl instance from its configuration section. Does not connect.
    pub fn new(cfg: &MotorControlConfig) -> Self {
        let mut addresses = BTreeMap::new();
        let mut currents = BTreeMap::new();
        for (motor, entry) in &cfg.motors {
            addresses.insert(*motor, entry.address);
            currents.insert(
                *motor,
                (entry.run_current.map(i32::from).unwrap_or(1000), entry.stop_current.map(i32::from).unwrap_or(500)),
            );
        }
        Self {
            serial: SerialConfig {
                device: cfg.transport.serial.device.clone(),
                baud: cfg.transport.serial.baud,
                data_bits: cfg.transport.serial.data_bits,
                parity: cfg.transport.serial.parity,
                stop_bits: cfg.transport.serial.stop_bits,
                read_timeout: Duration::from_millis(cfg.response_timeout_ms),
                frame_delay: Duration::ZERO,
            },
            register_map: motor::ar_kd2(),
            addresses,
            currents,
            inner: Mutex::new(Inner { client: None, motors: BTreeMap::new() }),
            state: Mutex::new(ComponentState::Error),
        }
    }

    fn fail(&self, inner: &mut Inner, err: Error) -> Error {
        inner.client = None;
        inner.motors.clear();
        *self.state.lock() = ComponentState::Error;
        err
    }

    /// Configured (or AR-KD2-default) run/stop current for a motor.
    pub fn configured_currents(&self, id: MotorId) -> Result<(i32, i32)> {
        self.currents
            .get(&id)
            .copied()
            .ok_or_else(|| Error::rejected(format!("motor {} is not configured in MotorControl", id)))
    }

    fn validate_current(current: i32) -> Result<()> {
        if !(0..=MAX_CURRENT).contains(&current) {
            return Err(Error::rejected(format!("current {} out of range 0..{}", current, MAX_CURRENT)));
        }
        Ok(())
    }

    fn set_operation_mode_raw(motor: &Motor, bus: &mut ModbusBus, op_id: u8, mode: OperationMode) -> Result<()> {
        let value = match mode {
            OperationMode::Absolute => 0,
            OperationMode::Incremental => 1,
        };
        motor.write_int32(bus, motor::register_map::operation_offset(motor.map().operation_mode_no0, op_id), value)
    }

    fn set_operation_function_raw(motor: &Motor, bus: &mut ModbusBus, op_id: u8, function: OperationFunction) -> Result<()> {
        let value = match function {
            OperationFunction::SingleMotion => 0,
            OperationFunction::ContinuousLinked => 1,
        };
        motor.write_int32(bus, motor::register_map::operation_offset(motor.map().operation_mode_no0, op_id) + 1, value)
    }

    fn set_operation_position_raw(motor: &Motor, bus: &mut ModbusBus, op_id: u8, position: i32) -> Result<()> {
        motor.write_int32(bus, motor::register_map::operation_offset(motor.map().position_no0, op_id), position)
    }

    fn set_operation_speed_raw(motor: &Motor, bus: &mut ModbusBus, op_id: u8, speed: i32) -> Result<()> {
        motor.write_int32(bus, motor::register_map::operation_offset(motor.map().speed_no0, op_id), speed)
    }

    fn set_operation_acceleration_raw(motor: &Motor, bus: &mut ModbusBus, op_id: u8, acceleration: i32) -> Result<()> {
        motor.write_int32(bus, motor::register_map::operation_offset(motor.map().acceleration_no0, op_id), acceleration)
    }

    fn set_operation_deceleration_raw(motor: &Motor, bus: &mut ModbusBus, op_id: u8, deceleration: i32) -> Result<()> {
        motor.write_int32(bus, motor::register_map::operation_offset(motor.map().deceleration_no0, op_id), deceleration)
    }

    /// Configure operation slots 0 and 1 as a linked constant-speed pair and select slot 0.
    fn configure_constant_speed_pair_raw(
        motor: &Motor,
        bus: &mut ModbusBus,
        speed_op0: i32,
        speed_op1: i32,
        acceleration: i32,
        deceleration: i32,
    ) -> Result<()> {
        for (op_id, speed) in [(0u8, speed_op0), (1u8, speed_op1)] {
            Self::set_operation_mode_raw(motor, bus, op_id, OperationMode::Incremental)?;
            Self::set_operation_function_raw(motor, bus, op_id, OperationFunction::ContinuousLinked)?;
            Self::set_operation_speed_raw(motor, bus, op_id, speed)?;
            Self::set_operation_acceleration_raw(motor, bus, op_id, acceleration)?;
            Self::set_operation_deceleration_raw(motor, bus, op_id, deceleration)?;
        }
        motor.set_selected_operation_id(bus, 0)
    }

    /// Write the new speed into the operation slot that is not currently selected (per the
    /// cached runtime state, never a bus read), then switch selection to it.
    fn update_constant_speed_buffered_raw(motor: &Motor, bus: &mut ModbusBus, runtime: &mut RuntimeState, speed: i32) -> Result<()> {
        let inactive = if runtime.selected_operation_id == 0 { 1 } else { 0 };
        Self::set_operation_speed_raw(motor, bus, inactive, speed)?;
        motor.set_selected_operation_id(bus, inactive)?;
        runtime.selected_operation_id = inactive;
        Ok(())
    }

    fn prepare_position_slot(motor: &Motor, bus: &mut ModbusBus, runtime: &mut RuntimeState) -> Result<()> {
        if runtime.position_prepared {
            return Ok(());
        }
        Self::set_operation_mode_raw(motor, bus, POSITION_SLOT, OperationMode::Incremental)?;
        Self::set_operation_function_raw(motor, bus, POSITION_SLOT, OperationFunction::SingleMotion)?;
        Self::set_operation_speed_raw(motor, bus, POSITION_SLOT, runtime.speed)?;
        Self::set_operation_acceleration_raw(motor, bus, POSITION_SLOT, runtime.acceleration)?;
        Self::set_operation_deceleration_raw(motor, bus, POSITION_SLOT, runtime.deceleration)?;
        runtime.position_prepared = true;
        Ok(())
    }

    fn prepare_speed_pair(motor: &Motor, bus: &mut ModbusBus, runtime: &mut RuntimeState) -> Result<()> {
        if runtime.speed_pair_prepared {
            return Ok(());
        }
        Self::configure_constant_speed_pair_raw(motor, bus, runtime.speed, runtime.speed, runtime.acceleration, runtime.deceleration)?;
        runtime.speed_pair_prepared = true;
        runtime.selected_operation_id = 0;
        Ok(())
    }

    fn apply_direction(motor: &Motor, bus: &mut ModbusBus, direction: Direction) -> Result<()> {
        match direction {
            Direction::Forward => {
                motor.set_reverse(bus, false)?;
                motor.set_forward(bus, true)
            }
            Direction::Reverse => {
                motor.set_forward(bus, false)?;
                motor.set_reverse(bus, true)
            }
        }
    }

    fn start_movement_raw(entry: &mut MotorEntry) -> Result<()> {
        match entry.runtime.mode {
            Mode::Speed => {
                Self::prepare_speed_pair(&entry.motor, &mut entry.bus, &mut entry.runtime)?;
                Self::apply_direction(&entry.motor, &mut entry.bus, entry.runtime.direction)
            }
            Mode::Position => {
                Self::prepare_position_slot(&entry.motor, &mut entry.bus, &mut entry.runtime)?;
                Self::set_operation_position_raw(&entry.motor, &mut entry.bus, POSITION_SLOT, entry.runtime.position)?;
                entry.motor.set_selected_operation_id(&mut entry.bus, POSITION_SLOT)?;
                entry.runtime.selected_operation_id = POSITION_SLOT;
                entry.motor.pulse_start(&mut entry.bus)
            }
        }
    }

    /// Select which register set (speed pair vs. position slot 2) drives the motor.
    pub fn set_mode(&self, id: MotorId, mode: Mode) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.client.is_none() {
            return Err(Error::NotReady);
        }
        let entry = entry_mut(&mut inner, id)?;
        entry.runtime.mode = mode;
        let result = match mode {
            Mode::Speed => Self::prepare_speed_pair(&entry.motor, &mut entry.bus, &mut entry.runtime),
            Mode::Position => Self::prepare_position_slot(&entry.motor, &mut entry.bus, &mut entry.runtime),
        };
        result.map_err(|e| self.fail(&mut inner, e))
    }

    /// Store `|v|`; in Speed mode, perform a buffered switch (preparing the pair first if needed).
    pub fn set_speed(&self, id: MotorId, speed: i32) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.client.is_none() {
            return Err(Error::NotReady);
        }
        let entry = entry_mut(&mut inner, id)?;
        let abs_speed = speed.unsigned_abs() as i32;
        entry.runtime.speed = abs_speed;
        if entry.runtime.mode != Mode::Speed {
            return Ok(());
        }
        let result = if !entry.runtime.speed_pair_prepared {
            Self::prepare_speed_pair(&entry.motor, &mut entry.bus, &mut entry.runtime)
        } else {
            Self::update_constant_speed_buffered_raw(&entry.motor, &mut entry.bus, &mut entry.runtime, abs_speed)
        };
        result.map_err(|e| self.fail(&mut inner, e))
    }

    /// Store `p`; in Position mode, write it into operation slot 2's position register.
    pub fn set_position(&self, id: MotorId, position: i32) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.client.is_none() {
            return Err(Error::NotReady);
        }
        let entry = entry_mut(&mut inner, id)?;
        entry.runtime.position = position;
        if entry.runtime.mode != Mode::Position {
            return Ok(());
        }
        let result = Self::prepare_position_slot(&entry.motor, &mut entry.bus, &mut entry.runtime)
            .and_then(|_| Self::set_operation_position_raw(&entry.motor, &mut entry.bus, POSITION_SLOT, position));
        result.map_err(|e| self.fail(&mut inner, e))
    }

    /// Set exactly one of the FWD/RVS input flags (the other is cleared first).
    pub fn set_direction(&self, id: MotorId, direction: Direction) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.client.is_none() {
            return Err(Error::NotReady);
        }
        let entry = entry_mut(&mut inner, id)?;
        entry.runtime.direction = direction;
        let result = Self::apply_direction(&entry.motor, &mut entry.bus, direction);
        result.map_err(|e| self.fail(&mut inner, e))
    }

    /// Speed mode: ensure the pair is prepared, then set direction bits (no Start pulse).
    /// Position mode: ensure slot 2 is prepared, write position, select slot 2, pulse Start.
    pub fn start_movement(&self, id: MotorId) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.client.is_none() {
            return Err(Error::NotReady);
        }
        let entry = entry_mut(&mut inner, id)?;
        let result = Self::start_movement_raw(entry);
        result.map_err(|e| self.fail(&mut inner, e))
    }

    /// Clear the driver input command register entirely (no direction, no start).
    pub fn stop_movement(&self, id: MotorId) -> Result<()> {
        self.with_entry(id, |entry| entry.motor.stop_movement(&mut entry.bus))
    }

    /// Momentary Start pulse.
    pub fn pulse_start(&self, id: MotorId) -> Result<()> {
        self.with_entry(id, |entry| entry.motor.pulse_start(&mut entry.bus))
    }

    /// Momentary Stop pulse.
    pub fn pulse_stop(&self, id: MotorId) -> Result<()> {
        self.with_entry(id, |entry| entry.motor.pulse_stop(&mut entry.bus))
    }

    /// Momentary Home pulse.
    pub fn pulse_home(&self, id: MotorId) -> Result<()> {
        self.with_entry(id, |entry| entry.motor.pulse_home(&mut entry.bus))
    }

    /// Direct forward-flag write.
    pub fn set_forward(&self, id: MotorId, enabled: bool) -> Result<()> {
        self.with_entry(id, |entry| entry.motor.set_forward(&mut entry.bus, enabled))
    }

    /// Direct reverse-flag write.
    pub fn set_reverse(&self, id: MotorId, enabled: bool) -> Result<()> {
        self.with_entry(id, |entry| entry.motor.set_reverse(&mut entry.bus, enabled))
    }

    /// Direct positive-jog-flag write.
    pub fn set_jog_plus(&self, id: MotorId, enabled: bool) -> Result<()> {
        self.with_entry(id, |entry| entry.motor.set_jog_plus(&mut entry.bus, enabled))
    }

    /// Direct negative-jog-flag write.
    pub fn set_jog_minus(&self, id: MotorId, enabled: bool) -> Result<()> {
        self.with_entry(id, |entry| entry.motor.set_jog_minus(&mut entry.bus, enabled))
    }

    /// Read back the currently-selected operation id from the live register.
    pub fn read_selected_operation_id(&self, id: MotorId) -> Result<u8> {
        self.with_entry(id, |entry| entry.motor.read_selected_operation_id(&mut entry.bus))
    }

    /// Select operation id `0..=63` directly.
    pub fn set_selected_operation_id(&self, id: MotorId, op_id: u8) -> Result<()> {
        self.with_entry(id, |entry| {
            entry.motor.set_selected_operation_id(&mut entry.bus, op_id)?;
            entry.runtime.selected_operation_id = op_id;
            Ok(())
        })
    }

    /// Write an operation slot's mode register.
    pub fn set_operation_mode(&self, id: MotorId, op_id: u8, mode: OperationMode) -> Result<()> {
        self.with_entry(id, |entry| Self::set_operation_mode_raw(&entry.motor, &mut entry.bus, op_id, mode))
    }

    /// Write an operation slot's function register.
    pub fn set_operation_function(&self, id: MotorId, op_id: u8, function: OperationFunction) -> Result<()> {
        self.with_entry(id, |entry| Self::set_operation_function_raw(&entry.motor, &mut entry.bus, op_id, function))
    }

    /// Write an operation slot's position register.
    pub fn set_operation_position(&self, id: MotorId, op_id: u8, position: i32) -> Result<()> {
        self.with_entry(id, |entry| Self::set_operation_position_raw(&entry.motor, &mut entry.bus, op_id, position))
    }

    /// Write an operation slot's speed register.
    pub fn set_operation_speed(&self, id: MotorId, op_id: u8, speed: i32) -> Result<()> {
        self.with_entry(id, |entry| Self::set_operation_speed_raw(&entry.motor, &mut entry.bus, op_id, speed))
    }

    /// Write an operation slot's acceleration register.
    pub fn set_operation_acceleration(&self, id: MotorId, op_id: u8, acceleration: i32) -> Result<()> {
        self.with_entry(id, |entry| Self::set_operation_acceleration_raw(&entry.motor, &mut entry.bus, op_id, acceleration))
    }

    /// Write an operation slot's deceleration register.
    pub fn set_operation_deceleration(&self, id: MotorId, op_id: u8, deceleration: i32) -> Result<()> {
        self.with_entry(id, |entry| Self::set_operation_deceleration_raw(&entry.motor, &mut entry.bus, op_id, deceleration))
    }

    /// Configure operation slots 0/1 as a linked constant-speed pair.
    pub fn configure_constant_speed_pair(&self, id: MotorId, speed_op0: i32, speed_op1: i32, acceleration: i32, deceleration: i32) -> Result<()> {
        self.with_entry(id, |entry| {
            Self::configure_constant_speed_pair_raw(&entry.motor, &mut entry.bus, speed_op0, speed_op1, acceleration, deceleration)?;
            entry.runtime.speed_pair_prepared = true;
            entry.runtime.selected_operation_id = 0;
            Ok(())
        })
    }

    /// Buffered-switch update of the constant-speed pair (uses the cached selected slot).
    pub fn update_constant_speed_buffered(&self, id: MotorId, speed: i32) -> Result<()> {
        self.with_entry(id, |entry| Self::update_constant_speed_buffered_raw(&entry.motor, &mut entry.bus, &mut entry.runtime, speed))
    }

    /// Write the run current (0..=1000).
    pub fn set_run_current(&self, id: MotorId, current: i32) -> Result<()> {
        Self::validate_current(current)?;
        self.with_entry(id, |entry| {
            let addr = entry.motor.map().run_current;
            entry.motor.write_int32(&mut entry.bus, addr, current)?;
            entry.run_current = current;
            Ok(())
        })
    }

    /// Write the stop current (0..=1000).
    pub fn set_stop_current(&self, id: MotorId, current: i32) -> Result<()> {
        Self::validate_current(current)?;
        self.with_entry(id, |entry| {
            let addr = entry.motor.map().stop_current;
            entry.motor.write_int32(&mut entry.bus, addr, current)?;
            entry.stop_current = current;
            Ok(())
        })
    }

    /// Decoded driver input command register.
    pub fn read_input_status(&self, id: MotorId) -> Result<FlagStatus> {
        self.with_entry(id, |entry| entry.motor.read_input_status(&mut entry.bus))
    }

    /// Decoded driver output status register.
    pub fn read_output_status(&self, id: MotorId) -> Result<FlagStatus> {
        self.with_entry(id, |entry| entry.motor.read_output_status(&mut entry.bus))
    }

    /// Decoded direct I/O + brake status register.
    pub fn read_direct_io_status(&self, id: MotorId) -> Result<DirectIoStatus> {
        self.with_entry(id, |entry| entry.motor.read_direct_io_status(&mut entry.bus))
    }

    /// Current actual position (32-bit register).
    pub fn read_actual_position(&self, id: MotorId) -> Result<i32> {
        self.with_entry(id, |entry| {
            let addr = entry.motor.map().actual_position;
            Ok(entry.motor.read_u32(&mut entry.bus, addr)? as i32)
        })
    }

    /// Current actual speed (32-bit register).
    pub fn read_actual_speed(&self, id: MotorId) -> Result<i32> {
        self.with_entry(id, |entry| {
            let addr = entry.motor.map().actual_speed;
            Ok(entry.motor.read_u32(&mut entry.bus, addr)? as i32)
        })
    }

    /// The position last passed to [`MotorControl::set_position`] (the current Position-mode
    /// target, not a register read).
    pub fn target_position(&self, id: MotorId) -> Result<i32> {
        let inner = self.inner.lock();
        if inner.client.is_none() {
            return Err(Error::NotReady);
        }
        inner.motors.get(&id).map(|e| e.runtime.position).ok_or_else(|| Error::rejected(format!("motor {} is not configured in MotorControl", id)))
    }

    /// The speed magnitude last passed to [`MotorControl::set_speed`] (the current Speed-mode
    /// target, not a register read).
    pub fn target_speed(&self, id: MotorId) -> Result<i32> {
        let inner = self.inner.lock();
        if inner.client.is_none() {
            return Err(Error::NotReady);
        }
        inner.motors.get(&id).map(|e| e.runtime.speed).ok_or_else(|| Error::rejected(format!("motor {} is not configured in MotorControl", id)))
    }

    /// Diagnose the motor's currently-active alarm code.
    pub fn diagnose_current_alarm(&self, id: MotorId) -> Result<CodeDiagnostic> {
        self.with_entry(id, |entry| {
            let code = entry.motor.read_alarm_code(&mut entry.bus)?;
            Ok(entry.motor.diagnose_alarm(code))
        })
    }

    /// Diagnose the motor's currently-active warning code.
    pub fn diagnose_current_warning(&self, id: MotorId) -> Result<CodeDiagnostic> {
        self.with_entry(id, |entry| {
            let code = entry.motor.read_warning_code(&mut entry.bus)?;
            Ok(entry.motor.diagnose_warning(code))
        })
    }

    /// Diagnose the motor's currently-active communication-error code.
    pub fn diagnose_current_communication_error(&self, id: MotorId) -> Result<CodeDiagnostic> {
        self.with_entry(id, |entry| {
            let code = entry.motor.read_communication_error_code(&mut entry.bus)?;
            Ok(entry.motor.diagnose_communication_error(code))
        })
    }

    /// Reset the motor's alarm if one is active.
    pub fn reset_alarm(&self, id: MotorId) -> Result<()> {
        self.with_entry(id, |entry| entry.motor.reset_alarm(&mut entry.bus))
    }

    fn with_entry<T>(&self, id: MotorId, f: impl FnOnce(&mut MotorEntry) -> Result<T>) -> Result<T> {
        let mut inner = self.inner.lock();
        if inner.client.is_none() {
            return Err(Error::NotReady);
        }
        let entry = entry_mut(&mut inner, id)?;
        match f(entry) {
            Ok(v) => Ok(v),
            Err(e) => Err(self.fail(&mut inner, e)),
        }
    }
}

impl Component for MotorControl {
    fn component_type(&self) -> RobotComponent {
        RobotComponent::MotorControl
    }

    fn initialize(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.motors.clear();
        let attempt = (|| -> Result<()> {
            let client = serial::connect(self.serial.clone())?;
            let mut motors = BTreeMap::new();
            for (&id, &address) in &self.addresses {
                let motor = Motor::new(id, address, self.register_map);
                let mut bus = ModbusBus::new(client.clone(), address);
                motor.initialize(&mut bus)?;
                let (run_current, stop_current) = self.currents[&id];
                motor.write_int32(&mut bus, motor.map().run_current, run_current)?;
                motor.write_int32(&mut bus, motor.map().stop_current, stop_current)?;
                motors.insert(id, MotorEntry { motor, bus, runtime: RuntimeState::default(), run_current, stop_current });
            }
            inner.client = Some(client);
            inner.motors = motors;
            Ok(())
        })();
        match attempt {
            Ok(()) => {
                *self.state.lock() = ComponentState::Normal;
                Ok(())
            }
            Err(e) => {
                inner.client = None;
                inner.motors.clear();
                *self.state.lock() = ComponentState::Error;
                Err(e)
            }
        }
    }

    fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.client = None;
        inner.motors.clear();
        *self.state.lock() = ComponentState::Error;
    }

    fn state(&self) -> ComponentState {
        *self.state.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> MotorControlConfig {
        crate::config::Config::parse(
            &serde_json::json!({
                "classes": {
                    "Contec": {"ipAddress": "127.0.0.1", "port": 502, "slaveId": 1, "nDI": 1, "nDO": 1},
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
        .motor_control
    }

    #[test]
    fn uninitialized_bus_rejects_motor_operations() {
        let mc = MotorControl::new(&cfg());
        let err = mc.set_speed(MotorId::XLeft, 100).unwrap_err();
        assert!(matches!(err, Error::NotReady));
    }

    #[test]
    fn unknown_motor_id_is_rejected() {
        let mc = MotorControl::new(&cfg());
        let err = mc.configured_currents(MotorId::YLeft).unwrap_err();
        assert!(matches!(err, Error::OperationRejected(_)));
    }

    #[test]
    fn current_out_of_range_is_rejected() {
        let mc = MotorControl::new(&cfg());
        let err = mc.set_run_current(MotorId::XLeft, 5000).unwrap_err();
        assert!(matches!(err, Error::OperationRejected(_)));
    }
}

//! AR-KD2 stepper-driver protocol: one [`Motor`] per axis, stateless beyond its slave address
//! and register map. Every method takes the shared bus as a parameter; callers hold the bus
//! mutex (see [`crate::motor_control`]) for the duration of the call.
use crate::modbus::ModbusBus;
use crate::types::Motor as MotorId;
use crate::{Error, Result};

/// AR-KD2 register addresses
pub mod register_map;
/// Alarm/warning/communication-error lookup tables
pub mod diagnostics;

pub use diagnostics::{diagnose_alarm, diagnose_communication_error, diagnose_warning, CodeDiagnostic, CodeDomain};
pub use register_map::{ar_kd2, MotorRegisterMap};

/// A single bit in the driver input command register (0x007D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum InputFlag {
    /// operation-select bit 0
    M0 = 1 << 0,
    /// operation-select bit 1
    M1 = 1 << 1,
    /// operation-select bit 2
    M2 = 1 << 2,
    /// start-slot-select bit 0
    Ms0 = 1 << 3,
    /// start-slot-select bit 1
    Ms1 = 1 << 4,
    /// start-slot-select bit 2
    Ms2 = 1 << 5,
    /// momentary start
    Start = 1 << 6,
    /// momentary return-to-home
    Home = 1 << 7,
    /// momentary stop
    Stop = 1 << 8,
    /// free-run (motor de-energized)
    Free = 1 << 9,
    /// slow-start modifier
    SStart = 1 << 10,
    /// jog in the positive direction while held
    PlusJog = 1 << 11,
    /// jog in the negative direction while held
    MinusJog = 1 << 12,
    /// forward direction select
    Fwd = 1 << 13,
    /// reverse direction select
    Rvs = 1 << 14,
}

const SELECTION_MASK: u16 = (InputFlag::M0 as u16)
    | (InputFlag::M1 as u16)
    | (InputFlag::M2 as u16)
    | (InputFlag::Ms0 as u16)
    | (InputFlag::Ms1 as u16)
    | (InputFlag::Ms2 as u16);

/// A single bit in the driver output status register (0x007F).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum OutputFlag {
    /// echoes M0
    M0R = 1 << 0,
    /// echoes M1
    M1R = 1 << 1,
    /// echoes M2
    M2R = 1 << 2,
    /// echoes Start
    StartR = 1 << 3,
    /// positioning complete at home
    HomeP = 1 << 4,
    /// driver ready
    Ready = 1 << 5,
    /// warning active
    Warning = 1 << 6,
    /// alarm active
    Alarm = 1 << 7,
    /// internal processing busy
    SBusy = 1 << 8,
    /// in positioning area 1
    Area1 = 1 << 9,
    /// in positioning area 2
    Area2 = 1 << 10,
    /// in positioning area 3
    Area3 = 1 << 11,
    /// timing signal
    Tim = 1 << 12,
    /// motor moving
    Move = 1 << 13,
    /// positioning complete
    End = 1 << 14,
    /// torque limiting
    Tlc = 1 << 15,
}

/// A decoded 16-bit flag register plus the names of the bits that were set.
#[derive(Debug, Clone)]
pub struct FlagStatus {
    /// the raw register value
    pub raw: u16,
    /// human-readable names of the bits that are set, in declaration order
    pub active_flags: Vec<&'static str>,
}

const INPUT_FLAG_NAMES: &[(InputFlag, &str)] = &[
    (InputFlag::M0, "M0"),
    (InputFlag::M1, "M1"),
    (InputFlag::M2, "M2"),
    (InputFlag::Start, "START"),
    (InputFlag::Home, "HOME"),
    (InputFlag::Stop, "STOP"),
    (InputFlag::Free, "FREE"),
    (InputFlag::Ms0, "MS0"),
    (InputFlag::Ms1, "MS1"),
    (InputFlag::Ms2, "MS2"),
    (InputFlag::SStart, "SSTART"),
    (InputFlag::PlusJog, "+JOG"),
    (InputFlag::MinusJog, "-JOG"),
    (InputFlag::Fwd, "FWD"),
    (InputFlag::Rvs, "RVS"),
];

const OUTPUT_FLAG_NAMES: &[(OutputFlag, &str)] = &[
    (OutputFlag::M0R, "M0_R"),
    (OutputFlag::M1R, "M1_R"),
    (OutputFlag::M2R, "M2_R"),
    (OutputFlag::StartR, "START_R"),
    (OutputFlag::HomeP, "HOME-P"),
    (OutputFlag::Ready, "READY"),
    (OutputFlag::Warning, "WNG"),
    (OutputFlag::Alarm, "ALM"),
    (OutputFlag::SBusy, "S-BSY"),
    (OutputFlag::Area1, "AREA1"),
    (OutputFlag::Area2, "AREA2"),
    (OutputFlag::Area3, "AREA3"),
    (OutputFlag::Tim, "TIM"),
    (OutputFlag::Move, "MOVE"),
    (OutputFlag::End, "END"),
    (OutputFlag::Tlc, "TLC"),
];

fn decode_flags(raw: u16, names: &[(impl Copy + Into<u16>, &'static str)]) -> FlagStatus {
    let mut active_flags = Vec::new();
    for &(flag, name) in names {
        if raw & flag.into() != 0 {
            active_flags.push(name);
        }
    }
    FlagStatus { raw, active_flags }
}

impl From<InputFlag> for u16 {
    fn from(value: InputFlag) -> Self {
        value as u16
    }
}
impl From<OutputFlag> for u16 {
    fn from(value: OutputFlag) -> Self {
        value as u16
    }
}

/// Decoded direct I/O + brake status (32-bit register at 0x00D4/0x00D5).
#[derive(Debug, Clone)]
pub struct DirectIoStatus {
    /// upper word (0x00D4): OUT0..5, MB
    pub reg_00d4: u16,
    /// lower word (0x00D5): IN0..7, limit/home/slit sensors
    pub reg_00d5: u16,
    /// human-readable names of the bits that are set
    pub active_flags: Vec<&'static str>,
}

fn decode_direct_io(raw: u32) -> DirectIoStatus {
    let reg_00d4 = (raw >> 16) as u16;
    let reg_00d5 = (raw & 0xFFFF) as u16;
    let mut active_flags = Vec::new();
    for (bit, name) in [(0, "OUT0"), (1, "OUT1"), (2, "OUT2"), (3, "OUT3"), (4, "OUT4"), (5, "OUT5")] {
        if reg_00d4 & (1 << bit) != 0 {
            active_flags.push(name);
        }
    }
    if reg_00d4 & (1 << 8) != 0 {
        active_flags.push("MB");
    }
    for (bit, name) in [(13, "IN7"), (12, "IN6"), (11, "IN5"), (10, "IN4"), (9, "IN3"), (8, "IN2"), (7, "IN1"), (6, "IN0")] {
        if reg_00d5 & (1 << bit) != 0 {
            active_flags.push(name);
        }
    }
    for (bit, name) in [(3, "SLIT"), (2, "HOMES"), (1, "-LS"), (0, "+LS")] {
        if reg_00d5 & (1 << bit) != 0 {
            active_flags.push(name);
        }
    }
    DirectIoStatus { reg_00d4, reg_00d5, active_flags }
}

/// One AR-KD2 axis: identity, slave address and register map. Owns no I/O; every method is
/// given the shared bus reference for the duration of the call.
pub struct Motor {
    id: MotorId,
    slave_address: u8,
    map: MotorRegisterMap,
}

impl Motor {
    /// Create a motor handle. Does not touch the bus.
    pub fn new(id: MotorId, slave_address: u8, map: MotorRegisterMap) -> Self {
        Self { id, slave_address, map }
    }

    /// This motor's identity.
    pub fn id(&self) -> MotorId {
        self.id
    }

    /// The configured Modbus slave address.
    pub fn slave_address(&self) -> u8 {
        self.slave_address
    }

    /// The register map in use.
    pub fn map(&self) -> &MotorRegisterMap {
        &self.map
    }

    /// Probe the motor: read `presentAlarm` to validate the link, log any active
    /// alarm/warning/communication-error, and log the current flag registers.
    pub fn initialize(&self, bus: &mut ModbusBus) -> Result<()> {
        bus.read_holding_u32(self.map.present_alarm).map_err(|e| {
            Error::transport(format!(
                "motor {} (slave {}) link test failed while reading presentAlarm: {}",
                self.id, self.slave_address, e
            ))
        })?;

        let alarm_code = self.read_alarm_code(bus)?;
        if alarm_code != 0 {
            let diag = diagnose_alarm(alarm_code);
            log::warn!(
                "motor {} (slave {}) startup alarm 0x{:02X}: {} | cause: {} | action: {}",
                self.id, self.slave_address, alarm_code, diag.kind, diag.cause, diag.remedial_action
            );
        }
        let warning_code = self.read_warning_code(bus)?;
        if warning_code != 0 {
            let diag = diagnose_warning(warning_code);
            log::warn!(
                "motor {} (slave {}) startup warning 0x{:02X}: {} | cause: {} | action: {}",
                self.id, self.slave_address, warning_code, diag.kind, diag.cause, diag.remedial_action
            );
        }
        let comm_err_code = self.read_communication_error_code(bus)?;
        if comm_err_code != 0 {
            let diag = diagnose_communication_error(comm_err_code);
            log::warn!(
                "motor {} (slave {}) startup communication error 0x{:02X}: {} | cause: {} | action: {}",
                self.id, self.slave_address, comm_err_code, diag.kind, diag.cause, diag.remedial_action
            );
        }

        let input_status = self.read_input_status(bus)?;
        let output_status = self.read_output_status(bus)?;
        let io_status = self.read_direct_io_status(bus)?;
        log::info!(
            "motor {} (slave {}) input flags: 0x{:04X} [{}], output flags: 0x{:04X} [{}], direct IO 00D4=0x{:04X} 00D5=0x{:04X} [{}]",
            self.id, self.slave_address,
            input_status.raw, input_status.active_flags.join(", "),
            output_status.raw, output_status.active_flags.join(", "),
            io_status.reg_00d4, io_status.reg_00d5, io_status.active_flags.join(", "),
        );
        Ok(())
    }

    /// Read a 32-bit value from two consecutive holding registers (upper word first).
    pub fn read_u32(&self, bus: &mut ModbusBus, upper_addr: u16) -> Result<u32> {
        bus.read_holding_u32(upper_addr)
    }

    /// Write a 32-bit value to two consecutive holding registers (upper word first).
    pub fn write_int32(&self, bus: &mut ModbusBus, upper_addr: u16, value: i32) -> Result<()> {
        bus.write_holding_u32(upper_addr, value as u32)
    }

    /// Low byte of `presentAlarm`.
    pub fn read_alarm_code(&self, bus: &mut ModbusBus) -> Result<u8> {
        Ok((self.read_u32(bus, self.map.present_alarm)? & 0xFF) as u8)
    }

    /// Low byte of `presentWarning`.
    pub fn read_warning_code(&self, bus: &mut ModbusBus) -> Result<u8> {
        Ok((self.read_u32(bus, self.map.present_warning)? & 0xFF) as u8)
    }

    /// Low byte of `communicationErrorCode`.
    pub fn read_communication_error_code(&self, bus: &mut ModbusBus) -> Result<u8> {
        Ok((self.read_u32(bus, self.map.communication_error_code)? & 0xFF) as u8)
    }

    /// Look up a code in the alarm table.
    pub fn diagnose_alarm(&self, code: u8) -> CodeDiagnostic {
        diagnose_alarm(code)
    }

    /// Look up a code in the warning table.
    pub fn diagnose_warning(&self, code: u8) -> CodeDiagnostic {
        diagnose_warning(code)
    }

    /// Look up a code in the communication-error table.
    pub fn diagnose_communication_error(&self, code: u8) -> CodeDiagnostic {
        diagnose_communication_error(code)
    }

    /// Write the alarm-reset register 0 then 1, but only if an alarm is currently active.
    pub fn reset_alarm(&self, bus: &mut ModbusBus) -> Result<()> {
        if self.read_alarm_code(bus)? == 0 {
            return Ok(());
        }
        bus.write_holding(self.map.alarm_reset_command, 0)?;
        bus.write_holding(self.map.alarm_reset_command, 1)
    }

    /// Read the raw driver input command register.
    pub fn read_driver_input_command_raw(&self, bus: &mut ModbusBus) -> Result<u16> {
        bus.read_holding(self.map.driver_input_command_lower)
    }

    /// Write the raw driver input command register.
    pub fn write_driver_input_command_raw(&self, bus: &mut ModbusBus, raw: u16) -> Result<()> {
        bus.write_holding(self.map.driver_input_command_lower, raw)
    }

    /// Read-modify-write a single input flag bit.
    pub fn set_driver_input_flag(&self, bus: &mut ModbusBus, flag: InputFlag, enabled: bool) -> Result<()> {
        let raw = self.read_driver_input_command_raw(bus)?;
        let bit = flag as u16;
        let raw = if enabled { raw | bit } else { raw & !bit };
        self.write_driver_input_command_raw(bus, raw)
    }

    /// Set the flag, hold briefly, then clear it.
    pub fn pulse_driver_input_flag(&self, bus: &mut ModbusBus, flag: InputFlag, hold: std::time::Duration) -> Result<()> {
        self.set_driver_input_flag(bus, flag, true)?;
        std::thread::sleep(hold);
        self.set_driver_input_flag(bus, flag, false)
    }

    /// Pulse the Start bit for the default hold duration.
    pub fn pulse_start(&self, bus: &mut ModbusBus) -> Result<()> {
        self.pulse_driver_input_flag(bus, InputFlag::Start, std::time::Duration::from_millis(50))
    }

    /// Pulse the Stop bit for the default hold duration.
    pub fn pulse_stop(&self, bus: &mut ModbusBus) -> Result<()> {
        self.pulse_driver_input_flag(bus, InputFlag::Stop, std::time::Duration::from_millis(50))
    }

    /// Pulse the Home bit for the default hold duration.
    pub fn pulse_home(&self, bus: &mut ModbusBus) -> Result<()> {
        self.pulse_driver_input_flag(bus, InputFlag::Home, std::time::Duration::from_millis(50))
    }

    /// Set or clear the forward-direction flag.
    pub fn set_forward(&self, bus: &mut ModbusBus, enabled: bool) -> Result<()> {
        self.set_driver_input_flag(bus, InputFlag::Fwd, enabled)
    }

    /// Set or clear the reverse-direction flag.
    pub fn set_reverse(&self, bus: &mut ModbusBus, enabled: bool) -> Result<()> {
        self.set_driver_input_flag(bus, InputFlag::Rvs, enabled)
    }

    /// Set or clear the positive-jog flag.
    pub fn set_jog_plus(&self, bus: &mut ModbusBus, enabled: bool) -> Result<()> {
        self.set_driver_input_flag(bus, InputFlag::PlusJog, enabled)
    }

    /// Set or clear the negative-jog flag.
    pub fn set_jog_minus(&self, bus: &mut ModbusBus, enabled: bool) -> Result<()> {
        self.set_driver_input_flag(bus, InputFlag::MinusJog, enabled)
    }

    /// Clear every bit in the driver input command register (no direction, no start).
    pub fn stop_movement(&self, bus: &mut ModbusBus) -> Result<()> {
        self.write_driver_input_command_raw(bus, 0)
    }

    /// Decode the driver input command register, with active-bit names.
    pub fn read_input_status(&self, bus: &mut ModbusBus) -> Result<FlagStatus> {
        Ok(decode_flags(self.read_driver_input_command_raw(bus)?, INPUT_FLAG_NAMES))
    }

    /// Read and decode the driver output status register.
    pub fn read_output_status(&self, bus: &mut ModbusBus) -> Result<FlagStatus> {
        let raw = bus.read_holding(self.map.driver_output_command_lower)?;
        Ok(decode_flags(raw, OUTPUT_FLAG_NAMES))
    }

    /// Read and decode the direct I/O + brake status register.
    pub fn read_direct_io_status(&self, bus: &mut ModbusBus) -> Result<DirectIoStatus> {
        let raw = self.read_u32(bus, self.map.direct_io_and_brake_status)?;
        Ok(decode_direct_io(raw))
    }

    /// Gather the selection bits (M0,M1,M2,Ms0,Ms1,Ms2) into a 6-bit operation id.
    pub fn decode_operation_id_from_input_raw(raw: u16) -> u8 {
        let mut id = 0u8;
        if raw & InputFlag::M0 as u16 != 0 {
            id |= 1;
        }
        if raw & InputFlag::M1 as u16 != 0 {
            id |= 2;
        }
        if raw & InputFlag::M2 as u16 != 0 {
            id |= 4;
        }
        if raw & InputFlag::Ms0 as u16 != 0 {
            id |= 8;
        }
        if raw & InputFlag::Ms1 as u16 != 0 {
            id |= 16;
        }
        if raw & InputFlag::Ms2 as u16 != 0 {
            id |= 32;
        }
        id
    }

    fn operation_id_bits(id: u8) -> u16 {
        let mut raw = 0u16;
        if id & 1 != 0 {
            raw |= InputFlag::M0 as u16;
        }
        if id & 2 != 0 {
            raw |= InputFlag::M1 as u16;
        }
        if id & 4 != 0 {
            raw |= InputFlag::M2 as u16;
        }
        if id & 8 != 0 {
            raw |= InputFlag::Ms0 as u16;
        }
        if id & 16 != 0 {
            raw |= InputFlag::Ms1 as u16;
        }
        if id & 32 != 0 {
            raw |= InputFlag::Ms2 as u16;
        }
        raw
    }

    /// Select operation id `0..=63`, preserving every non-selection bit of the input register.
    pub fn set_selected_operation_id(&self, bus: &mut ModbusBus, id: u8) -> Result<()> {
        if id > 63 {
            return Err(Error::rejected(format!("operation id {} out of range 0..63", id)));
        }
        let raw = self.read_driver_input_command_raw(bus)?;
        let raw = (raw & !SELECTION_MASK) | Self::operation_id_bits(id);
        self.write_driver_input_command_raw(bus, raw)
    }

    /// Decode the currently-selected operation id from the live input register.
    pub fn read_selected_operation_id(&self, bus: &mut ModbusBus) -> Result<u8> {
        Ok(Self::decode_operation_id_from_input_raw(self.read_driver_input_command_raw(bus)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_operation_id_uses_all_selection_bits() {
        let raw = InputFlag::M0 as u16 | InputFlag::M2 as u16 | InputFlag::Ms1 as u16 | InputFlag::Ms2 as u16;
        assert_eq!(Motor::decode_operation_id_from_input_raw(raw), 53);
    }

    #[test]
    fn operation_id_bits_round_trip_through_decode() {
        for id in 0..64u8 {
            let raw = Motor::operation_id_bits(id);
            assert_eq!(Motor::decode_operation_id_from_input_raw(raw), id);
        }
    }

    #[test]
    fn decode_direct_io_decodes_expected_flag_names() {
        let raw = (0x0121u32 << 16) | 0x2C42u32;
        let status = decode_direct_io(raw);
        assert_eq!(status.reg_00d4, 0x0121);
        assert_eq!(status.reg_00d5, 0x2C42);
        assert_eq!(status.active_flags, vec!["OUT0", "OUT5", "MB", "IN7", "IN5", "IN4", "IN0", "-LS"]);
    }
}

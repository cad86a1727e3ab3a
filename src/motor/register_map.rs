//! Register addresses for the driver model in use. The AR-KD2 map is the only preset required
//! by this build; additional driver models plug in by providing another [`MotorRegisterMap`].

/// Integer register addresses for a stepper-driver model.
#[derive(Debug, Clone, Copy)]
pub struct MotorRegisterMap {
    /// 16-bit driver input command register (control bits)
    pub driver_input_command_lower: u16,
    /// 16-bit driver output status register
    pub driver_output_command_lower: u16,
    /// 32-bit present-alarm register; code is the low byte
    pub present_alarm: u16,
    /// 32-bit present-warning register; code is the low byte
    pub present_warning: u16,
    /// 32-bit communication-error register; code is the low byte
    pub communication_error_code: u16,
    /// 32-bit direct I/O + brake status register
    pub direct_io_and_brake_status: u16,
    /// alarm-reset command register, written 0 then 1
    pub alarm_reset_command: u16,
    /// 32-bit commanded position
    pub command_position: u16,
    /// 32-bit commanded speed
    pub command_speed: u16,
    /// 32-bit actual (measured) position
    pub actual_position: u16,
    /// 32-bit actual (measured) speed
    pub actual_speed: u16,
    /// 32-bit run current
    pub run_current: u16,
    /// 32-bit stop current
    pub stop_current: u16,
    /// operation-data position base; each operation id occupies 2 words
    pub position_no0: u16,
    /// operation-data speed base; each operation id occupies 2 words
    pub speed_no0: u16,
    /// operation-data mode base
    pub operation_mode_no0: u16,
    /// operation-data acceleration base
    pub acceleration_no0: u16,
    /// operation-data deceleration base
    pub deceleration_no0: u16,
}

/// The register map for the Oriental Motor AR-KD2 driver (HM-60506E Modbus manual).
pub fn ar_kd2() -> MotorRegisterMap {
    MotorRegisterMap {
        driver_input_command_lower: 0x007D,
        driver_output_command_lower: 0x007F,
        present_alarm: 0x0080,
        present_warning: 0x0096,
        communication_error_code: 0x00AC,
        direct_io_and_brake_status: 0x00D4,
        alarm_reset_command: 0x0180,
        command_position: 0x00C6,
        command_speed: 0x00C8,
        actual_position: 0x00CC,
        actual_speed: 0x00CE,
        run_current: 0x0240,
        stop_current: 0x0242,
        position_no0: 0x0400,
        speed_no0: 0x0480,
        operation_mode_no0: 0x0500,
        acceleration_no0: 0x0600,
        deceleration_no0: 0x0680,
    }
}

/// Each operation slot (identified by id 0..63) occupies 2 consecutive words in the
/// position/speed/acceleration/deceleration tables.
pub fn operation_offset(base: u16, op_id: u8) -> u16 {
    base + 2 * u16::from(op_id)
}

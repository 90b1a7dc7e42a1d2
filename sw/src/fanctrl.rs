//! MAX31785 fan controller and UCD90120A monitor access.
//!
//! Everything on the monitoring side sits behind a PCA9546 I2C switch on
//! the motherboard bus; callers select a leg, talk PMBus, and deselect.

use debug::{logln, LL, LS};
use skarab_hal::hal_i2c::I2cMaster;
use skarab_hal::HalResult;

pub const PCA9546_I2C_DEVICE_ADDRESS: u8 = 0x70;
pub const MAX31785_I2C_DEVICE_ADDRESS: u8 = 0x52;
pub const UCD90120A_VMON_I2C_DEVICE_ADDRESS: u8 = 0x45;
pub const UCD90120A_CMON_I2C_DEVICE_ADDRESS: u8 = 0x47;

pub const FAN_CONT_SWITCH_SELECT: u8 = 0x01;
pub const MONITOR_SWITCH_SELECT: u8 = 0x02;
pub const ONE_GBE_SWITCH_SELECT: u8 = 0x04;

// PMBus commands
pub const PAGE_CMD: u8 = 0x00;
pub const CLEAR_FAULTS_CMD: u8 = 0x03;
pub const RESTORE_DEFAULT_ALL_CMD: u8 = 0x12;
pub const VOUT_MODE_CMD: u8 = 0x20;
pub const FAN_COMMAND_1_CMD: u8 = 0x3B;
pub const STATUS_WORD_CMD: u8 = 0x79;
pub const READ_VOUT_CMD: u8 = 0x8B;
pub const READ_TEMPERATURE_1_CMD: u8 = 0x8D;
pub const READ_FAN_SPEED_1_CMD: u8 = 0x90;
pub const MFR_LOCATION_CMD: u8 = 0x9C;
pub const MFR_NV_FAULT_LOG_CMD: u8 = 0xDC;
pub const MFR_FAN_CONFIG_CMD: u8 = 0xF1;
pub const MFR_READ_FAN_PWM_CMD: u8 = 0xF3;
pub const MFR_FAN_LUT_CMD: u8 = 0xF5;

// motherboard fan pages
pub const LEFT_FRONT_FAN_PAGE: u8 = 0;
pub const LEFT_MIDDLE_FAN_PAGE: u8 = 1;
pub const LEFT_BACK_FAN_PAGE: u8 = 2;
pub const RIGHT_BACK_FAN_PAGE: u8 = 3;
pub const FPGA_FAN_PAGE: u8 = 4;
pub const FAN_PAGES: [u8; 5] = [
    LEFT_FRONT_FAN_PAGE,
    LEFT_MIDDLE_FAN_PAGE,
    LEFT_BACK_FAN_PAGE,
    RIGHT_BACK_FAN_PAGE,
    FPGA_FAN_PAGE,
];

// temperature sensor pages
pub const FPGA_TEMP_DIODE_ADC_PAGE: u8 = 10;
pub const FAN_CONT_TEMP_SENSOR_PAGE: u8 = 12;
pub const INLET_TEMP_SENSOR_PAGE: u8 = 13;
pub const OUTLET_TEMP_SENSOR_PAGE: u8 = 14;
pub const MEZZANINE_0_TEMP_ADC_PAGE: u8 = 17;
pub const MEZZANINE_1_TEMP_ADC_PAGE: u8 = 18;
pub const MEZZANINE_2_TEMP_ADC_PAGE: u8 = 19;
pub const MEZZANINE_3_TEMP_ADC_PAGE: u8 = 20;

pub const NUM_VOLTAGE_MON_PAGES: u8 = 12;
pub const NUM_CURRENT_MON_PAGES: u8 = 12;

/// Factory fan curve: eight (temperature C, PWM %) setpoints
pub const DEFAULT_FAN_LUT: [u16; 16] = [
    20, 20, 30, 30, 40, 40, 50, 55, 60, 70, 70, 85, 80, 100, 90, 100,
];

/// Route the motherboard bus at the PCA9546; 0 deselects every leg
pub fn configure_switch(i2c: &mut I2cMaster, select: u8) {
    if i2c.write_bytes(PCA9546_I2C_DEVICE_ADDRESS, &[select]).is_err() {
        logln!(LS::Hardw, LL::Error, "FAN  [..] i2c switch select failed");
    }
}

fn set_page(i2c: &mut I2cMaster, dev: u8, page: u8) -> HalResult<()> {
    i2c.write_bytes(dev, &[PAGE_CMD, page])
}

/// PMBus read of a 16-bit register on the given page
pub fn pmbus_read_u16(i2c: &mut I2cMaster, dev: u8, page: u8, cmd: u8) -> HalResult<u16> {
    set_page(i2c, dev, page)?;
    let mut rd = [0u8; 2];
    i2c.write_read(dev, &[cmd], &mut rd)?;
    Ok(u16::from_le_bytes(rd))
}

/// PMBus block read without page addressing (e.g. MFR_LOCATION)
pub fn pmbus_read_block(i2c: &mut I2cMaster, dev: u8, cmd: u8, rd: &mut [u8]) -> HalResult<()> {
    i2c.write_read(dev, &[cmd], rd)
}

/// Program one fan page to a fixed PWM percentage
pub fn set_fan_speed(i2c: &mut I2cMaster, page: u8, pwm_percent: u16) -> HalResult<()> {
    configure_switch(i2c, FAN_CONT_SWITCH_SELECT);
    let result = (|| {
        set_page(i2c, MAX31785_I2C_DEVICE_ADDRESS, page)?;
        // FAN_COMMAND in direct format: percent x 100
        let value = pwm_percent.saturating_mul(100).to_le_bytes();
        i2c.write_bytes(
            MAX31785_I2C_DEVICE_ADDRESS,
            &[FAN_COMMAND_1_CMD, value[0], value[1]],
        )
    })();
    configure_switch(i2c, 0);
    result
}

pub fn read_fan_speed_rpm(i2c: &mut I2cMaster, page: u8) -> u16 {
    configure_switch(i2c, FAN_CONT_SWITCH_SELECT);
    let rpm = pmbus_read_u16(i2c, MAX31785_I2C_DEVICE_ADDRESS, page, READ_FAN_SPEED_1_CMD)
        .unwrap_or(0);
    configure_switch(i2c, 0);
    rpm
}

pub fn read_fan_pwm(i2c: &mut I2cMaster, page: u8) -> u16 {
    configure_switch(i2c, FAN_CONT_SWITCH_SELECT);
    let pwm = pmbus_read_u16(i2c, MAX31785_I2C_DEVICE_ADDRESS, page, MFR_READ_FAN_PWM_CMD)
        .unwrap_or(0);
    configure_switch(i2c, 0);
    pwm
}

/// Hand a fan page back to the controller's temperature-indexed curve
pub fn enable_auto_fan_control(i2c: &mut I2cMaster, page: u8) -> HalResult<()> {
    configure_switch(i2c, FAN_CONT_SWITCH_SELECT);
    let result = (|| {
        set_page(i2c, MAX31785_I2C_DEVICE_ADDRESS, page)?;
        i2c.write_bytes(MAX31785_I2C_DEVICE_ADDRESS, &[FAN_COMMAND_1_CMD, 0xff, 0xff])
    })();
    configure_switch(i2c, 0);
    result
}

/// Write the eight-setpoint fan curve for the FPGA fan
pub fn update_fan_lut(i2c: &mut I2cMaster, setpoints: &[u16; 16]) -> HalResult<()> {
    configure_switch(i2c, FAN_CONT_SWITCH_SELECT);
    let result = (|| {
        set_page(i2c, MAX31785_I2C_DEVICE_ADDRESS, FPGA_FAN_PAGE)?;
        let mut wr = [0u8; 34];
        wr[0] = MFR_FAN_LUT_CMD;
        wr[1] = 32;
        for (i, sp) in setpoints.iter().enumerate() {
            let b = sp.to_le_bytes();
            wr[2 + i * 2] = b[0];
            wr[3 + i * 2] = b[1];
        }
        i2c.write_bytes(MAX31785_I2C_DEVICE_ADDRESS, &wr)
    })();
    configure_switch(i2c, 0);
    result
}

pub fn read_fan_lut(i2c: &mut I2cMaster) -> HalResult<[u16; 16]> {
    configure_switch(i2c, FAN_CONT_SWITCH_SELECT);
    let result = (|| {
        set_page(i2c, MAX31785_I2C_DEVICE_ADDRESS, FPGA_FAN_PAGE)?;
        let mut rd = [0u8; 33];
        i2c.write_read(MAX31785_I2C_DEVICE_ADDRESS, &[MFR_FAN_LUT_CMD], &mut rd)?;
        let mut setpoints = [0u16; 16];
        for (i, sp) in setpoints.iter_mut().enumerate() {
            *sp = u16::from_le_bytes([rd[1 + i * 2], rd[2 + i * 2]]);
        }
        Ok(setpoints)
    })();
    configure_switch(i2c, 0);
    result
}

/// One decoded entry of the controller's non-volatile fault log
#[derive(Copy, Clone, Default)]
pub struct FanCtrlrLogEntry {
    pub index: u16,
    pub count: u16,
    pub status_word: u16,
    pub status_vout: [u16; 3],
    pub status_mfr: [u16; 6],
    pub status_fans: [u16; 3],
}

pub const NUM_FANCTRLR_LOG_ENTRIES: usize = 15;

/// Pull the controller's stored fault log. A short or failed block read
/// marks the retrieval incomplete; already-decoded entries are kept.
pub fn read_fanctrlr_logs(
    i2c: &mut I2cMaster,
    entries: &mut [FanCtrlrLogEntry; NUM_FANCTRLR_LOG_ENTRIES],
) -> bool {
    configure_switch(i2c, FAN_CONT_SWITCH_SELECT);
    let mut complete = true;
    for (index, entry) in entries.iter_mut().enumerate() {
        let mut rd = [0u8; 30];
        let ok = i2c
            .write_read(
                MAX31785_I2C_DEVICE_ADDRESS,
                &[MFR_NV_FAULT_LOG_CMD, index as u8],
                &mut rd,
            )
            .is_ok();
        if !ok {
            complete = false;
            break;
        }
        let word = |n: usize| u16::from_le_bytes([rd[n * 2], rd[n * 2 + 1]]);
        entry.index = index as u16;
        entry.count = word(1);
        entry.status_word = word(2);
        entry.status_vout = [word(3), word(4), word(5)];
        entry.status_mfr = [word(6), word(7), word(8), word(9), word(10), word(11)];
        entry.status_fans = [word(12), word(13), word(14)];
    }
    configure_switch(i2c, 0);
    complete
}

pub fn clear_fanctrlr_logs(i2c: &mut I2cMaster) -> bool {
    configure_switch(i2c, FAN_CONT_SWITCH_SELECT);
    let ok = i2c
        .write_bytes(MAX31785_I2C_DEVICE_ADDRESS, &[CLEAR_FAULTS_CMD])
        .is_ok()
        && i2c
            .write_bytes(MAX31785_I2C_DEVICE_ADDRESS, &[MFR_NV_FAULT_LOG_CMD, 0xff])
            .is_ok();
    configure_switch(i2c, 0);
    ok
}

/// Boot-time bring-up: restore controller defaults, load the fan curve and
/// leave every fan in automatic control
pub fn init_fan_controller(i2c: &mut I2cMaster) {
    configure_switch(i2c, FAN_CONT_SWITCH_SELECT);
    if i2c
        .write_bytes(MAX31785_I2C_DEVICE_ADDRESS, &[RESTORE_DEFAULT_ALL_CMD])
        .is_err()
    {
        logln!(LS::Hardw, LL::Error, "FAN  [..] restore defaults failed");
    }
    configure_switch(i2c, 0);
    if update_fan_lut(i2c, &DEFAULT_FAN_LUT).is_err() {
        logln!(LS::Hardw, LL::Error, "FAN  [..] fan curve load failed");
    }
    for page in FAN_PAGES.iter() {
        if enable_auto_fan_control(i2c, *page).is_err() {
            logln!(LS::Hardw, LL::Error, "FAN  [..] auto control enable failed");
        }
    }
}

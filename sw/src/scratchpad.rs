//! Persistent byte scratchpad.
//!
//! The MAX31785 exposes 8 bytes of RAM behind the MFR_LOCATION PMBus
//! command. We never issue write-to-flash, so the bytes survive an FPGA
//! reconfigure but clear on a hard reset; that asymmetry is exactly what
//! boot-loop accounting needs. A factory-fresh chip reads an ASCII default
//! pattern, which doubles as the first-boot-ever probe.

use crate::fanctrl::{
    configure_switch, pmbus_read_block, FAN_CONT_SWITCH_SELECT, MAX31785_I2C_DEVICE_ADDRESS,
    MFR_LOCATION_CMD,
};
use skarab_hal::hal_i2c::I2cMaster;

const SCRATCHPAD_LEN: usize = 8;
const MFR_LOCATION_DEFAULT: [u8; SCRATCHPAD_LEN] = [0x30, 0x31, 0x30, 0x31, 0x30, 0x31, 0x30, 0x31];

/// Byte allocation within the scratchpad
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PmemIndex {
    HmcReconfigureCount = 0,
    DhcpReconfigureCount = 1,
    /// bit 7 = "manually set"; bits 6..0 = level
    StartupLogLevel = 2,
    /// same encoding as the level byte
    StartupLogSelect = 3,
    AuxFlags = 4,
    Reserved5 = 5,
    Reserved6 = 6,
    Reserved7 = 7,
}

pub const PMEM_MANUALLY_SET_BIT: u8 = 0x80;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PmemReturn {
    Ok,
    Error,
    /// register still holds the factory pattern (board never written)
    Default,
    NonDefault,
}

fn read_all(i2c: &mut I2cMaster, bytes: &mut [u8; SCRATCHPAD_LEN]) -> PmemReturn {
    match pmbus_read_block(i2c, MAX31785_I2C_DEVICE_ADDRESS, MFR_LOCATION_CMD, bytes) {
        Ok(()) => PmemReturn::Ok,
        Err(_) => PmemReturn::Error,
    }
}

fn write_all(i2c: &mut I2cMaster, bytes: &[u8; SCRATCHPAD_LEN]) -> PmemReturn {
    let mut wr = [0u8; SCRATCHPAD_LEN + 1];
    wr[0] = MFR_LOCATION_CMD;
    wr[1..].copy_from_slice(bytes);
    match i2c.write_bytes(MAX31785_I2C_DEVICE_ADDRESS, &wr) {
        Ok(()) => PmemReturn::Ok,
        Err(_) => PmemReturn::Error,
    }
}

/// Is the register still in its factory-default state?
pub fn check(i2c: &mut I2cMaster) -> PmemReturn {
    configure_switch(i2c, FAN_CONT_SWITCH_SELECT);
    let mut bytes = [0u8; SCRATCHPAD_LEN];
    let ret = match read_all(i2c, &mut bytes) {
        PmemReturn::Ok => {
            if bytes == MFR_LOCATION_DEFAULT {
                PmemReturn::Default
            } else {
                PmemReturn::NonDefault
            }
        }
        other => other,
    };
    configure_switch(i2c, 0);
    ret
}

pub fn read_byte(i2c: &mut I2cMaster, index: PmemIndex) -> Result<u8, PmemReturn> {
    configure_switch(i2c, FAN_CONT_SWITCH_SELECT);
    let mut bytes = [0u8; SCRATCHPAD_LEN];
    let ret = read_all(i2c, &mut bytes);
    configure_switch(i2c, 0);
    match ret {
        PmemReturn::Ok => Ok(bytes[index as usize]),
        other => Err(other),
    }
}

pub fn write_byte(i2c: &mut I2cMaster, index: PmemIndex, value: u8) -> PmemReturn {
    configure_switch(i2c, FAN_CONT_SWITCH_SELECT);
    let mut bytes = [0u8; SCRATCHPAD_LEN];
    let ret = match read_all(i2c, &mut bytes) {
        PmemReturn::Ok => {
            bytes[index as usize] = value;
            write_all(i2c, &bytes)
        }
        other => other,
    };
    configure_switch(i2c, 0);
    ret
}

pub fn clear(i2c: &mut I2cMaster) -> PmemReturn {
    configure_switch(i2c, FAN_CONT_SWITCH_SELECT);
    let ret = write_all(i2c, &[0u8; SCRATCHPAD_LEN]);
    configure_switch(i2c, 0);
    ret
}

/// Boot-time bring-up: a factory-default register gets cleared so later
/// counter reads start from zero
pub fn init_persistent_memory(i2c: &mut I2cMaster) -> PmemReturn {
    match check(i2c) {
        PmemReturn::Default => clear(i2c),
        other => other,
    }
}

/// Saturating increment of one of the reconfigure counters
pub fn increment_counter(i2c: &mut I2cMaster, index: PmemIndex) -> PmemReturn {
    match read_byte(i2c, index) {
        Ok(value) => write_byte(i2c, index, value.saturating_add(1)),
        Err(other) => other,
    }
}

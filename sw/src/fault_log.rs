//! Voltage/current monitor fault capture.
//!
//! The diagnostics task polls the two UCD90120A monitors once a second;
//! any page reporting a non-zero status word gets an entry in a RAM ring
//! that operators pull over the control protocol. Sixteen entries per ring,
//! oldest overwritten first.

use crate::fanctrl::{
    configure_switch, pmbus_read_u16, MONITOR_SWITCH_SELECT, NUM_CURRENT_MON_PAGES,
    NUM_VOLTAGE_MON_PAGES, READ_VOUT_CMD, STATUS_WORD_CMD, UCD90120A_CMON_I2C_DEVICE_ADDRESS,
    UCD90120A_VMON_I2C_DEVICE_ADDRESS, VOUT_MODE_CMD,
};
use skarab_hal::hal_i2c::I2cMaster;

pub const NUM_LOG_ENTRIES: usize = 16;
/// Words each entry occupies in a retrieval response
pub const LOG_ENTRY_WORDS: usize = 7;

#[derive(Copy, Clone, Default)]
pub struct LogEntry {
    pub page_specific: u16,
    pub fault_type: u16,
    pub page: u16,
    pub fault_value: u16,
    pub value_scale: u16,
    /// runtime seconds when the fault was captured
    pub seconds: u32,
}

impl LogEntry {
    pub fn to_words(&self) -> [u16; LOG_ENTRY_WORDS] {
        [
            self.page_specific,
            self.fault_type,
            self.page,
            self.fault_value,
            self.value_scale,
            (self.seconds >> 16) as u16,
            self.seconds as u16,
        ]
    }
}

#[derive(Copy, Clone, PartialEq)]
enum MonKind {
    Voltage,
    Current,
}

pub struct FaultLogs {
    current: [LogEntry; NUM_LOG_ENTRIES],
    current_at: usize,
    voltage: [LogEntry; NUM_LOG_ENTRIES],
    voltage_at: usize,
}

impl FaultLogs {
    pub const fn new() -> Self {
        FaultLogs {
            current: [LogEntry {
                page_specific: 0,
                fault_type: 0,
                page: 0,
                fault_value: 0,
                value_scale: 0,
                seconds: 0,
            }; NUM_LOG_ENTRIES],
            current_at: 0,
            voltage: [LogEntry {
                page_specific: 0,
                fault_type: 0,
                page: 0,
                fault_value: 0,
                value_scale: 0,
                seconds: 0,
            }; NUM_LOG_ENTRIES],
            voltage_at: 0,
        }
    }

    pub fn voltage_entries(&self) -> &[LogEntry; NUM_LOG_ENTRIES] {
        &self.voltage
    }

    pub fn current_entries(&self) -> &[LogEntry; NUM_LOG_ENTRIES] {
        &self.current
    }

    fn push(&mut self, kind: MonKind, entry: LogEntry) {
        match kind {
            MonKind::Voltage => {
                self.voltage[self.voltage_at] = entry;
                self.voltage_at = (self.voltage_at + 1) % NUM_LOG_ENTRIES;
            }
            MonKind::Current => {
                self.current[self.current_at] = entry;
                self.current_at = (self.current_at + 1) % NUM_LOG_ENTRIES;
            }
        }
    }

    fn poll_monitor(
        &mut self,
        i2c: &mut I2cMaster,
        kind: MonKind,
        dev: u8,
        pages: u8,
        uptime_seconds: u32,
    ) {
        for page in 0..pages {
            let status = match pmbus_read_u16(i2c, dev, page, STATUS_WORD_CMD) {
                Ok(s) => s,
                Err(_) => continue,
            };
            if status == 0 {
                continue;
            }
            let value = pmbus_read_u16(i2c, dev, page, READ_VOUT_CMD).unwrap_or(0);
            let scale = pmbus_read_u16(i2c, dev, page, VOUT_MODE_CMD).unwrap_or(0);
            self.push(
                kind,
                LogEntry {
                    page_specific: status,
                    fault_type: status & 0xff,
                    page: page as u16,
                    fault_value: value,
                    value_scale: scale,
                    seconds: uptime_seconds,
                },
            );
        }
    }

    /// One diagnostics pass over both monitors
    pub fn poll(&mut self, i2c: &mut I2cMaster, uptime_seconds: u32) {
        configure_switch(i2c, MONITOR_SWITCH_SELECT);
        self.poll_monitor(
            i2c,
            MonKind::Voltage,
            UCD90120A_VMON_I2C_DEVICE_ADDRESS,
            NUM_VOLTAGE_MON_PAGES,
            uptime_seconds,
        );
        self.poll_monitor(
            i2c,
            MonKind::Current,
            UCD90120A_CMON_I2C_DEVICE_ADDRESS,
            NUM_CURRENT_MON_PAGES,
            uptime_seconds,
        );
        configure_switch(i2c, 0);
    }
}

#![cfg_attr(not(test), no_std)]
//! Serial debug logger.
//!
//! Log lines are filtered on two axes: a level (`LL`) and a subsystem select
//! (`LS`). A line is emitted when its level passes the current level filter
//! and its subsystem matches the current select (or the select is `All`).
//! Both filters are runtime-adjustable from the console, and the startup
//! values can be pinned from the persistent scratchpad.

use skarab_hal::hal_time::delay_ms;
use skarab_hal::mem_map::UART_BASE;

/// Flow control timeout limits how long putc() waits to drain a full TX buffer
const FLOW_CONTROL_TIMEOUT_MS: u32 = 5;

#[allow(dead_code)]
const UART_REG_RXTX: usize = 0;
#[allow(dead_code)]
const UART_REG_TXFULL: usize = 1;
#[allow(dead_code)]
const UART_REG_RXEMPTY: usize = 2;

#[derive(Copy, Clone, PartialOrd, PartialEq)]
#[allow(dead_code)]
pub enum LL {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
    Off = 6,
    /// Bypasses both the level and the select filter
    Always = 7,
}

/// Subsystem tag for log line filtering
#[derive(Copy, Clone, PartialEq)]
#[allow(dead_code)]
pub enum LS {
    General = 0,
    Dhcp = 1,
    Arp = 2,
    Icmp = 3,
    Lldp = 4,
    Ctrl = 5,
    Buff = 6,
    Hardw = 7,
    Iface = 8,
    Igmp = 9,
    All = 10,
}

static mut LOG_LEVEL: LL = LL::Info;
static mut LOG_SELECT: LS = LS::All;
static mut CACHED_LEVEL: LL = LL::Info;

pub fn set_log_level(level: LL) {
    unsafe {
        LOG_LEVEL = level;
    }
}

pub fn get_log_level() -> LL {
    unsafe { LOG_LEVEL }
}

/// Stash the current level so a noisy operation can restore it afterwards
pub fn cache_log_level() {
    unsafe {
        CACHED_LEVEL = LOG_LEVEL;
    }
}

pub fn restore_log_level() {
    unsafe {
        LOG_LEVEL = CACHED_LEVEL;
    }
}

pub fn set_log_select(select: LS) {
    unsafe {
        LOG_SELECT = select;
    }
}

pub fn get_log_select() -> LS {
    unsafe { LOG_SELECT }
}

pub fn level_name(l: LL) -> &'static str {
    match l {
        LL::Trace => "trace",
        LL::Debug => "debug",
        LL::Info => "info",
        LL::Warn => "warn",
        LL::Error => "error",
        LL::Fatal => "fatal",
        LL::Off => "off",
        LL::Always => "always",
    }
}

pub fn select_name(s: LS) -> &'static str {
    match s {
        LS::General => "general",
        LS::Dhcp => "dhcp",
        LS::Arp => "arp",
        LS::Icmp => "icmp",
        LS::Lldp => "lldp",
        LS::Ctrl => "ctrl",
        LS::Buff => "buff",
        LS::Hardw => "hardw",
        LS::Iface => "iface",
        LS::Igmp => "igmp",
        LS::All => "all",
    }
}

pub fn level_from_name(name: &str) -> Option<LL> {
    match name {
        "trace" => Some(LL::Trace),
        "debug" => Some(LL::Debug),
        "info" => Some(LL::Info),
        "warn" => Some(LL::Warn),
        "error" => Some(LL::Error),
        "fatal" => Some(LL::Fatal),
        "off" => Some(LL::Off),
        _ => None,
    }
}

pub fn select_from_name(name: &str) -> Option<LS> {
    match name {
        "general" => Some(LS::General),
        "dhcp" => Some(LS::Dhcp),
        "arp" => Some(LS::Arp),
        "icmp" => Some(LS::Icmp),
        "lldp" => Some(LS::Lldp),
        "ctrl" => Some(LS::Ctrl),
        "buff" => Some(LS::Buff),
        "hardw" => Some(LS::Hardw),
        "iface" => Some(LS::Iface),
        "igmp" => Some(LS::Igmp),
        "all" => Some(LS::All),
        _ => None,
    }
}

/// Decide whether a line with the given select/level tags should be emitted
pub fn log_enabled(select: LS, level: LL) -> bool {
    if level == LL::Always {
        return true;
    }
    let cur_select = get_log_select();
    if (cur_select != LS::All) && (select != cur_select) {
        return false;
    }
    (level >= get_log_level()) && (level < LL::Off)
}

pub struct Uart {}
impl Uart {
    /// Write to UART with TX buffer flow control
    #[cfg(target_os = "none")]
    pub fn putc(&self, c: u8) {
        let uart = UART_BASE as *mut u32;
        // Allow TX buffer to drain if it's full
        for _ in 0..FLOW_CONTROL_TIMEOUT_MS {
            let txfull = unsafe { uart.add(UART_REG_TXFULL).read_volatile() };
            if txfull != 0 {
                delay_ms(1);
            } else {
                break;
            }
        }
        unsafe {
            uart.add(UART_REG_RXTX).write_volatile(c as u32);
        }
    }

    #[cfg(not(target_os = "none"))]
    pub fn putc(&self, _c: u8) {
        // Host builds (unit tests) have no UART behind this address
        let _ = (UART_BASE, FLOW_CONTROL_TIMEOUT_MS, delay_ms);
    }
}

use core::fmt::{Error, Write};
impl Write for Uart {
    fn write_str(&mut self, s: &str) -> Result<(), Error> {
        for c in s.bytes() {
            self.putc(c);
        }
        Ok(())
    }
}

#[macro_export]
macro_rules! sprint
{
	($($args:tt)+) => ({
			use core::fmt::Write;
			let _ = write!($crate::Uart {}, $($args)+);
	});
}

#[macro_export]
macro_rules! sprintln
{
	() => ({
		$crate::sprint!("\r\n")
	});
	($fmt:expr) => ({
		$crate::sprint!(concat!($fmt, "\r\n"))
	});
	($fmt:expr, $($args:tt)+) => ({
		$crate::sprint!(concat!($fmt, "\r\n"), $($args)+)
	});
}

#[macro_export]
macro_rules! log {
    ($select:expr, $level:expr, $($e:expr),+) => {
        if $crate::log_enabled($select, $level) {
            $crate::sprint!($($e),+)
        }
    }
}

#[macro_export]
macro_rules! logln {
    ($select:expr, $level:expr, $($e:expr),*) => {
        if $crate::log_enabled($select, $level) {
            $crate::sprintln!($($e),*)
        }
    }
}

#[macro_export]
macro_rules! loghex {
    ($select:expr, $level:expr, $msg:expr, $val:expr) => {
        if $crate::log_enabled($select, $level) {
            $crate::sprint!("{}{:X}", $msg, $val)
        }
    };
}

#[macro_export]
macro_rules! loghexln {
    ($select:expr, $level:expr, $msg:expr, $val:expr) => {
        if $crate::log_enabled($select, $level) {
            $crate::sprintln!("{}{:X}", $msg, $val)
        }
    };
}

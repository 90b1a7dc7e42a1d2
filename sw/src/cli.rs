//! Line-oriented serial console.
//!
//! Characters arrive one per poll from the UART; the line editor echoes,
//! handles backspace, and on CR parses `command [option]` against a fixed
//! table. Token matching is case-insensitive. The hex argument form is
//! strict: `0x` followed by up to eight lower-case hex digits.

use crate::board::Board;
use crate::fanctrl;
use crate::mezz::Mezzanine;
use debug::{logln, LL, LS};
use net::igmp::IgmpSm;
use net::Interface;

const CLI_LINE_LEN: usize = 64;

const CR: u8 = b'\r';
const LF: u8 = b'\n';
const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7f;

/// Everything a console command may reach
pub struct CliContext<'a, 'b> {
    pub board: &'a mut Board,
    pub ifaces: &'a mut [Interface<'b>],
    pub igmp: &'a mut [IgmpSm],
    pub mezz: &'a mut [Mezzanine; 4],
    pub uptime_seconds: u32,
    pub reboot_requested: &'a mut bool,
    pub test_timer_count: &'a mut u8,
}

struct Command {
    name: &'static str,
    help: &'static str,
    handler: fn(&mut CliContext, Option<&str>),
}

static COMMANDS: &[Command] = &[
    Command {
        name: "log-level",
        help: "log-level [trace|debug|info|warn|error|fatal|off]",
        handler: cmd_log_level,
    },
    Command {
        name: "log-select",
        help: "log-select [general|dhcp|arp|icmp|lldp|ctrl|buff|hardw|iface|igmp|all]",
        handler: cmd_log_select,
    },
    Command {
        name: "stats",
        help: "stats - per-interface packet counters",
        handler: cmd_stats,
    },
    Command {
        name: "whoami",
        help: "whoami - addresses of every interface",
        handler: cmd_whoami,
    },
    Command {
        name: "uname",
        help: "uname - firmware identification",
        handler: cmd_uname,
    },
    Command {
        name: "uptime",
        help: "uptime - seconds since boot",
        handler: cmd_uptime,
    },
    Command {
        name: "reboot-fpga",
        help: "reboot-fpga - reconfigure from flash",
        handler: cmd_reboot_fpga,
    },
    Command {
        name: "dump",
        help: "dump - head of each receive buffer",
        handler: cmd_dump,
    },
    Command {
        name: "if-map",
        help: "if-map - logical to physical interface map",
        handler: cmd_if_map,
    },
    Command {
        name: "igmp",
        help: "igmp - multicast group machine state",
        handler: cmd_igmp,
    },
    Command {
        name: "wb-read",
        help: "wb-read 0x<addr> - read one wishbone word",
        handler: cmd_wb_read,
    },
    Command {
        name: "arp-req",
        help: "arp-req on|off|stat - gratuitous ARP requests",
        handler: cmd_arp_req,
    },
    Command {
        name: "arp-proc",
        help: "arp-proc on|off|stat - inbound ARP processing",
        handler: cmd_arp_proc,
    },
    Command {
        name: "memtest",
        help: "memtest - walking-pattern RAM test",
        handler: cmd_memtest,
    },
    Command {
        name: "fan-runtime",
        help: "fan-runtime - fan speeds in RPM",
        handler: cmd_fan_runtime,
    },
    Command {
        name: "fan-pwm-avg",
        help: "fan-pwm-avg - average fan PWM",
        handler: cmd_fan_pwm_avg,
    },
    Command {
        name: "test-timer",
        help: "test-timer - count down five seconds",
        handler: cmd_test_timer,
    },
    Command {
        name: "help",
        help: "help - this list",
        handler: cmd_help,
    },
];

pub struct Cli {
    line: [u8; CLI_LINE_LEN],
    len: usize,
}

impl Cli {
    pub const fn new() -> Self {
        Cli {
            line: [0; CLI_LINE_LEN],
            len: 0,
        }
    }

    /// Feed one received character; dispatches on CR
    pub fn input_char(&mut self, c: u8, ctx: &mut CliContext) {
        match c {
            CR | LF => {
                logln!(LS::General, LL::Always, "");
                self.dispatch(ctx);
                self.len = 0;
                logln!(LS::General, LL::Always, "skarab> ");
            }
            BACKSPACE | DELETE => {
                if self.len > 0 {
                    self.len -= 1;
                    // erase the echoed character
                    debug::log!(LS::General, LL::Always, "\x08 \x08");
                }
            }
            c if (0x20..0x7f).contains(&c) => {
                if self.len < CLI_LINE_LEN {
                    self.line[self.len] = c;
                    self.len += 1;
                    debug::log!(LS::General, LL::Always, "{}", c as char);
                }
            }
            _ => (), // control noise, ANSI escapes and the like
        }
    }

    fn dispatch(&mut self, ctx: &mut CliContext) {
        let line = match core::str::from_utf8(&self.line[..self.len]) {
            Ok(s) => s,
            Err(_) => return,
        };
        let mut tokens = line.split_ascii_whitespace();
        let name = match tokens.next() {
            Some(t) => t,
            None => return,
        };
        let option = tokens.next();
        match find_command(name) {
            Some(command) => (command.handler)(ctx, option),
            None => logln!(LS::General, LL::Always, "unknown command; try 'help'"),
        }
    }
}

fn find_command(name: &str) -> Option<&'static Command> {
    COMMANDS.iter().find(|c| c.name.eq_ignore_ascii_case(name))
}

/// Strict hex argument: `0x` then one to eight lower-case hex digits
fn parse_hex32(token: &str) -> Option<u32> {
    let digits = token.strip_prefix("0x")?;
    if digits.is_empty() || digits.len() > 8 {
        return None;
    }
    let mut value: u32 = 0;
    for c in digits.bytes() {
        let nibble = match c {
            b'0'..=b'9' => c - b'0',
            b'a'..=b'f' => c - b'a' + 10,
            _ => return None,
        };
        value = (value << 4) | nibble as u32;
    }
    Some(value)
}

fn cmd_log_level(_ctx: &mut CliContext, option: Option<&str>) {
    match option.and_then(debug::level_from_name) {
        Some(level) => {
            debug::set_log_level(level);
            logln!(LS::General, LL::Always, "log level set");
        }
        None => logln!(
            LS::General,
            LL::Always,
            "log level: {}",
            debug::level_name(debug::get_log_level())
        ),
    }
}

fn cmd_log_select(_ctx: &mut CliContext, option: Option<&str>) {
    match option.and_then(debug::select_from_name) {
        Some(select) => {
            debug::set_log_select(select);
            logln!(LS::General, LL::Always, "log select set");
        }
        None => logln!(
            LS::General,
            LL::Always,
            "log select: {}",
            debug::select_name(debug::get_log_select())
        ),
    }
}

fn cmd_stats(ctx: &mut CliContext, _option: Option<&str>) {
    for iface in ctx.ifaces.iter() {
        let c = &iface.counters;
        logln!(
            LS::General,
            LL::Always,
            "if-{:02} rx {} arp {} ip {} udp {} ctrl {} dhcp {} bad-ip-ck {} bad-udp-ck {}",
            iface.eth_id,
            c.rx_total,
            c.rx_eth_arp,
            c.rx_eth_ip,
            c.rx_ip_udp,
            c.rx_udp_ctrl,
            c.rx_udp_dhcp,
            c.rx_ip_checksum_errors,
            c.rx_udp_checksum_errors
        );
        logln!(
            LS::General,
            LL::Always,
            "      tx {} arp {} icmp {} igmp {} dhcp {} lldp {}",
            c.tx_total,
            c.tx_eth_arp_reply_ok + c.tx_eth_arp_request_ok,
            c.tx_ip_icmp_reply_ok,
            c.tx_ip_igmp_ok,
            c.tx_udp_dhcp_ok,
            c.tx_eth_lldp_ok
        );
    }
}

fn cmd_whoami(ctx: &mut CliContext, _option: Option<&str>) {
    for iface in ctx.ifaces.iter() {
        logln!(
            LS::General,
            LL::Always,
            "if-{:02} {} mac {:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x} ip {:08x} mask {:08x} {}",
            iface.eth_id,
            iface.hostname.as_str(),
            iface.mac[0],
            iface.mac[1],
            iface.mac[2],
            iface.mac[3],
            iface.mac[4],
            iface.mac[5],
            iface.ip,
            iface.netmask,
            if iface.link_up { "up" } else { "down" }
        );
    }
}

fn cmd_uname(_ctx: &mut CliContext, _option: Option<&str>) {
    logln!(
        LS::General,
        LL::Always,
        "skarab-fw {} ({} interfaces)",
        env!("CARGO_PKG_VERSION"),
        crate::board::NUM_ETHERNET_INTERFACES
    );
}

fn cmd_uptime(ctx: &mut CliContext, _option: Option<&str>) {
    logln!(LS::General, LL::Always, "up {} s", ctx.uptime_seconds);
}

fn cmd_reboot_fpga(ctx: &mut CliContext, _option: Option<&str>) {
    logln!(LS::General, LL::Always, "rebooting");
    *ctx.reboot_requested = true;
}

fn cmd_dump(ctx: &mut CliContext, _option: Option<&str>) {
    for iface in ctx.ifaces.iter() {
        debug::log!(LS::General, LL::Always, "if-{:02}:", iface.eth_id);
        for b in iface.rx_buf[..32].iter() {
            debug::log!(LS::General, LL::Always, " {:02x}", b);
        }
        logln!(LS::General, LL::Always, "");
    }
}

fn cmd_if_map(ctx: &mut CliContext, _option: Option<&str>) {
    for (logical, iface) in ctx.ifaces.iter().enumerate() {
        logln!(
            LS::General,
            LL::Always,
            "logical {} -> phy {} ({})",
            logical,
            iface.eth_id,
            if iface.eth_id == 0 { "1gbe" } else { "40gbe" }
        );
    }
}

fn cmd_igmp(ctx: &mut CliContext, _option: Option<&str>) {
    for sm in ctx.igmp.iter() {
        let (base, mask) = sm.subscription();
        logln!(
            LS::Igmp,
            LL::Always,
            "igmp [{:02}] base {:08x} mask {:08x} state {}",
            sm.if_id(),
            base,
            mask,
            sm.state_tag()
        );
    }
}

fn cmd_wb_read(ctx: &mut CliContext, option: Option<&str>) {
    let addr = match option.and_then(parse_hex32) {
        Some(addr) => addr,
        None => {
            logln!(LS::General, LL::Always, "usage: wb-read 0x<addr>");
            return;
        }
    };
    let value = ctx.board.wb.read(addr);
    if ctx.board.wb.read_and_clear_error() {
        logln!(LS::General, LL::Always, "wb {:08x}: bus error", addr);
    } else {
        logln!(LS::General, LL::Always, "wb {:08x}: {:08x}", addr, value);
    }
}

/// Shared body for the two ARP policy toggles; `requests` picks which flag
fn arp_flag_command(ctx: &mut CliContext, option: Option<&str>, requests: bool) {
    let set = |iface: &mut Interface, value: bool| {
        if requests {
            iface.arp_requests_enabled = value;
        } else {
            iface.arp_processing_enabled = value;
        }
    };
    match option {
        Some(opt) if opt.eq_ignore_ascii_case("on") => {
            for iface in ctx.ifaces.iter_mut() {
                set(iface, true);
            }
            logln!(LS::Arp, LL::Always, "on");
        }
        Some(opt) if opt.eq_ignore_ascii_case("off") => {
            for iface in ctx.ifaces.iter_mut() {
                set(iface, false);
            }
            logln!(LS::Arp, LL::Always, "off");
        }
        Some(opt) if opt.eq_ignore_ascii_case("stat") => {
            for iface in ctx.ifaces.iter() {
                let state = if requests {
                    iface.arp_requests_enabled
                } else {
                    iface.arp_processing_enabled
                };
                logln!(
                    LS::Arp,
                    LL::Always,
                    "if-{:02}: {}",
                    iface.eth_id,
                    if state { "on" } else { "off" }
                );
            }
        }
        _ => logln!(LS::Arp, LL::Always, "usage: on|off|stat"),
    }
}

fn cmd_arp_req(ctx: &mut CliContext, option: Option<&str>) {
    arp_flag_command(ctx, option, true);
}

fn cmd_arp_proc(ctx: &mut CliContext, option: Option<&str>) {
    arp_flag_command(ctx, option, false);
}

fn cmd_memtest(_ctx: &mut CliContext, _option: Option<&str>) {
    let mut scratch = [0u32; 64];
    let mut failures = 0;
    for pattern in [0xAAAA_AAAAu32, 0x5555_5555, 0xFFFF_FFFF, 0x0000_0000].iter() {
        for (i, word) in scratch.iter_mut().enumerate() {
            *word = pattern ^ i as u32;
        }
        for (i, word) in scratch.iter().enumerate() {
            if *word != pattern ^ i as u32 {
                failures += 1;
            }
        }
    }
    if failures == 0 {
        logln!(LS::General, LL::Always, "memtest pass");
    } else {
        logln!(LS::General, LL::Always, "memtest FAIL ({} words)", failures);
    }
}

fn cmd_fan_runtime(ctx: &mut CliContext, _option: Option<&str>) {
    for page in fanctrl::FAN_PAGES.iter() {
        let rpm = fanctrl::read_fan_speed_rpm(&mut ctx.board.i2c[0], *page);
        logln!(LS::Hardw, LL::Always, "fan page {}: {} rpm", page, rpm);
    }
}

fn cmd_fan_pwm_avg(ctx: &mut CliContext, _option: Option<&str>) {
    let mut sum: u32 = 0;
    for page in fanctrl::FAN_PAGES.iter() {
        sum += fanctrl::read_fan_pwm(&mut ctx.board.i2c[0], *page) as u32;
    }
    logln!(
        LS::Hardw,
        LL::Always,
        "avg pwm {}",
        sum / fanctrl::FAN_PAGES.len() as u32
    );
}

fn cmd_test_timer(ctx: &mut CliContext, _option: Option<&str>) {
    *ctx.test_timer_count = 5;
}

fn cmd_help(_ctx: &mut CliContext, _option: Option<&str>) {
    for command in COMMANDS.iter() {
        logln!(LS::General, LL::Always, "  {}", command.help);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_parser_is_strict() {
        assert_eq!(parse_hex32("0x0"), Some(0));
        assert_eq!(parse_hex32("0x1a2b3c4d"), Some(0x1a2b3c4d));
        assert_eq!(parse_hex32("0xffffffff"), Some(0xffff_ffff));
        // upper case digits, missing prefix, too long, junk: all rejected
        assert_eq!(parse_hex32("0x1A"), None);
        assert_eq!(parse_hex32("1a2b"), None);
        assert_eq!(parse_hex32("0x123456789"), None);
        assert_eq!(parse_hex32("0x"), None);
        assert_eq!(parse_hex32("0xg"), None);
    }

    #[test]
    fn command_lookup_ignores_case() {
        assert!(find_command("help").is_some());
        assert!(find_command("HELP").is_some());
        assert!(find_command("Wb-Read").is_some());
        assert!(find_command("nope").is_none());
    }

    #[test]
    fn every_command_has_distinct_name() {
        for (i, a) in COMMANDS.iter().enumerate() {
            for b in COMMANDS.iter().skip(i + 1) {
                assert!(!a.name.eq_ignore_ascii_case(b.name));
            }
        }
    }
}

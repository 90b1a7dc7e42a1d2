//! Control protocol dispatcher.
//!
//! Requests arrive as UDP payloads on port 0x7778: a `{opcode, sequence}`
//! header followed by opcode-specific fields, all 16-bit big-endian words.
//! Every request produces exactly one response with opcode+1 and the same
//! sequence number; an unrecognized opcode produces the NACK response
//! (opcode 0xFFFF). Handlers never tear the link down: errors travel in the
//! response's status word.
//!
//! The dispatcher works on dedicated command buffers, not the interface
//! packet buffers, so handlers are free to reconfigure any interface.

use crate::board::{Board, NUM_ETHERNET_INTERFACES, NUM_MEZZ_SITES};
use crate::fanctrl;
use crate::fault_log::{FaultLogs, NUM_LOG_ENTRIES};
use crate::mezz::{Mezzanine, MezzCard};
use crate::qsfp::QSFP_MEZZANINE_RESET;
use crate::sensors;
use debug::{logln, LL, LS};
use net::igmp::IgmpSm;
use net::Interface;
use skarab_hal::board_regs::C_WR_ETH_IF_CTL_ADDR;
use skarab_hal::flash_sdram::SdramCtl;
use skarab_hal::mem_map::DSP_REGISTER_ADDR;

// command opcodes; responses are request + 1
pub const WRITE_REG: u16 = 0x0001;
pub const READ_REG: u16 = 0x0003;
pub const WRITE_WISHBONE: u16 = 0x0005;
pub const READ_WISHBONE: u16 = 0x0007;
pub const WRITE_I2C: u16 = 0x0009;
pub const READ_I2C: u16 = 0x000B;
pub const SDRAM_RECONFIGURE: u16 = 0x000D;
pub const READ_FLASH_WORDS: u16 = 0x000F;
pub const PROGRAM_FLASH_WORDS: u16 = 0x0011;
pub const ERASE_FLASH_BLOCK: u16 = 0x0013;
pub const READ_SPI_PAGE: u16 = 0x0015;
pub const PROGRAM_SPI_PAGE: u16 = 0x0017;
pub const ERASE_SPI_SECTOR: u16 = 0x0019;
pub const ONE_WIRE_READ_ROM: u16 = 0x001B;
pub const ONE_WIRE_DS2433_WRITE_MEM: u16 = 0x001D;
pub const ONE_WIRE_DS2433_READ_MEM: u16 = 0x001F;
pub const DEBUG_CONFIGURE_ETHERNET: u16 = 0x0021;
pub const DEBUG_ADD_ARP_CACHE_ENTRY: u16 = 0x0023;
pub const GET_EMBEDDED_SOFTWARE_VERS: u16 = 0x0025;
pub const PMBUS_READ_I2C: u16 = 0x0027;
pub const SDRAM_PROGRAM: u16 = 0x0029;
pub const CONFIGURE_MULTICAST: u16 = 0x002B;
pub const DEBUG_LOOPBACK_TEST: u16 = 0x002D;
pub const QSFP_RESET_AND_PROG: u16 = 0x002F;
pub const HMC_READ_I2C: u16 = 0x0031;
pub const HMC_WRITE_I2C: u16 = 0x0033;
pub const ADC_MEZZANINE_RESET_AND_PROG: u16 = 0x0039;
pub const GET_SENSOR_DATA: u16 = 0x0043;
pub const SET_FAN_SPEED: u16 = 0x0045;
pub const BIG_READ_WISHBONE: u16 = 0x0047;
pub const BIG_WRITE_WISHBONE: u16 = 0x0049;
pub const SDRAM_PROGRAM_OVER_WISHBONE: u16 = 0x0051;
pub const SET_DHCP_TUNING_DEBUG: u16 = 0x0053;
pub const GET_DHCP_TUNING_DEBUG: u16 = 0x0055;
pub const GET_CURRENT_LOGS: u16 = 0x0057;
pub const GET_VOLTAGE_LOGS: u16 = 0x0059;
pub const GET_FANCONTROLLER_LOGS: u16 = 0x005B;
pub const CLEAR_FANCONTROLLER_LOGS: u16 = 0x005D;
pub const DHCP_RESET_STATE_MACHINE: u16 = 0x005F;
pub const MULTICAST_LEAVE_GROUP: u16 = 0x0061;
pub const GET_DHCP_MONITOR_TIMEOUT: u16 = 0x0063;
pub const GET_MICROBLAZE_UPTIME: u16 = 0x0065;
pub const FPGA_FANCONTROLLER_UPDATE: u16 = 0x0067;
pub const GET_FPGA_FANCONTROLLER_LUT: u16 = 0x0069;
pub const NACK_OPCODE_RESP: u16 = 0xFFFF;

pub const EMBEDDED_SOFTWARE_VERSION_MAJOR: u16 = 3;
pub const EMBEDDED_SOFTWARE_VERSION_MINOR: u16 = 21;
pub const EMBEDDED_SOFTWARE_VERSION_PATCH: u16 = 127;

pub const CMD_STATUS_SUCCESS: u16 = 0;
pub const CMD_STATUS_ERROR_GENERAL: u16 = 1;
pub const CMD_STATUS_ERROR_IF_OUT_OF_RANGE: u16 = 2;
pub const CMD_STATUS_ERROR_IF_NOT_PRESENT: u16 = 3;

const BOARD_REG: u16 = 0x1;
const DSP_REG: u16 = 0x2;

pub const MAX_I2C_WRITE_BYTES: usize = 33;
/// 16-bit words per SDRAM-over-wishbone bitstream chunk
pub const CHUNK_SIZE: usize = 994;

/// Big enough for the largest request and response (big wishbone: ~1000 words)
pub const CMD_BUFFER_LEN: usize = 4096;

/// Progress of a chunked SDRAM-over-wishbone programming session
pub struct SdramProgramState {
    pub expected_chunk: u16,
    pub total_chunks: u16,
}

impl SdramProgramState {
    pub const fn new() -> Self {
        SdramProgramState {
            expected_chunk: 0,
            total_chunks: 0,
        }
    }
}

/// Everything a handler may need to reach
pub struct CmdContext<'a, 'b> {
    pub board: &'a mut Board,
    /// interface the request arrived on
    pub iface_id: u8,
    pub ifaces: &'a mut [Interface<'b>],
    pub igmp: &'a mut [IgmpSm],
    pub mezz: &'a mut [Mezzanine; NUM_MEZZ_SITES],
    pub fault_logs: &'a mut FaultLogs,
    pub sdram_prog: &'a mut SdramProgramState,
    /// ticks the DHCP monitor waits before forcing a client reset
    pub dhcp_monitor_timeout: &'a mut u16,
    /// set by the SDRAM-reconfigure handler; acted on after the response
    /// has gone out
    pub reboot_requested: &'a mut bool,
    pub uptime_seconds: u32,
}

/// Request word `i` (big-endian); absent words read as zero so a truncated
/// request still yields exactly one well-formed response
fn w(cmd: &[u8], i: usize) -> u16 {
    if 2 * i + 1 < cmd.len() {
        u16::from_be_bytes([cmd[2 * i], cmd[2 * i + 1]])
    } else {
        0
    }
}

fn w32(cmd: &[u8], hi: usize) -> u32 {
    ((w(cmd, hi) as u32) << 16) | w(cmd, hi + 1) as u32
}

fn put(resp: &mut [u8], i: usize, value: u16) {
    resp[2 * i..2 * i + 2].copy_from_slice(&value.to_be_bytes());
}

/// Echo request words `from..from+count` into the same response positions
fn echo(resp: &mut [u8], cmd: &[u8], from: usize, count: usize) {
    for i in from..from + count {
        put(resp, i, w(cmd, i));
    }
}

/// Dispatch one request; returns the response length in bytes (never zero
/// for a request that carried at least a header)
pub fn command_sorter(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    if cmd.len() < 4 {
        return 0;
    }
    let opcode = w(cmd, 0);
    let sequence = w(cmd, 1);
    let clear_len = CMD_BUFFER_LEN.min(resp.len());
    for b in resp[..clear_len].iter_mut() {
        *b = 0;
    }
    put(resp, 0, opcode.wrapping_add(1));
    put(resp, 1, sequence);

    let words = match opcode {
        WRITE_REG => write_reg(ctx, cmd, resp),
        READ_REG => read_reg(ctx, cmd, resp),
        WRITE_WISHBONE => write_wishbone(ctx, cmd, resp),
        READ_WISHBONE => read_wishbone(ctx, cmd, resp),
        WRITE_I2C => write_i2c(ctx, cmd, resp),
        READ_I2C => read_i2c(ctx, cmd, resp),
        SDRAM_RECONFIGURE => sdram_reconfigure(ctx, cmd, resp),
        READ_FLASH_WORDS => read_flash_words(ctx, cmd, resp),
        PROGRAM_FLASH_WORDS => program_flash_words(ctx, cmd, resp),
        ERASE_FLASH_BLOCK => erase_flash_block(ctx, cmd, resp),
        READ_SPI_PAGE => read_spi_page(ctx, cmd, resp),
        PROGRAM_SPI_PAGE => program_spi_page(ctx, cmd, resp),
        ERASE_SPI_SECTOR => erase_spi_sector(ctx, cmd, resp),
        ONE_WIRE_READ_ROM => one_wire_read_rom(ctx, cmd, resp),
        ONE_WIRE_DS2433_WRITE_MEM => ds2433_write_mem(ctx, cmd, resp),
        ONE_WIRE_DS2433_READ_MEM => ds2433_read_mem(ctx, cmd, resp),
        DEBUG_CONFIGURE_ETHERNET => configure_ethernet(ctx, cmd, resp),
        DEBUG_ADD_ARP_CACHE_ENTRY => add_arp_cache_entry(ctx, cmd, resp),
        GET_EMBEDDED_SOFTWARE_VERS => get_version(ctx, cmd, resp),
        PMBUS_READ_I2C => pmbus_read_i2c(ctx, cmd, resp),
        SDRAM_PROGRAM => sdram_program(ctx, cmd, resp),
        CONFIGURE_MULTICAST => configure_multicast(ctx, cmd, resp),
        DEBUG_LOOPBACK_TEST => loopback_test(ctx, cmd, resp),
        QSFP_RESET_AND_PROG => qsfp_reset_and_program(ctx, cmd, resp),
        HMC_READ_I2C => hmc_read_i2c(ctx, cmd, resp),
        HMC_WRITE_I2C => hmc_write_i2c(ctx, cmd, resp),
        ADC_MEZZANINE_RESET_AND_PROG => adc_reset_and_program(ctx, cmd, resp),
        GET_SENSOR_DATA => get_sensor_data(ctx, cmd, resp),
        SET_FAN_SPEED => set_fan_speed(ctx, cmd, resp),
        BIG_READ_WISHBONE => big_read_wishbone(ctx, cmd, resp),
        BIG_WRITE_WISHBONE => big_write_wishbone(ctx, cmd, resp),
        SDRAM_PROGRAM_OVER_WISHBONE => sdram_program_over_wishbone(ctx, cmd, resp),
        SET_DHCP_TUNING_DEBUG => set_dhcp_tuning(ctx, cmd, resp),
        GET_DHCP_TUNING_DEBUG => get_dhcp_tuning(ctx, cmd, resp),
        GET_CURRENT_LOGS => get_current_logs(ctx, cmd, resp),
        GET_VOLTAGE_LOGS => get_voltage_logs(ctx, cmd, resp),
        GET_FANCONTROLLER_LOGS => get_fanctrlr_logs(ctx, cmd, resp),
        CLEAR_FANCONTROLLER_LOGS => clear_fanctrlr_logs(ctx, cmd, resp),
        DHCP_RESET_STATE_MACHINE => dhcp_reset_state_machine(ctx, cmd, resp),
        MULTICAST_LEAVE_GROUP => multicast_leave_group(ctx, cmd, resp),
        GET_DHCP_MONITOR_TIMEOUT => get_dhcp_monitor_timeout(ctx, cmd, resp),
        GET_MICROBLAZE_UPTIME => get_uptime(ctx, cmd, resp),
        FPGA_FANCONTROLLER_UPDATE => fanctrlr_lut_update(ctx, cmd, resp),
        GET_FPGA_FANCONTROLLER_LUT => get_fanctrlr_lut(ctx, cmd, resp),
        _ => {
            logln!(LS::Ctrl, LL::Debug, "CTRL [..] unknown opcode {:04x}", opcode);
            put(resp, 0, NACK_OPCODE_RESP);
            11
        }
    };
    words * 2
}

fn write_reg(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let board_reg = w(cmd, 2);
    let addr = w(cmd, 3) as u32;
    let data = w32(cmd, 4);
    match board_reg {
        BOARD_REG => ctx.board.regs.write(addr, data),
        DSP_REG => ctx.board.wb.write(DSP_REGISTER_ADDR + addr, data),
        _ => (),
    }
    echo(resp, cmd, 2, 4);
    11
}

fn read_reg(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let board_reg = w(cmd, 2);
    let addr = w(cmd, 3) as u32;
    let data = match board_reg {
        BOARD_REG => ctx.board.regs.read(addr),
        DSP_REG => ctx.board.wb.read(DSP_REGISTER_ADDR + addr),
        _ => 0,
    };
    echo(resp, cmd, 2, 2);
    put(resp, 4, (data >> 16) as u16);
    put(resp, 5, data as u16);
    11
}

fn write_wishbone(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let addr = w32(cmd, 2);
    let data = w32(cmd, 4);
    ctx.board.wb.write(addr, data);
    echo(resp, cmd, 2, 4);
    let err = ctx.board.wb.read_and_clear_error();
    put(resp, 6, if err { 1 } else { 0 });
    11
}

fn read_wishbone(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let addr = w32(cmd, 2);
    let data = ctx.board.wb.read(addr);
    echo(resp, cmd, 2, 2);
    put(resp, 4, (data >> 16) as u16);
    put(resp, 5, data as u16);
    let err = ctx.board.wb.read_and_clear_error();
    put(resp, 6, if err { 1 } else { 0 });
    11
}

fn write_i2c(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let id = w(cmd, 2) as usize;
    let slave = w(cmd, 3) as u8;
    let num = (w(cmd, 4) as usize).min(MAX_I2C_WRITE_BYTES);
    let mut bytes = [0u8; MAX_I2C_WRITE_BYTES];
    for (i, b) in bytes.iter_mut().enumerate().take(num) {
        *b = w(cmd, 5 + i) as u8;
    }
    let success = if id < ctx.board.i2c.len() && num > 0 {
        ctx.board.i2c[id].write_bytes(slave, &bytes[..num]).is_ok()
    } else {
        false
    };
    echo(resp, cmd, 2, 3 + MAX_I2C_WRITE_BYTES);
    put(resp, 5 + MAX_I2C_WRITE_BYTES, success as u16);
    39
}

fn read_i2c(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let id = w(cmd, 2) as usize;
    let slave = w(cmd, 3) as u8;
    let num = (w(cmd, 4) as usize).min(32);
    let mut bytes = [0u8; 32];
    let success = if id < ctx.board.i2c.len() && num > 0 {
        ctx.board.i2c[id].read_bytes(slave, &mut bytes[..num]).is_ok()
    } else {
        false
    };
    echo(resp, cmd, 2, 3);
    for (i, b) in bytes.iter().enumerate() {
        put(resp, 5 + i, *b as u16);
    }
    put(resp, 37, success as u16);
    39
}

fn sdram_reconfigure(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let output_mode = w(cmd, 2);
    let clear_sdram = w(cmd, 3);
    let finished_writing = w(cmd, 4);
    let about_to_boot = w(cmd, 5);
    let do_reboot = w(cmd, 6);
    let reset_read_addr = w(cmd, 7);
    let clear_eth_stats = w(cmd, 8);
    let debug_read_mode = w(cmd, 9);
    let do_async_read = w(cmd, 10);
    let do_continuity = w(cmd, 11);
    let continuity_low = w(cmd, 12);
    let continuity_high = w(cmd, 13);

    let flash = &mut ctx.board.flash;
    let mut set = SdramCtl::empty();
    let mut clear = SdramCtl::empty();
    let flag = |cond: u16, bit: SdramCtl, set: &mut SdramCtl, clear: &mut SdramCtl| {
        if cond != 0 {
            set.insert(bit);
        } else {
            clear.insert(bit);
        }
    };
    flag(output_mode, SdramCtl::OUTPUT_MODE, &mut set, &mut clear);
    flag(finished_writing, SdramCtl::FINISHED_WRITING, &mut set, &mut clear);
    flag(about_to_boot, SdramCtl::ABOUT_TO_BOOT, &mut set, &mut clear);
    flag(debug_read_mode, SdramCtl::DEBUG_READ_MODE, &mut set, &mut clear);
    flash.sdram_set_ctl(set, clear);
    if clear_sdram != 0 {
        flash.sdram_set_ctl(SdramCtl::CLEAR, SdramCtl::empty());
        flash.sdram_set_ctl(SdramCtl::empty(), SdramCtl::CLEAR);
    }
    if reset_read_addr != 0 {
        flash.sdram_set_ctl(SdramCtl::RESET_READ_ADDR, SdramCtl::empty());
        flash.sdram_set_ctl(SdramCtl::empty(), SdramCtl::RESET_READ_ADDR);
    }
    if clear_eth_stats != 0 {
        flash.sdram_set_ctl(SdramCtl::CLEAR_ETH_STATS, SdramCtl::empty());
        flash.sdram_set_ctl(SdramCtl::empty(), SdramCtl::CLEAR_ETH_STATS);
    }
    let async_data = if do_async_read != 0 {
        flash.sdram_async_read()
    } else {
        0
    };
    let continuity = if do_continuity != 0 {
        flash.continuity_test(((continuity_high as u32) << 16) | continuity_low as u32)
    } else {
        0
    };
    let (frames, bad, overload) = flash.sdram_frame_stats();
    if do_reboot != 0 {
        // acted on by the main loop once this response is on the wire
        *ctx.reboot_requested = true;
    }

    echo(resp, cmd, 2, 9);
    put(resp, 11, frames);
    put(resp, 12, bad);
    put(resp, 13, overload);
    put(resp, 14, (async_data >> 16) as u16);
    put(resp, 15, async_data as u16);
    put(resp, 16, do_continuity);
    put(resp, 17, continuity as u16);
    put(resp, 18, (continuity >> 16) as u16);
    19
}

fn read_flash_words(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let addr = w32(cmd, 2);
    let num = (w(cmd, 4) as usize).min(384);
    echo(resp, cmd, 2, 3);
    for i in 0..num {
        let word = ctx.board.flash.read_flash_word(addr + i as u32).unwrap_or(0xffff);
        put(resp, 5 + i, word);
    }
    391
}

fn program_flash_words(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let addr = w32(cmd, 2);
    let num = (w(cmd, 5) as usize).min(256);
    let mut success = true;
    for i in 0..num {
        let word = w(cmd, 9 + i);
        if ctx.board.flash.program_flash_word(addr + i as u32, word).is_err() {
            success = false;
            break;
        }
    }
    echo(resp, cmd, 2, 7);
    put(resp, 9, success as u16);
    11
}

fn erase_flash_block(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let addr = w32(cmd, 2);
    let success = ctx.board.flash.erase_flash_block(addr).is_ok();
    echo(resp, cmd, 2, 2);
    put(resp, 4, success as u16);
    11
}

fn read_spi_page(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let addr = w32(cmd, 2);
    let num = (w(cmd, 4) as usize).min(264);
    let mut page = [0u8; 264];
    let success = ctx.board.spi.read_page(addr, &mut page[..num.max(1)]).is_ok();
    echo(resp, cmd, 2, 3);
    for (i, b) in page.iter().enumerate() {
        put(resp, 5 + i, *b as u16);
    }
    put(resp, 269, success as u16);
    271
}

fn program_spi_page(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let addr = w32(cmd, 2);
    let num = (w(cmd, 4) as usize).min(264);
    let mut page = [0u8; 264];
    for (i, b) in page.iter_mut().enumerate().take(num) {
        *b = w(cmd, 5 + i) as u8;
    }
    let mut verify = [0u8; 264];
    let success = ctx.board.spi.program_page(addr, &page[..num.max(1)]).is_ok()
        && ctx.board.spi.read_page(addr, &mut verify[..num.max(1)]).is_ok()
        && verify[..num] == page[..num];
    echo(resp, cmd, 2, 3);
    for (i, b) in verify.iter().enumerate() {
        put(resp, 5 + i, *b as u16);
    }
    put(resp, 269, success as u16);
    271
}

fn erase_spi_sector(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let addr = w32(cmd, 2);
    let success = ctx.board.spi.erase_sector(addr).is_ok();
    echo(resp, cmd, 2, 2);
    put(resp, 4, success as u16);
    11
}

fn one_wire_read_rom(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let port = w(cmd, 2);
    let mut rom = [0u8; 8];
    let success = ctx.board.one_wire.read_rom(&mut rom, port).is_ok();
    echo(resp, cmd, 2, 1);
    for (i, b) in rom.iter().enumerate() {
        put(resp, 3 + i, *b as u16);
    }
    put(resp, 11, success as u16);
    15
}

fn ds2433_write_mem(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let mut rom = [0u8; 8];
    for (i, b) in rom.iter_mut().enumerate() {
        *b = w(cmd, 2 + i) as u8;
    }
    let skip_rom = w(cmd, 10);
    let mut bytes = [0u8; 32];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = w(cmd, 11 + i) as u8;
    }
    let num = (w(cmd, 43) as usize).min(32);
    let ta1 = w(cmd, 44) as u8;
    let ta2 = w(cmd, 45) as u8;
    let port = w(cmd, 46);
    let rom_sel = if skip_rom != 0 { None } else { Some(&rom) };
    let success = num > 0
        && ctx
            .board
            .one_wire
            .ds2433_write_mem(rom_sel, &bytes[..num], ta1, ta2, port)
            .is_ok();
    echo(resp, cmd, 2, 45);
    put(resp, 47, success as u16);
    51
}

fn ds2433_read_mem(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let mut rom = [0u8; 8];
    for (i, b) in rom.iter_mut().enumerate() {
        *b = w(cmd, 2 + i) as u8;
    }
    let skip_rom = w(cmd, 10);
    let num = (w(cmd, 11) as usize).min(32);
    let ta1 = w(cmd, 12) as u8;
    let ta2 = w(cmd, 13) as u8;
    let port = w(cmd, 14);
    let mut bytes = [0u8; 32];
    let rom_sel = if skip_rom != 0 { None } else { Some(&rom) };
    let success = num > 0
        && ctx
            .board
            .one_wire
            .ds2433_read_mem(rom_sel, &mut bytes[..num], ta1, ta2, port)
            .is_ok();
    echo(resp, cmd, 2, 9);
    for (i, b) in bytes.iter().enumerate() {
        put(resp, 11 + i, *b as u16);
    }
    put(resp, 43, w(cmd, 11));
    put(resp, 44, ta1 as u16);
    put(resp, 45, ta2 as u16);
    put(resp, 46, port);
    put(resp, 47, success as u16);
    51
}

fn configure_ethernet(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let id = w(cmd, 2) as usize;
    echo(resp, cmd, 2, 14);
    if id >= NUM_ETHERNET_INTERFACES {
        return 19;
    }
    let mac = [
        (w(cmd, 3) >> 8) as u8,
        w(cmd, 3) as u8,
        (w(cmd, 4) >> 8) as u8,
        w(cmd, 4) as u8,
        (w(cmd, 5) >> 8) as u8,
        w(cmd, 5) as u8,
    ];
    let port = w(cmd, 6);
    let gateway = w32(cmd, 7);
    let ip = w32(cmd, 9);
    let mc_ip = w32(cmd, 11);
    let mc_mask = w32(cmd, 13);
    let enable = w(cmd, 15) != 0;

    let mac_core = &mut ctx.board.mac[id];
    mac_core.set_source_mac(&mac);
    mac_core.set_source_ip(ip);
    mac_core.set_multicast(mc_ip, mc_mask);
    mac_core.set_gateway_arp_cache_addr(gateway as u8);
    mac_core.set_port_and_enable(port, enable);

    let iface = &mut ctx.ifaces[id];
    iface.mac = mac;
    iface.gateway = gateway;
    iface.multicast_ip = mc_ip;
    iface.multicast_mask = mc_mask;
    iface.configure(ip, iface.netmask);
    19
}

fn add_arp_cache_entry(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let id = w(cmd, 2) as usize;
    let ip_low8 = w(cmd, 3) as u32;
    let mac_high = w(cmd, 4) as u32;
    let mac_lower = ((w(cmd, 5) as u32) << 16) | w(cmd, 6) as u32;
    if id < NUM_ETHERNET_INTERFACES {
        ctx.board.mac[id].program_arp_cache_entry(ip_low8, mac_high, mac_lower);
    }
    echo(resp, cmd, 2, 5);
    11
}

fn get_version(ctx: &mut CmdContext, _cmd: &[u8], resp: &mut [u8]) -> usize {
    put(resp, 2, EMBEDDED_SOFTWARE_VERSION_MAJOR);
    put(resp, 3, EMBEDDED_SOFTWARE_VERSION_MINOR);
    put(resp, 4, EMBEDDED_SOFTWARE_VERSION_PATCH);
    let mut bootloader = (0u8, 0u8);
    for m in ctx.mezz.iter_mut() {
        if let MezzCard::Qsfp(ref sm) = m.card {
            bootloader = sm.bootloader_version;
        }
    }
    put(resp, 5, bootloader.0 as u16);
    put(resp, 6, bootloader.1 as u16);
    11
}

fn pmbus_read_i2c(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let id = w(cmd, 2) as usize;
    let slave = w(cmd, 3) as u8;
    let command_code = w(cmd, 4) as u8;
    let num = (w(cmd, 37) as usize).min(32).max(1);
    let mut bytes = [0u8; 32];
    let success = if id < ctx.board.i2c.len() {
        ctx.board.i2c[id]
            .write_read(slave, &[command_code], &mut bytes[..num])
            .is_ok()
    } else {
        false
    };
    echo(resp, cmd, 2, 3);
    for (i, b) in bytes.iter().enumerate() {
        put(resp, 5 + i, *b as u16);
    }
    put(resp, 37, w(cmd, 37));
    put(resp, 38, success as u16);
    39
}

fn sdram_program(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    // first/last markers then raw bitstream words to stream into SDRAM
    let first = w(cmd, 2);
    let last = w(cmd, 3);
    if first != 0 {
        ctx.board.flash.sdram_set_ctl(SdramCtl::CLEAR, SdramCtl::empty());
        ctx.board.flash.sdram_set_ctl(SdramCtl::empty(), SdramCtl::CLEAR);
    }
    let data_words = (cmd.len() / 2).saturating_sub(4);
    let mut i = 0;
    while i + 1 < data_words {
        let value = ((w(cmd, 4 + i) as u32) << 16) | w(cmd, 5 + i) as u32;
        ctx.board.flash.sdram_program_word(value);
        i += 2;
    }
    if last != 0 {
        ctx.board
            .flash
            .sdram_set_ctl(SdramCtl::FINISHED_WRITING, SdramCtl::empty());
    }
    echo(resp, cmd, 2, 2);
    11
}

fn configure_multicast(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let mut id = w(cmd, 2) as usize;
    if id == 0xff {
        id = ctx.iface_id as usize;
    }
    let mc_ip = w32(cmd, 3);
    let mc_mask = w32(cmd, 5);
    echo(resp, cmd, 2, 5);
    if id >= NUM_ETHERNET_INTERFACES {
        put(resp, 7, CMD_STATUS_ERROR_IF_OUT_OF_RANGE);
        return 11;
    }
    ctx.board.mac[id].set_multicast(mc_ip, mc_mask);
    ctx.ifaces[id].multicast_ip = mc_ip;
    ctx.ifaces[id].multicast_mask = mc_mask;
    ctx.igmp[id].join_group(mc_ip, mc_mask);
    put(resp, 7, CMD_STATUS_SUCCESS);
    11
}

fn loopback_test(_ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    echo(resp, cmd, 2, 257);
    put(resp, 259, 1); // valid
    263
}

fn qsfp_reset_and_program(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let reset = w(cmd, 2);
    let program = w(cmd, 3);
    if reset != 0 {
        // pulse the mezzanine reset line, then restart the handshake
        ctx.board.regs.rmw(C_WR_ETH_IF_CTL_ADDR, 0, QSFP_MEZZANINE_RESET);
        ctx.board.regs.rmw(C_WR_ETH_IF_CTL_ADDR, QSFP_MEZZANINE_RESET, 0);
        for m in ctx.mezz.iter_mut() {
            if let Some(sm) = m.qsfp() {
                sm.reset();
                sm.resume();
            }
        }
        ctx.board.mezz_i2c_access = true;
    }
    if program != 0 {
        // the host is about to drive the STM bootloader itself
        for m in ctx.mezz.iter_mut() {
            if let Some(sm) = m.qsfp() {
                sm.pause();
            }
        }
        ctx.board.mezz_i2c_access = false;
    }
    echo(resp, cmd, 2, 2);
    11
}

fn hmc_read_i2c(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let id = w(cmd, 2) as usize;
    let slave = w(cmd, 3) as u8;
    let mut addr = [0u8; 4];
    for (i, b) in addr.iter_mut().enumerate() {
        *b = w(cmd, 4 + i) as u8;
    }
    let mut bytes = [0u8; 4];
    let success = if id < ctx.board.i2c.len() {
        ctx.board.i2c[id].write_read(slave, &addr, &mut bytes).is_ok()
    } else {
        false
    };
    echo(resp, cmd, 2, 6);
    for (i, b) in bytes.iter().enumerate() {
        put(resp, 8 + i, *b as u16);
    }
    put(resp, 12, success as u16);
    15
}

fn hmc_write_i2c(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let id = w(cmd, 2) as usize;
    let slave = w(cmd, 3) as u8;
    let mut wr = [0u8; 8];
    for (i, b) in wr.iter_mut().enumerate() {
        *b = w(cmd, 4 + i) as u8;
    }
    let success = if id < ctx.board.i2c.len() {
        ctx.board.i2c[id].write_bytes(slave, &wr).is_ok()
    } else {
        false
    };
    echo(resp, cmd, 2, 10);
    put(resp, 12, success as u16);
    15
}

fn adc_reset_and_program(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let reset = w(cmd, 2);
    let program = w(cmd, 3);
    let site = w(cmd, 4) as usize;
    if site < NUM_MEZZ_SITES {
        if let Some(sm) = ctx.mezz[site].adc() {
            if reset != 0 {
                sm.reset();
                sm.resume();
            }
            if program != 0 {
                sm.pause();
            }
        }
    }
    echo(resp, cmd, 2, 3);
    11
}

fn get_sensor_data(ctx: &mut CmdContext, _cmd: &[u8], resp: &mut [u8]) -> usize {
    let mut data = [0u16; sensors::SENSOR_DATA_WORDS];
    sensors::get_sensor_data(&mut ctx.board.i2c[0], &mut data);
    for (i, word) in data.iter().enumerate() {
        put(resp, 2 + i, *word);
    }
    111
}

fn set_fan_speed(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let page = w(cmd, 2) as u8;
    let pwm = w(cmd, 3);
    let _ = fanctrl::set_fan_speed(&mut ctx.board.i2c[0], page, pwm);
    put(resp, 2, fanctrl::read_fan_pwm(&mut ctx.board.i2c[0], page));
    put(resp, 3, fanctrl::read_fan_speed_rpm(&mut ctx.board.i2c[0], page));
    11
}

fn big_read_wishbone(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let start = w32(cmd, 2);
    let num = (w(cmd, 4) as usize).min(CHUNK_SIZE / 2);
    echo(resp, cmd, 2, 3);
    for i in 0..num {
        let value = ctx.board.wb.read(start + (i as u32) * 4);
        put(resp, 5 + i * 2, (value >> 16) as u16);
        put(resp, 6 + i * 2, value as u16);
    }
    let _ = ctx.board.wb.read_and_clear_error();
    5 + CHUNK_SIZE
}

fn big_write_wishbone(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let start = w32(cmd, 2);
    let num = (w(cmd, 4 + CHUNK_SIZE) as usize).min(CHUNK_SIZE / 2);
    let mut done = 0u16;
    for i in 0..num {
        let value = ((w(cmd, 4 + i * 2) as u32) << 16) | w(cmd, 5 + i * 2) as u32;
        ctx.board.wb.write(start + (i as u32) * 4, value);
        if ctx.board.wb.error_pending() {
            break;
        }
        done += 1;
    }
    let _ = ctx.board.wb.read_and_clear_error();
    echo(resp, cmd, 2, 2);
    put(resp, 4, done);
    11
}

fn sdram_program_over_wishbone(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let chunk_num = w(cmd, 2);
    let chunk_total = w(cmd, 3);
    let mut status = CMD_STATUS_SUCCESS;

    if chunk_num == 0 {
        // new programming session
        ctx.board.flash.sdram_set_ctl(SdramCtl::CLEAR, SdramCtl::empty());
        ctx.board.flash.sdram_set_ctl(SdramCtl::empty(), SdramCtl::CLEAR);
        ctx.sdram_prog.expected_chunk = 0;
        ctx.sdram_prog.total_chunks = chunk_total;
    }
    if chunk_num != ctx.sdram_prog.expected_chunk || chunk_total != ctx.sdram_prog.total_chunks {
        // a lost or repeated chunk poisons the image; make the host restart
        status = CMD_STATUS_ERROR_GENERAL;
        ctx.sdram_prog.expected_chunk = 0;
    } else {
        let data_words = ((cmd.len() / 2).saturating_sub(4)).min(CHUNK_SIZE);
        let mut i = 0;
        while i + 1 < data_words {
            let value = ((w(cmd, 4 + i) as u32) << 16) | w(cmd, 5 + i) as u32;
            ctx.board.flash.sdram_program_word(value);
            i += 2;
        }
        ctx.sdram_prog.expected_chunk = ctx.sdram_prog.expected_chunk.wrapping_add(1);
        if ctx.sdram_prog.expected_chunk == ctx.sdram_prog.total_chunks {
            ctx.board
                .flash
                .sdram_set_ctl(SdramCtl::FINISHED_WRITING, SdramCtl::empty());
        }
    }
    put(resp, 2, chunk_num);
    put(resp, 3, status);
    11
}

fn set_dhcp_tuning(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let init_time = w(cmd, 2);
    let retry_time = w(cmd, 3);
    for iface in ctx.ifaces.iter_mut() {
        iface.dhcp.set_tuning(init_time, retry_time);
    }
    echo(resp, cmd, 2, 2);
    put(resp, 4, CMD_STATUS_SUCCESS);
    11
}

fn get_dhcp_tuning(ctx: &mut CmdContext, _cmd: &[u8], resp: &mut [u8]) -> usize {
    let (init_time, retry_time) = ctx.ifaces[ctx.iface_id as usize].dhcp.tuning();
    put(resp, 2, init_time);
    put(resp, 3, retry_time);
    put(resp, 4, CMD_STATUS_SUCCESS);
    11
}

fn get_current_logs(ctx: &mut CmdContext, _cmd: &[u8], resp: &mut [u8]) -> usize {
    let mut at = 2;
    for entry in ctx.fault_logs.current_entries().iter() {
        for word in entry.to_words().iter() {
            put(resp, at, *word);
            at += 1;
        }
    }
    put(resp, at, 1);
    2 + NUM_LOG_ENTRIES * 7 + 1
}

fn get_voltage_logs(ctx: &mut CmdContext, _cmd: &[u8], resp: &mut [u8]) -> usize {
    let mut at = 2;
    for entry in ctx.fault_logs.voltage_entries().iter() {
        for word in entry.to_words().iter() {
            put(resp, at, *word);
            at += 1;
        }
    }
    put(resp, at, 1);
    2 + NUM_LOG_ENTRIES * 7 + 1
}

fn get_fanctrlr_logs(ctx: &mut CmdContext, _cmd: &[u8], resp: &mut [u8]) -> usize {
    let mut entries = [fanctrl::FanCtrlrLogEntry::default(); fanctrl::NUM_FANCTRLR_LOG_ENTRIES];
    let complete = fanctrl::read_fanctrlr_logs(&mut ctx.board.i2c[0], &mut entries);
    let mut at = 2;
    for entry in entries.iter() {
        put(resp, at, entry.index);
        put(resp, at + 1, entry.count);
        put(resp, at + 2, entry.status_word);
        for (i, word) in entry.status_vout.iter().enumerate() {
            put(resp, at + 3 + i, *word);
        }
        for (i, word) in entry.status_mfr.iter().enumerate() {
            put(resp, at + 6 + i, *word);
        }
        for (i, word) in entry.status_fans.iter().enumerate() {
            put(resp, at + 12 + i, *word);
        }
        at += 15;
    }
    put(resp, at, complete as u16);
    2 + fanctrl::NUM_FANCTRLR_LOG_ENTRIES * 15 + 1 + 3
}

fn clear_fanctrlr_logs(ctx: &mut CmdContext, _cmd: &[u8], resp: &mut [u8]) -> usize {
    let ok = fanctrl::clear_fanctrlr_logs(&mut ctx.board.i2c[0]);
    put(resp, 2, ok as u16);
    11
}

fn dhcp_reset_state_machine(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let link_id = w(cmd, 2) as usize;
    put(resp, 2, link_id as u16);
    let error = if link_id >= ctx.ifaces.len() {
        1 // link non-existent
    } else if !ctx.ifaces[link_id].link_up {
        2 // link currently down
    } else {
        ctx.ifaces[link_id].dhcp.reset();
        0
    };
    put(resp, 3, error);
    11
}

fn multicast_leave_group(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let link_id = w(cmd, 2) as usize;
    put(resp, 2, link_id as u16);
    let success = if link_id < ctx.igmp.len() {
        ctx.igmp[link_id].leave_group();
        1
    } else {
        0
    };
    put(resp, 3, success);
    11
}

fn get_dhcp_monitor_timeout(ctx: &mut CmdContext, _cmd: &[u8], resp: &mut [u8]) -> usize {
    put(resp, 2, *ctx.dhcp_monitor_timeout);
    11
}

fn get_uptime(ctx: &mut CmdContext, _cmd: &[u8], resp: &mut [u8]) -> usize {
    put(resp, 2, (ctx.uptime_seconds >> 16) as u16);
    put(resp, 3, ctx.uptime_seconds as u16);
    11
}

fn fanctrlr_lut_update(ctx: &mut CmdContext, cmd: &[u8], resp: &mut [u8]) -> usize {
    let enable = w(cmd, 2);
    let update_setpoints = w(cmd, 3);
    let mut error = 0u16;
    if update_setpoints != 0 {
        let mut setpoints = [0u16; 16];
        for (i, sp) in setpoints.iter_mut().enumerate() {
            *sp = w(cmd, 4 + i);
        }
        if fanctrl::update_fan_lut(&mut ctx.board.i2c[0], &setpoints).is_err() {
            error = 1;
        }
    }
    if enable != 0 {
        for page in fanctrl::FAN_PAGES.iter() {
            if fanctrl::enable_auto_fan_control(&mut ctx.board.i2c[0], *page).is_err() {
                error = 1;
            }
        }
    }
    // write-to-flash is deliberately not implemented: the controller's
    // flash endurance is the scratchpad's to spend, not the fan curve's
    put(resp, 2, error);
    11
}

fn get_fanctrlr_lut(ctx: &mut CmdContext, _cmd: &[u8], resp: &mut [u8]) -> usize {
    match fanctrl::read_fan_lut(&mut ctx.board.i2c[0]) {
        Ok(setpoints) => {
            for (i, sp) in setpoints.iter().enumerate() {
                put(resp, 2 + i, *sp);
            }
            put(resp, 18, 0);
        }
        Err(_) => put(resp, 18, 1),
    }
    23
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::BoardBases;
    use crate::mezz;

    fn leak_words(len: usize) -> *mut u32 {
        Box::leak(vec![0u32; len].into_boxed_slice()).as_mut_ptr()
    }

    fn test_board() -> Board {
        let bases = BoardBases {
            board_regs: leak_words(64),
            wishbone: leak_words(0x40000),
            flash_sdram: leak_words(64),
            one_wire: leak_words(4),
            spi: leak_words(512),
            i2c: [
                leak_words(8),
                leak_words(8),
                leak_words(8),
                leak_words(8),
                leak_words(8),
            ],
            eth_mac: [
                leak_words(0x3800),
                leak_words(0x3800),
                leak_words(0x3800),
                leak_words(0x3800),
                leak_words(0x3800),
            ],
            wdt: leak_words(4),
        };
        Board::new(bases)
    }

    struct Rig {
        board: Board,
        ifaces: Vec<Interface<'static>>,
        igmp: Vec<IgmpSm>,
        mezz: [Mezzanine; NUM_MEZZ_SITES],
        fault_logs: FaultLogs,
        sdram_prog: SdramProgramState,
        monitor_timeout: u16,
        reboot: bool,
    }

    impl Rig {
        fn new() -> Rig {
            let mut board = test_board();
            let mut ifaces = Vec::new();
            let mut igmp = Vec::new();
            for id in 0..NUM_ETHERNET_INTERFACES as u8 {
                let rx: &'static mut [u8] = Box::leak(vec![0u8; 2048].into_boxed_slice());
                let tx: &'static mut [u8] = Box::leak(vec![0u8; 2048].into_boxed_slice());
                let mut iface =
                    Interface::new(id, rx, tx, [0x06, 0x01, 0x02, 0x03, 0x04, id]).unwrap();
                iface.configure(0x0A00_0702 + id as u32, 0xFFFF_FF00);
                iface.link_up = true;
                ifaces.push(iface);
                igmp.push(IgmpSm::new(id));
            }
            // zeroed status registers: all four sites probe as open
            let mezz = mezz::discover(&mut board);
            Rig {
                board,
                ifaces,
                igmp,
                mezz,
                fault_logs: FaultLogs::new(),
                sdram_prog: SdramProgramState::new(),
                monitor_timeout: 450,
                reboot: false,
            }
        }

        fn dispatch(&mut self, cmd: &[u8]) -> Vec<u8> {
            let mut resp = vec![0u8; CMD_BUFFER_LEN];
            let mut ctx = CmdContext {
                board: &mut self.board,
                iface_id: 0,
                ifaces: &mut self.ifaces,
                igmp: &mut self.igmp,
                mezz: &mut self.mezz,
                fault_logs: &mut self.fault_logs,
                sdram_prog: &mut self.sdram_prog,
                dhcp_monitor_timeout: &mut self.monitor_timeout,
                reboot_requested: &mut self.reboot,
                uptime_seconds: 0x0001_0002,
            };
            let len = command_sorter(&mut ctx, cmd, &mut resp);
            resp.truncate(len);
            resp
        }
    }

    fn request(opcode: u16, sequence: u16, payload: &[u16]) -> Vec<u8> {
        let mut cmd = Vec::new();
        cmd.extend_from_slice(&opcode.to_be_bytes());
        cmd.extend_from_slice(&sequence.to_be_bytes());
        for word in payload {
            cmd.extend_from_slice(&word.to_be_bytes());
        }
        cmd
    }

    fn word(resp: &[u8], i: usize) -> u16 {
        u16::from_be_bytes([resp[2 * i], resp[2 * i + 1]])
    }

    const ALL_OPCODES: [u16; 44] = [
        WRITE_REG,
        READ_REG,
        WRITE_WISHBONE,
        READ_WISHBONE,
        WRITE_I2C,
        READ_I2C,
        SDRAM_RECONFIGURE,
        READ_FLASH_WORDS,
        PROGRAM_FLASH_WORDS,
        ERASE_FLASH_BLOCK,
        READ_SPI_PAGE,
        PROGRAM_SPI_PAGE,
        ERASE_SPI_SECTOR,
        ONE_WIRE_READ_ROM,
        ONE_WIRE_DS2433_WRITE_MEM,
        ONE_WIRE_DS2433_READ_MEM,
        DEBUG_CONFIGURE_ETHERNET,
        DEBUG_ADD_ARP_CACHE_ENTRY,
        GET_EMBEDDED_SOFTWARE_VERS,
        PMBUS_READ_I2C,
        SDRAM_PROGRAM,
        CONFIGURE_MULTICAST,
        DEBUG_LOOPBACK_TEST,
        QSFP_RESET_AND_PROG,
        HMC_READ_I2C,
        HMC_WRITE_I2C,
        ADC_MEZZANINE_RESET_AND_PROG,
        GET_SENSOR_DATA,
        SET_FAN_SPEED,
        BIG_READ_WISHBONE,
        BIG_WRITE_WISHBONE,
        SDRAM_PROGRAM_OVER_WISHBONE,
        SET_DHCP_TUNING_DEBUG,
        GET_DHCP_TUNING_DEBUG,
        GET_CURRENT_LOGS,
        GET_VOLTAGE_LOGS,
        GET_FANCONTROLLER_LOGS,
        CLEAR_FANCONTROLLER_LOGS,
        DHCP_RESET_STATE_MACHINE,
        MULTICAST_LEAVE_GROUP,
        GET_DHCP_MONITOR_TIMEOUT,
        GET_MICROBLAZE_UPTIME,
        FPGA_FANCONTROLLER_UPDATE,
        GET_FPGA_FANCONTROLLER_LUT,
    ];

    #[test]
    fn every_table_opcode_yields_one_response_with_opcode_plus_one() {
        let mut rig = Rig::new();
        for (n, opcode) in ALL_OPCODES.iter().enumerate() {
            let seq = 0x100 + n as u16;
            let resp = rig.dispatch(&request(*opcode, seq, &[]));
            assert!(resp.len() >= 4, "opcode {:04x} gave no response", opcode);
            assert_eq!(word(&resp, 0), opcode + 1, "opcode {:04x}", opcode);
            assert_eq!(word(&resp, 1), seq, "opcode {:04x}", opcode);
        }
    }

    #[test]
    fn unknown_opcode_yields_single_nack() {
        let mut rig = Rig::new();
        let resp = rig.dispatch(&request(0x00FE, 0x0007, &[0xAAAA]));
        assert_eq!(resp.len(), 22);
        assert_eq!(word(&resp, 0), 0xFFFF);
        assert_eq!(word(&resp, 1), 0x0007);
        assert!(resp[4..].iter().all(|b| *b == 0));
    }

    #[test]
    fn read_reg_reflects_mocked_register_value() {
        let mut rig = Rig::new();
        // plant a value through the write path, then read it back
        let wr = rig.dispatch(&request(WRITE_REG, 0x0041, &[0x1, 0x0000, 0xCAFE, 0xF00D]));
        assert_eq!(word(&wr, 0), WRITE_REG + 1);
        let resp = rig.dispatch(&request(READ_REG, 0x0042, &[0x1, 0x0000]));
        assert_eq!(resp.len(), 22);
        assert_eq!(word(&resp, 0), 0x0004);
        assert_eq!(word(&resp, 1), 0x0042);
        assert_eq!(word(&resp, 2), 0x1); // board reg selector echoed
        assert_eq!(word(&resp, 3), 0x0000); // address echoed
        assert_eq!(word(&resp, 4), 0xCAFE);
        assert_eq!(word(&resp, 5), 0xF00D);
    }

    #[test]
    fn wishbone_round_trip_and_error_latch() {
        let mut rig = Rig::new();
        let resp = rig.dispatch(&request(
            WRITE_WISHBONE,
            1,
            &[0x0000, 0x0100, 0xDEAD, 0xBEEF],
        ));
        assert_eq!(word(&resp, 6), 0); // in range
        let resp = rig.dispatch(&request(READ_WISHBONE, 2, &[0x0000, 0x0100]));
        assert_eq!(word(&resp, 4), 0xDEAD);
        assert_eq!(word(&resp, 5), 0xBEEF);
        assert_eq!(word(&resp, 6), 0);
        // past the decoded window: latched error in the status word
        let resp = rig.dispatch(&request(WRITE_WISHBONE, 3, &[0x0010, 0x0000, 0, 1]));
        assert_eq!(word(&resp, 6), 1);
        // latch cleared by the failing response itself
        let resp = rig.dispatch(&request(READ_WISHBONE, 4, &[0x0000, 0x0100]));
        assert_eq!(word(&resp, 6), 0);
    }

    #[test]
    fn loopback_echoes_test_words() {
        let mut rig = Rig::new();
        let mut payload = [0u16; 257];
        payload[0] = 0; // id
        for (i, word) in payload[1..].iter_mut().enumerate() {
            *word = 0xA000 + i as u16;
        }
        let resp = rig.dispatch(&request(DEBUG_LOOPBACK_TEST, 5, &payload));
        assert_eq!(word(&resp, 3), 0xA000);
        assert_eq!(word(&resp, 258), 0xA000 + 255);
        assert_eq!(word(&resp, 259), 1); // valid
    }

    #[test]
    fn version_response_carries_software_version() {
        let mut rig = Rig::new();
        let resp = rig.dispatch(&request(GET_EMBEDDED_SOFTWARE_VERS, 9, &[]));
        assert_eq!(word(&resp, 2), EMBEDDED_SOFTWARE_VERSION_MAJOR);
        assert_eq!(word(&resp, 3), EMBEDDED_SOFTWARE_VERSION_MINOR);
        assert_eq!(word(&resp, 4), EMBEDDED_SOFTWARE_VERSION_PATCH);
    }

    #[test]
    fn uptime_and_monitor_timeout_report_context_state() {
        let mut rig = Rig::new();
        let resp = rig.dispatch(&request(GET_MICROBLAZE_UPTIME, 1, &[]));
        assert_eq!(word(&resp, 2), 0x0001);
        assert_eq!(word(&resp, 3), 0x0002);
        let resp = rig.dispatch(&request(GET_DHCP_MONITOR_TIMEOUT, 2, &[]));
        assert_eq!(word(&resp, 2), 450);
    }

    #[test]
    fn multicast_configure_starts_igmp_join() {
        let mut rig = Rig::new();
        // 239.1.2.0/30 on the arrival interface (id 0xff)
        let resp = rig.dispatch(&request(
            CONFIGURE_MULTICAST,
            3,
            &[0x00ff, 0xEF01, 0x0200, 0xFFFF, 0xFFFC],
        ));
        assert_eq!(word(&resp, 7), CMD_STATUS_SUCCESS);
        assert_eq!(rig.igmp[0].subscription(), (0xEF01_0200, 0xFFFF_FFFC));
        let mut reports = 0;
        for _ in 0..8 {
            if let net::igmp::IgmpAction::Send(net::igmp::IgmpMessage::MembershipReport, _) =
                rig.igmp[0].step()
            {
                reports += 1;
            }
        }
        assert_eq!(reports, 4);

        let resp = rig.dispatch(&request(CONFIGURE_MULTICAST, 4, &[9, 0, 0, 0, 0]));
        assert_eq!(word(&resp, 7), CMD_STATUS_ERROR_IF_OUT_OF_RANGE);
    }

    #[test]
    fn dhcp_reset_validates_link() {
        let mut rig = Rig::new();
        let resp = rig.dispatch(&request(DHCP_RESET_STATE_MACHINE, 1, &[7]));
        assert_eq!(word(&resp, 3), 1); // non-existent
        rig.ifaces[1].link_up = false;
        let resp = rig.dispatch(&request(DHCP_RESET_STATE_MACHINE, 2, &[1]));
        assert_eq!(word(&resp, 3), 2); // down
        let resp = rig.dispatch(&request(DHCP_RESET_STATE_MACHINE, 3, &[0]));
        assert_eq!(word(&resp, 3), 0);
    }

    #[test]
    fn dhcp_tuning_set_then_get_round_trips() {
        let mut rig = Rig::new();
        let resp = rig.dispatch(&request(SET_DHCP_TUNING_DEBUG, 1, &[5, 77]));
        assert_eq!(word(&resp, 4), CMD_STATUS_SUCCESS);
        let resp = rig.dispatch(&request(GET_DHCP_TUNING_DEBUG, 2, &[]));
        assert_eq!(word(&resp, 2), 5);
        assert_eq!(word(&resp, 3), 77);
    }

    #[test]
    fn spi_page_program_verifies_against_readback() {
        let mut rig = Rig::new();
        let mut payload = [0u16; 3 + 264];
        payload[0] = 0x0000;
        payload[1] = 0x0000; // address 0
        payload[2] = 8; // bytes
        for (i, word) in payload[3..11].iter_mut().enumerate() {
            *word = 0x30 + i as u16;
        }
        let resp = rig.dispatch(&request(PROGRAM_SPI_PAGE, 1, &payload));
        assert_eq!(word(&resp, 0), PROGRAM_SPI_PAGE + 1);
        // RAM-backed controller reads back exactly what was programmed
        assert_eq!(word(&resp, 269), 1);
        assert_eq!(word(&resp, 5), 0x30);
        assert_eq!(word(&resp, 12), 0x37);
    }

    #[test]
    fn sdram_chunk_sequencing_rejects_out_of_order_chunks() {
        let mut rig = Rig::new();
        let resp = rig.dispatch(&request(SDRAM_PROGRAM_OVER_WISHBONE, 1, &[0, 3, 1, 2]));
        assert_eq!(word(&resp, 3), CMD_STATUS_SUCCESS);
        // skipping chunk 1 is an error the host must notice
        let resp = rig.dispatch(&request(SDRAM_PROGRAM_OVER_WISHBONE, 2, &[2, 3, 1, 2]));
        assert_eq!(word(&resp, 3), CMD_STATUS_ERROR_GENERAL);
    }

    #[test]
    fn reboot_request_is_deferred_to_the_main_loop() {
        let mut rig = Rig::new();
        let payload = [0u16, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0];
        let resp = rig.dispatch(&request(SDRAM_RECONFIGURE, 1, &payload));
        assert_eq!(word(&resp, 0), SDRAM_RECONFIGURE + 1);
        assert!(rig.reboot);
    }

    #[test]
    fn truncated_request_still_yields_exactly_one_response() {
        let mut rig = Rig::new();
        // header only, no payload at all
        let resp = rig.dispatch(&request(READ_REG, 0x55, &[]));
        assert_eq!(word(&resp, 0), READ_REG + 1);
        assert_eq!(word(&resp, 1), 0x55);
        assert_eq!(resp.len(), 22);
        // sub-header garbage is dropped silently
        let mut rig = Rig::new();
        let resp = rig.dispatch(&[0x00]);
        assert!(resp.is_empty());
    }
}

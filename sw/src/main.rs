#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]
//! Board control firmware.
//!
//! Single-threaded event loop. The only interrupt is the 100 ms tick, which
//! advances the time base and raises run-task flags; everything else -
//! packet servicing, the supervisory state machines, housekeeping - runs
//! from the loop below, one bounded step at a time.

mod adc;
mod board;
mod cli;
mod cmd;
mod fanctrl;
mod fault_log;
mod mezz;
mod qsfp;
mod scratchpad;
mod sensors;

use core::ptr::addr_of_mut;
use core::sync::atomic::{AtomicU32, Ordering};

use board::{Board, BoardBases, NUM_ETHERNET_INTERFACES};
use cli::{Cli, CliContext};
use cmd::{CmdContext, SdramProgramState, CMD_BUFFER_LEN};
use debug::{logln, LL, LS};
use fault_log::FaultLogs;
use net::arp::ArpMessage;
use net::dhcp::{DhcpEvent, DhcpState};
use net::filter::{Counter, PacketFilter};
use net::hostname::Hostname;
use net::igmp::{IgmpAction, IgmpSm};
use net::Interface;
use skarab_hal::board_regs::{
    C_RD_ETH_IF_LINK_UP_ADDR, C_WR_FRONT_PANEL_STAT_LED_ADDR, C_WR_UBLAZE_ALIVE_ADDR,
};
use skarab_hal::hal_time;
use skarab_hal::mem_map::{MB_ONE_WIRE_PORT, UART_BASE};
use skarab_hal::mmio::Mmio;

const CONFIG_CLOCK_FREQUENCY: u32 = 39_062_500;
/// timer clocks per 100 ms tick
const TICK_TIMER_RELOAD: u32 = 3_906_250;

/// Jumbo frame plus margin, matching the MAC CPU buffer windows
const PKT_BUF_LEN: usize = 9016;
const PKT_BUF_WORDS: usize = PKT_BUF_LEN / 4;

const ETHERNET_FABRIC_PORT: u16 = 0x7148;

/// LLDP advertisement period, ticks
const LLDP_PERIOD: u32 = 150;
/// diagnostics (fault log poll, test timer) period, ticks
const DIAGNOSTICS_PERIOD: u32 = 10;

const DHCP_MON_COUNTER_DEFAULT_VALUE: u16 = 450; // 45 seconds
#[allow(dead_code)]
const DHCP_MON_COUNTER_MIN_VALUE: u16 = 50; // 5 seconds
const DHCP_MAX_RECONFIG_COUNT: u8 = 2;

// run-task flags, set in the tick interrupt and drained by the main loop
const TASK_DHCP: u32 = 1 << 0;
const TASK_IGMP: u32 = 1 << 1;
const TASK_LLDP: u32 = 1 << 2;
const TASK_ARP_REQUESTS: u32 = 1 << 3;
const TASK_LED_STATUS: u32 = 1 << 4;
const TASK_DIAGNOSTICS: u32 = 1 << 5;

static RUN_TASKS: AtomicU32 = AtomicU32::new(0);

// caller-owned packet buffers handed to the interfaces at init; they outlive
// the interfaces by construction
static mut RX_BUFFERS: [[u8; PKT_BUF_LEN]; NUM_ETHERNET_INTERFACES] =
    [[0; PKT_BUF_LEN]; NUM_ETHERNET_INTERFACES];
static mut TX_BUFFERS: [[u8; PKT_BUF_LEN]; NUM_ETHERNET_INTERFACES] =
    [[0; PKT_BUF_LEN]; NUM_ETHERNET_INTERFACES];
// word-domain staging for the MAC CPU windows
static mut PKT_WORDS: [u32; PKT_BUF_WORDS] = [0; PKT_BUF_WORDS];
// dedicated command buffers so handlers may reconfigure any interface
static mut CMD_RX: [u8; CMD_BUFFER_LEN] = [0; CMD_BUFFER_LEN];
static mut CMD_TX: [u8; CMD_BUFFER_LEN] = [0; CMD_BUFFER_LEN];

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(_panic: &core::panic::PanicInfo<'_>) -> ! {
    loop {}
}

#[cfg(target_os = "none")]
#[export_name = "MachineTimer"]
fn tick_interrupt() {
    hal_time::tick_isr();
    let ticks = hal_time::get_ticks();
    let mut tasks = TASK_DHCP | TASK_IGMP | TASK_ARP_REQUESTS | TASK_LED_STATUS;
    if ticks % LLDP_PERIOD == 0 {
        tasks |= TASK_LLDP;
    }
    if ticks % DIAGNOSTICS_PERIOD == 0 {
        tasks |= TASK_DIAGNOSTICS;
    }
    RUN_TASKS.fetch_or(tasks, Ordering::Relaxed);
    skarab_hal::timer::TickTimer::new(skarab_hal::mem_map::TIMER_BASE as *mut u32).ack();
}

#[cfg(target_os = "none")]
#[riscv_rt::entry]
fn main() -> ! {
    run()
}

#[cfg(not(target_os = "none"))]
fn main() {
    // firmware image; nothing to run on a host build
}

fn fatal(msg: &str) -> ! {
    logln!(LS::General, LL::Fatal, "FATAL: {}", msg);
    loop {
        core::hint::spin_loop();
    }
}

/// Board serial number from the motherboard 1-Wire EEPROM. All-ones on
/// failure; addresses derived from it will be recognizably wrong.
fn read_board_serial(board: &mut Board) -> [u8; 4] {
    let mut rom = [0u8; 8];
    if board.one_wire.read_rom(&mut rom, MB_ONE_WIRE_PORT).is_err() {
        logln!(LS::General, LL::Error, "INIT [..] failed to read serial rom");
        return [0xff; 4];
    }
    let mut serial = [0u8; 4];
    if board
        .one_wire
        .ds2433_read_mem(Some(&rom), &mut serial, 0, 0, MB_ONE_WIRE_PORT)
        .is_err()
    {
        logln!(LS::General, LL::Error, "INIT [..] failed to read serial bytes");
        return [0xff; 4];
    }
    serial
}

fn new_interface(
    id: u8,
    rx: &'static mut [u8; PKT_BUF_LEN],
    tx: &'static mut [u8; PKT_BUF_LEN],
    serial: &[u8; 4],
) -> Interface<'static> {
    let mac = [0x06, serial[0], serial[1], serial[2], serial[3], id];
    match Interface::new(id, rx, tx, mac) {
        Ok(mut iface) => {
            iface.set_hostname(Hostname::from_serial(serial, id));
            logln!(
                LS::Iface,
                LL::Info,
                "I/F  [{:02}] {} mac 06:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                id,
                iface.hostname.as_str(),
                serial[0],
                serial[1],
                serial[2],
                serial[3],
                id
            );
            iface
        }
        Err(_) => fatal("interface init"),
    }
}

/// Apply the startup log level/select pinned in the scratchpad, if any
fn restore_startup_logging(board: &mut Board) {
    if let Ok(byte) =
        scratchpad::read_byte(&mut board.i2c[0], scratchpad::PmemIndex::StartupLogLevel)
    {
        if byte & scratchpad::PMEM_MANUALLY_SET_BIT != 0 {
            let level = match byte & 0x7f {
                0 => LL::Trace,
                1 => LL::Debug,
                2 => LL::Info,
                3 => LL::Warn,
                4 => LL::Error,
                5 => LL::Fatal,
                _ => LL::Off,
            };
            debug::set_log_level(level);
        }
    }
    if let Ok(byte) =
        scratchpad::read_byte(&mut board.i2c[0], scratchpad::PmemIndex::StartupLogSelect)
    {
        if byte & scratchpad::PMEM_MANUALLY_SET_BIT != 0 {
            let select = match byte & 0x7f {
                0 => LS::General,
                1 => LS::Dhcp,
                2 => LS::Arp,
                3 => LS::Icmp,
                4 => LS::Lldp,
                5 => LS::Ctrl,
                6 => LS::Buff,
                7 => LS::Hardw,
                8 => LS::Iface,
                9 => LS::Igmp,
                _ => LS::All,
            };
            debug::set_log_select(select);
        }
    }
}

/// Move the staged transmit message out through the MAC core
fn flush_tx(board: &mut Board, iface: &mut Interface) -> bool {
    if iface.msg_size == 0 {
        return false;
    }
    let words = (iface.msg_size + 3) / 4;
    let scratch = unsafe { &mut *addr_of_mut!(PKT_WORDS) };
    for (i, chunk) in iface.tx_buf[..words * 4].chunks_exact(4).enumerate() {
        scratch[i] = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    iface.msg_size = 0;
    let id = iface.eth_id as usize;
    match board.mac[id].transmit_host_packet(&scratch[..words], words) {
        Ok(()) => {
            iface.counters.incr(Counter::TxTotal);
            true
        }
        Err(_) => {
            logln!(LS::Buff, LL::Error, "I/F  [{:02}] transmit failed", iface.eth_id);
            false
        }
    }
}

/// Where a control response goes back to
struct ReturnPath {
    mac: [u8; 6],
    ip: u32,
    port: u16,
}

/// Wrap a control response payload in ethernet/IP/UDP headers in the
/// interface transmit buffer
fn stage_control_response(iface: &mut Interface, path: &ReturnPath, payload: &[u8]) {
    use net::{
        ipv4_header_checksum, ipv4_udp_checksum, ETH_DST_OFFSET, ETH_FRAME_TYPE_OFFSET,
        ETH_MIN_FRAME_LEN, ETH_SRC_OFFSET, IPV4_TYPE_UDP, IP_CHKSM_OFFSET, IP_DST_OFFSET,
        IP_FRAME_BASE, IP_FRAME_TOTAL_LEN, IP_ID_OFFSET, IP_PROT_OFFSET, IP_SRC_OFFSET,
        IP_TLEN_OFFSET, IP_TTL_OFFSET, IP_V_HIL_OFFSET, UDP_CHKSM_OFFSET, UDP_CONTROL_PORT,
        UDP_DST_PORT_OFFSET, UDP_FRAME_BASE, UDP_FRAME_TOTAL_LEN, UDP_PAYLOAD_BASE,
        UDP_SRC_PORT_OFFSET, UDP_ULEN_OFFSET,
    };
    let frame_len = UDP_PAYLOAD_BASE + payload.len();
    if frame_len > iface.tx_buf.len() {
        return;
    }
    for b in iface.tx_buf[..UDP_PAYLOAD_BASE].iter_mut() {
        *b = 0;
    }
    iface.tx_buf[ETH_DST_OFFSET..ETH_DST_OFFSET + 6].copy_from_slice(&path.mac);
    let mac = iface.mac;
    iface.tx_buf[ETH_SRC_OFFSET..ETH_SRC_OFFSET + 6].copy_from_slice(&mac);
    iface.tx_buf[ETH_FRAME_TYPE_OFFSET] = 0x08;

    iface.tx_buf[IP_FRAME_BASE + IP_V_HIL_OFFSET] = 0x45;
    let total_len = (IP_FRAME_TOTAL_LEN + UDP_FRAME_TOTAL_LEN + payload.len()) as u16;
    iface.tx_buf[IP_FRAME_BASE + IP_TLEN_OFFSET..IP_FRAME_BASE + IP_TLEN_OFFSET + 2]
        .copy_from_slice(&total_len.to_be_bytes());
    let ip_id = iface.ip_id;
    iface.ip_id = iface.ip_id.wrapping_add(1);
    iface.tx_buf[IP_FRAME_BASE + IP_ID_OFFSET..IP_FRAME_BASE + IP_ID_OFFSET + 2]
        .copy_from_slice(&ip_id.to_be_bytes());
    iface.tx_buf[IP_FRAME_BASE + IP_TTL_OFFSET] = 0x80;
    iface.tx_buf[IP_FRAME_BASE + IP_PROT_OFFSET] = IPV4_TYPE_UDP;
    let src_ip = iface.ip;
    iface.tx_buf[IP_FRAME_BASE + IP_SRC_OFFSET..IP_FRAME_BASE + IP_SRC_OFFSET + 4]
        .copy_from_slice(&src_ip.to_be_bytes());
    iface.tx_buf[IP_FRAME_BASE + IP_DST_OFFSET..IP_FRAME_BASE + IP_DST_OFFSET + 4]
        .copy_from_slice(&path.ip.to_be_bytes());

    iface.tx_buf[UDP_FRAME_BASE + UDP_SRC_PORT_OFFSET..UDP_FRAME_BASE + UDP_SRC_PORT_OFFSET + 2]
        .copy_from_slice(&UDP_CONTROL_PORT.to_be_bytes());
    iface.tx_buf[UDP_FRAME_BASE + UDP_DST_PORT_OFFSET..UDP_FRAME_BASE + UDP_DST_PORT_OFFSET + 2]
        .copy_from_slice(&path.port.to_be_bytes());
    let udp_len = (UDP_FRAME_TOTAL_LEN + payload.len()) as u16;
    iface.tx_buf[UDP_FRAME_BASE + UDP_ULEN_OFFSET..UDP_FRAME_BASE + UDP_ULEN_OFFSET + 2]
        .copy_from_slice(&udp_len.to_be_bytes());

    iface.tx_buf[UDP_PAYLOAD_BASE..frame_len].copy_from_slice(payload);

    let ip_csum = ipv4_header_checksum(iface.tx_buf);
    iface.tx_buf[IP_FRAME_BASE + IP_CHKSM_OFFSET..IP_FRAME_BASE + IP_CHKSM_OFFSET + 2]
        .copy_from_slice(&ip_csum.to_be_bytes());
    let udp_csum = ipv4_udp_checksum(iface.tx_buf);
    iface.tx_buf[UDP_FRAME_BASE + UDP_CHKSM_OFFSET..UDP_FRAME_BASE + UDP_CHKSM_OFFSET + 2]
        .copy_from_slice(&udp_csum.to_be_bytes());

    if frame_len < ETH_MIN_FRAME_LEN {
        for b in iface.tx_buf[frame_len..ETH_MIN_FRAME_LEN].iter_mut() {
            *b = 0;
        }
    }
    iface.msg_size = core::cmp::max(frame_len, ETH_MIN_FRAME_LEN);
}

#[allow(dead_code)]
fn uart_getc() -> Option<u8> {
    let uart = Mmio::new(UART_BASE as *mut u32);
    if uart.read(2) != 0 {
        // rx empty
        return None;
    }
    let c = (uart.read(0) & 0xff) as u8;
    uart.write(4, 1);
    Some(c)
}

#[allow(dead_code)]
fn run() -> ! {
    logln!(LS::General, LL::Always, "");
    logln!(
        LS::General,
        LL::Always,
        "==== skarab-fw {} ====",
        env!("CARGO_PKG_VERSION")
    );

    let mut board = Board::new(BoardBases::hardware());
    board.regs.write(C_WR_UBLAZE_ALIVE_ADDR, 1);
    board.regs.write(C_WR_FRONT_PANEL_STAT_LED_ADDR, 0);

    logln!(LS::General, LL::Debug, "i2c...");
    board.init_i2c(CONFIG_CLOCK_FREQUENCY);

    match scratchpad::init_persistent_memory(&mut board.i2c[0]) {
        scratchpad::PmemReturn::Error => {
            logln!(LS::General, LL::Error, "INIT [..] persistent memory setup failed")
        }
        _ => logln!(LS::General, LL::Debug, "INIT [..] persistent memory ready"),
    }
    restore_startup_logging(&mut board);

    let serial = read_board_serial(&mut board);

    let mut mezz = mezz::discover(&mut board);

    fanctrl::init_fan_controller(&mut board.i2c[0]);

    // interfaces over the statically allocated packet buffers
    let rx_bufs = unsafe { &mut *addr_of_mut!(RX_BUFFERS) };
    let tx_bufs = unsafe { &mut *addr_of_mut!(TX_BUFFERS) };
    let [rx0, rx1, rx2, rx3, rx4] = rx_bufs;
    let [tx0, tx1, tx2, tx3, tx4] = tx_bufs;
    let mut ifaces: [Interface<'static>; NUM_ETHERNET_INTERFACES] = [
        new_interface(0, rx0, tx0, &serial),
        new_interface(1, rx1, tx1, &serial),
        new_interface(2, rx2, tx2, &serial),
        new_interface(3, rx3, tx3, &serial),
        new_interface(4, rx4, tx4, &serial),
    ];
    let mut igmp: [IgmpSm; NUM_ETHERNET_INTERFACES] = [
        IgmpSm::new(0),
        IgmpSm::new(1),
        IgmpSm::new(2),
        IgmpSm::new(3),
        IgmpSm::new(4),
    ];
    for iface in ifaces.iter_mut() {
        let id = iface.eth_id as usize;
        let mac_addr = iface.mac;
        board.mac[id].set_source_mac(&mac_addr);
        board.mac[id].set_port_and_enable(ETHERNET_FABRIC_PORT, true);
        iface.dhcp.set_enable(true);
    }

    board.wdt.start();
    if board.wdt.expired_at_boot() {
        logln!(LS::General, LL::Warn, "WDT  [..] previous reset was a watchdog timeout");
    }
    logln!(LS::General, LL::Warn, "**WATCHDOG ON**");

    #[cfg(target_arch = "riscv32")]
    {
        skarab_hal::timer::TickTimer::new(skarab_hal::mem_map::TIMER_BASE as *mut u32)
            .start(TICK_TIMER_RELOAD);
        unsafe {
            riscv::register::mie::set_mtimer();
            riscv::interrupt::enable();
        }
    }

    let mut cli_state = Cli::new();
    let mut fault_logs = FaultLogs::new();
    let mut sdram_prog = SdramProgramState::new();
    let mut dhcp_monitor_timeout: u16 = DHCP_MON_COUNTER_DEFAULT_VALUE;
    let mut dhcp_unbound_ticks: u32 = 0;
    let mut reboot_requested = false;
    let mut test_timer_count: u8 = 0;

    logln!(LS::General, LL::Info, "main loop");
    loop {
        //////////////////////// PACKET SERVICE BLOCK ----------
        for id in 0..NUM_ETHERNET_INTERFACES {
            let level = board.mac[id].rx_buffer_level() as usize;
            if level == 0 {
                continue;
            }
            ifaces[id].rx_active = true;
            let scratch = unsafe { &mut *addr_of_mut!(PKT_WORDS) };
            let words = level.min(PKT_BUF_WORDS);
            if board.mac[id].read_host_packet(scratch, words).is_err() {
                continue;
            }
            for (i, word) in scratch[..words].iter().enumerate() {
                ifaces[id].rx_buf[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
            }
            ifaces[id].num_words_read = words;

            match ifaces[id].recv_packet_filter() {
                PacketFilter::ArpRequest => {
                    if ifaces[id].arp_processing_enabled {
                        ifaces[id].arp_build_message(ArpMessage::Reply, 0);
                        if flush_tx(&mut board, &mut ifaces[id]) {
                            ifaces[id].counters.incr(Counter::TxEthArpReplyOk);
                        } else {
                            ifaces[id].counters.incr(Counter::TxEthArpErr);
                        }
                    }
                }
                PacketFilter::ArpConflict => {
                    logln!(LS::Arp, LL::Warn, "ARP  [{:02}] address conflict on link", id);
                }
                PacketFilter::Icmp => {
                    ifaces[id].icmp_build_reply();
                    if flush_tx(&mut board, &mut ifaces[id]) {
                        ifaces[id].counters.incr(Counter::TxIpIcmpReplyOk);
                    } else {
                        ifaces[id].counters.incr(Counter::TxIpIcmpReplyErr);
                    }
                }
                PacketFilter::Control => {
                    use net::{
                        be16, be32, ETH_SRC_OFFSET, IP_FRAME_BASE, IP_SRC_OFFSET, UDP_FRAME_BASE,
                        UDP_PAYLOAD_BASE, UDP_SRC_PORT_OFFSET, UDP_ULEN_OFFSET,
                    };
                    let rx = &ifaces[id].rx_buf;
                    let mut path = ReturnPath {
                        mac: [0; 6],
                        ip: be32(rx, IP_FRAME_BASE + IP_SRC_OFFSET),
                        port: be16(rx, UDP_FRAME_BASE + UDP_SRC_PORT_OFFSET),
                    };
                    path.mac.copy_from_slice(&rx[ETH_SRC_OFFSET..ETH_SRC_OFFSET + 6]);
                    let udp_len = be16(rx, UDP_FRAME_BASE + UDP_ULEN_OFFSET) as usize;
                    let payload_len = udp_len.saturating_sub(8).min(CMD_BUFFER_LEN);
                    let cmd_rx = unsafe { &mut *addr_of_mut!(CMD_RX) };
                    cmd_rx[..payload_len]
                        .copy_from_slice(&rx[UDP_PAYLOAD_BASE..UDP_PAYLOAD_BASE + payload_len]);

                    let cmd_tx = unsafe { &mut *addr_of_mut!(CMD_TX) };
                    let resp_len = {
                        let mut ctx = CmdContext {
                            board: &mut board,
                            iface_id: id as u8,
                            ifaces: &mut ifaces,
                            igmp: &mut igmp,
                            mezz: &mut mezz,
                            fault_logs: &mut fault_logs,
                            sdram_prog: &mut sdram_prog,
                            dhcp_monitor_timeout: &mut dhcp_monitor_timeout,
                            reboot_requested: &mut reboot_requested,
                            uptime_seconds: hal_time::get_uptime_seconds(),
                        };
                        cmd::command_sorter(&mut ctx, &cmd_rx[..payload_len], cmd_tx)
                    };
                    if resp_len > 0 {
                        let nack = cmd_tx[0] == 0xff && cmd_tx[1] == 0xff;
                        stage_control_response(&mut ifaces[id], &path, &cmd_tx[..resp_len]);
                        if flush_tx(&mut board, &mut ifaces[id]) {
                            ifaces[id].counters.incr(Counter::TxUdpCtrlOk);
                            if nack {
                                ifaces[id].counters.incr(Counter::TxUdpCtrlNack);
                            } else {
                                ifaces[id].counters.incr(Counter::TxUdpCtrlAck);
                            }
                        }
                    }
                }
                _ => (),
            }
        }
        //////////////////////// --------------------------------

        let tasks = RUN_TASKS.swap(0, Ordering::Relaxed);

        //////////////////////// DHCP HANDLER BLOCK ------------
        if tasks & TASK_DHCP != 0 {
            let mut any_link_up = false;
            let mut any_bound = false;
            for iface in ifaces.iter_mut() {
                if !iface.link_up {
                    continue;
                }
                any_link_up = true;
                iface.dhcp_run_tick();
                if iface.msg_size != 0 {
                    if flush_tx(&mut board, iface) {
                        iface.counters.incr(Counter::TxUdpDhcpOk);
                    } else {
                        iface.counters.incr(Counter::TxUdpDhcpErr);
                    }
                }
                match iface.dhcp.pop_event() {
                    Some(DhcpEvent::LeaseAcquired(lease)) => {
                        iface.configure(lease.ip, lease.subnet);
                        iface.gateway = lease.router;
                        let id = iface.eth_id as usize;
                        board.mac[id].set_source_ip(lease.ip);
                        board.mac[id].set_netmask(lease.subnet);
                        board.mac[id].set_gateway_arp_cache_addr(lease.router as u8);
                        logln!(
                            LS::Dhcp,
                            LL::Info,
                            "DHCP [{:02}] bound ip {:08x} mask {:08x} gw {:08x}",
                            iface.eth_id,
                            lease.ip,
                            lease.subnet,
                            lease.router
                        );
                    }
                    Some(DhcpEvent::ReturnedToInit) => {
                        logln!(LS::Dhcp, LL::Debug, "DHCP [{:02}] back to init", iface.eth_id);
                    }
                    None => (),
                }
                if iface.dhcp.state() == DhcpState::Bound {
                    any_bound = true;
                }
            }
            // lease monitor: too long unbound forces a full DHCP reset and,
            // within the reconfigure budget, a reboot into a fresh image
            if any_link_up && !any_bound {
                dhcp_unbound_ticks += 1;
                if dhcp_unbound_ticks >= dhcp_monitor_timeout as u32 {
                    dhcp_unbound_ticks = 0;
                    logln!(LS::Dhcp, LL::Error, "DHCP [..] monitor timeout, resetting");
                    for iface in ifaces.iter_mut() {
                        iface.dhcp.reset();
                    }
                    let count = scratchpad::read_byte(
                        &mut board.i2c[0],
                        scratchpad::PmemIndex::DhcpReconfigureCount,
                    )
                    .unwrap_or(0);
                    scratchpad::increment_counter(
                        &mut board.i2c[0],
                        scratchpad::PmemIndex::DhcpReconfigureCount,
                    );
                    if count < DHCP_MAX_RECONFIG_COUNT {
                        reboot_requested = true;
                    } else {
                        logln!(
                            LS::Dhcp,
                            LL::Error,
                            "DHCP [..] reconfigure budget spent, staying up"
                        );
                    }
                }
            } else {
                dhcp_unbound_ticks = 0;
            }
            // the mezzanine machines run on the same tick cadence
            mezz::run_mezz_mgmt(&mut mezz, &mut board);
        }
        //////////////////////// --------------------------------

        //////////////////////// IGMP HANDLER BLOCK ------------
        if tasks & TASK_IGMP != 0 {
            for id in 0..NUM_ETHERNET_INTERFACES {
                if ifaces[id].ip == 0 {
                    continue;
                }
                match igmp[id].step() {
                    IgmpAction::Send(msg, group) => {
                        ifaces[id].igmp_build_message(msg, group);
                        if flush_tx(&mut board, &mut ifaces[id]) {
                            ifaces[id].counters.incr(Counter::TxIpIgmpOk);
                        } else {
                            ifaces[id].counters.incr(Counter::TxIpIgmpErr);
                        }
                    }
                    IgmpAction::None => (),
                }
            }
        }
        //////////////////////// --------------------------------

        //////////////////////// LLDP HANDLER BLOCK ------------
        if tasks & TASK_LLDP != 0 {
            for iface in ifaces.iter_mut() {
                if !iface.link_up || iface.ip == 0 {
                    continue;
                }
                iface.lldp_build_message();
                if flush_tx(&mut board, iface) {
                    iface.counters.incr(Counter::TxEthLldpOk);
                } else {
                    iface.counters.incr(Counter::TxEthLldpErr);
                }
            }
        }
        //////////////////////// --------------------------------

        //////////////////////// ARP REQUEST BLOCK -------------
        if tasks & TASK_ARP_REQUESTS != 0 {
            for iface in ifaces.iter_mut() {
                if !iface.arp_requests_enabled
                    || !iface.link_up
                    || iface.dhcp.state() != DhcpState::Bound
                {
                    continue;
                }
                // walk the subnet one host per tick to keep the fabric ARP
                // caches warm
                let target = iface.subnet | iface.current_arp_target as u32;
                iface.current_arp_target = iface.current_arp_target.wrapping_add(1);
                if target == iface.ip {
                    continue;
                }
                iface.arp_build_message(ArpMessage::Request, target);
                if flush_tx(&mut board, iface) {
                    iface.counters.incr(Counter::TxEthArpRequestOk);
                } else {
                    iface.counters.incr(Counter::TxEthArpErr);
                }
            }
        }
        //////////////////////// --------------------------------

        //////////////////////// HOUSEKEEPING BLOCK ------------
        if tasks & TASK_LED_STATUS != 0 {
            let link_reg = board.regs.read(C_RD_ETH_IF_LINK_UP_ADDR);
            for (id, iface) in ifaces.iter_mut().enumerate() {
                let was_up = iface.link_up;
                iface.update_link_status(link_reg);
                if iface.link_up && !was_up {
                    // link flap: re-announce any standing group subscription
                    igmp[id].rejoin_prev_group();
                }
            }
            // front-panel status: one LED per interface with link
            let mut led = 0u32;
            for iface in ifaces.iter() {
                if iface.link_up {
                    led |= 1 << iface.eth_id;
                }
            }
            board.regs.write(C_WR_FRONT_PANEL_STAT_LED_ADDR, led);
            board.regs.write(C_WR_UBLAZE_ALIVE_ADDR, hal_time::get_ticks());
        }

        if tasks & TASK_DIAGNOSTICS != 0 {
            fault_logs.poll(&mut board.i2c[0], hal_time::get_uptime_seconds());
            if test_timer_count > 0 {
                logln!(LS::General, LL::Always, "{}s", test_timer_count);
                test_timer_count -= 1;
            }
        }
        //////////////////////// --------------------------------

        //////////////////////// CONSOLE BLOCK -----------------
        if let Some(c) = uart_getc() {
            let mut ctx = CliContext {
                board: &mut board,
                ifaces: &mut ifaces,
                igmp: &mut igmp,
                mezz: &mut mezz,
                uptime_seconds: hal_time::get_uptime_seconds(),
                reboot_requested: &mut reboot_requested,
                test_timer_count: &mut test_timer_count,
            };
            cli_state.input_char(c, &mut ctx);
        }
        //////////////////////// --------------------------------

        if reboot_requested {
            logln!(LS::General, LL::Always, "rebooting FPGA");
            // unsubscribe synchronously so upstream queriers stop forwarding
            // multicast at us while the fabric is away
            for id in 0..NUM_ETHERNET_INTERFACES {
                if ifaces[id].ip == 0 {
                    continue;
                }
                let iface = &mut ifaces[id];
                igmp[id].leave_and_flush(|msg, group| {
                    iface.igmp_build_message(msg, group);
                    let _ = flush_tx(&mut board, iface);
                });
            }
            board.flash.icape_reboot();
            reboot_requested = false;
        }

        board.wdt.kick();
    }
}

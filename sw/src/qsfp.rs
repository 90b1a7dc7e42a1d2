//! QSFP mezzanine state machine.
//!
//! The card's STM microcontroller boots into its bootloader; init reads the
//! bootloader version, commands the jump to the application, waits 3 s and
//! then enters the application cycle: front-panel TX/RX LEDs mirrored from
//! the fabric link bits, then a present-bit poll of all four modules gating
//! their reset lines.

use crate::board::Board;
use debug::{logln, LL, LS};
use skarab_hal::board_regs::{C_RD_ETH_IF_LINK_UP_ADDR, C_WR_ETH_IF_CTL_ADDR};

pub const QSFP_STM_I2C_SLAVE_ADDRESS: u8 = 0x0C;
pub const QSFP_STM_I2C_BOOTLOADER_SLAVE_ADDRESS: u8 = 0x08;

const QSFP_LED_TX_REG_ADDRESS: u8 = 0x02;
const QSFP_LED_RX_REG_ADDRESS: u8 = 0x03;
const QSFP_MODULE_PRESENT_REG_ADDRESS: [u8; 4] = [0x0F, 0x1E, 0x2D, 0x3C];

const QSFP_LEAVE_BOOTLOADER_MODE: u8 = 0x77;
const QSFP_BOOTLOADER_READ_OPCODE: u8 = 0x03;
const QSFP_BOOTLOADER_VERSION_ADDRESS: u32 = 0x0800_7000;

/// ticks of 100 ms to let the STM application come up
const QSFP_STARTING_TIMEOUT: u32 = 30;

pub const QSFP_MEZZANINE_RESET: u32 = 0x100;
const QSFP_MODULE_RESET: [u32; 4] = [0x2, 0x4, 0x8, 0x10];

const LED_OFF: u32 = 0x0;
const LED_ON: u32 = 0x1;
const LED_FLASHING: u32 = 0x2;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum QsfpInitState {
    BootloaderVersionWrite,
    BootloaderVersionRead,
    LeaveBootloader,
    StartingApp,
    AppRunning,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum QsfpAppState {
    UpdateTxLeds,
    UpdateRxLeds,
    ModPresentWrite(u8),
    ModPresentRead(u8),
}

pub struct QsfpSm {
    site: u8,
    wait_count: u32,
    init_state: QsfpInitState,
    app_state: QsfpAppState,
    pub bootloader_version: (u8, u8),
    reset_init: bool,
    reset_app: bool,
    paused: bool,
}

impl QsfpSm {
    pub fn new(site: u8) -> Self {
        QsfpSm {
            site,
            wait_count: 0,
            init_state: QsfpInitState::BootloaderVersionWrite,
            app_state: QsfpAppState::UpdateTxLeds,
            bootloader_version: (0, 0),
            reset_init: false,
            reset_app: false,
            paused: false,
        }
    }

    pub fn init_state(&self) -> QsfpInitState {
        self.init_state
    }

    /// Restart the whole handshake (mezzanine hot-reinit)
    pub fn reset(&mut self) {
        self.reset_init = true;
        self.reset_app = true;
    }

    /// Park the machine while the STM bootloader is being reprogrammed
    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    fn bus(&self) -> usize {
        self.site as usize + 1
    }

    /// One bounded step per tick
    pub fn step(&mut self, board: &mut Board) {
        if self.paused {
            return;
        }
        self.init_state = match self.init_state {
            QsfpInitState::BootloaderVersionWrite => {
                let addr = QSFP_BOOTLOADER_VERSION_ADDRESS;
                let wr = [
                    QSFP_BOOTLOADER_READ_OPCODE,
                    (addr >> 24) as u8,
                    (addr >> 16) as u8,
                    (addr >> 8) as u8,
                    addr as u8,
                    0x01, // one byte
                ];
                if board.i2c[self.bus()]
                    .write_bytes(QSFP_STM_I2C_BOOTLOADER_SLAVE_ADDRESS, &wr)
                    .is_err()
                {
                    logln!(LS::Hardw, LL::Error, "QSFP+[{:02x}] bootloader write failed", self.site);
                }
                QsfpInitState::BootloaderVersionRead
            }
            QsfpInitState::BootloaderVersionRead => {
                let mut rd = [0xffu8];
                if board.i2c[self.bus()]
                    .read_bytes(QSFP_STM_I2C_BOOTLOADER_SLAVE_ADDRESS, &mut rd)
                    .is_err()
                {
                    logln!(LS::Hardw, LL::Error, "QSFP+[{:02x}] bootloader read failed", self.site);
                }
                self.bootloader_version = ((rd[0] >> 4) & 0xf, rd[0] & 0xf);
                logln!(
                    LS::Hardw,
                    LL::Info,
                    "QSFP+[{:02x}] bootloader version {}.{}",
                    self.site,
                    self.bootloader_version.0,
                    self.bootloader_version.1
                );
                QsfpInitState::LeaveBootloader
            }
            QsfpInitState::LeaveBootloader => {
                logln!(LS::Hardw, LL::Info, "QSFP+[{:02x}] leaving bootloader", self.site);
                if board.i2c[self.bus()]
                    .write_bytes(
                        QSFP_STM_I2C_BOOTLOADER_SLAVE_ADDRESS,
                        &[QSFP_LEAVE_BOOTLOADER_MODE],
                    )
                    .is_err()
                {
                    logln!(LS::Hardw, LL::Error, "QSFP+[{:02x}] bootloader write failed", self.site);
                }
                self.wait_count = 0;
                QsfpInitState::StartingApp
            }
            QsfpInitState::StartingApp => {
                if self.wait_count >= QSFP_STARTING_TIMEOUT {
                    QsfpInitState::AppRunning
                } else {
                    self.wait_count += 1;
                    QsfpInitState::StartingApp
                }
            }
            QsfpInitState::AppRunning => {
                // order matters: a full reset outranks an app reset outranks
                // a normal step, and the app only runs while we own the bus
                if self.reset_init {
                    self.reset_init = false;
                    self.reset_app = false;
                    self.app_state = QsfpAppState::UpdateTxLeds;
                    QsfpInitState::BootloaderVersionWrite
                } else {
                    if self.reset_app {
                        self.reset_app = false;
                        self.app_state = QsfpAppState::UpdateTxLeds;
                    } else if board.mezz_i2c_access {
                        self.app_state = self.app_step(board);
                    }
                    QsfpInitState::AppRunning
                }
            }
        };
    }

    fn app_step(&mut self, board: &mut Board) -> QsfpAppState {
        match self.app_state {
            QsfpAppState::UpdateTxLeds => {
                let led = self.led_register(board, 0x1_0000, 0x2_0000);
                if board.i2c[self.bus()]
                    .write_bytes(QSFP_STM_I2C_SLAVE_ADDRESS, &[QSFP_LED_TX_REG_ADDRESS, led])
                    .is_err()
                {
                    logln!(LS::Hardw, LL::Error, "QSFP+[{:02x}] tx led write failed", self.site);
                }
                QsfpAppState::UpdateRxLeds
            }
            QsfpAppState::UpdateRxLeds => {
                let led = self.led_register(board, 0x4_0000, 0x8_0000);
                if board.i2c[self.bus()]
                    .write_bytes(QSFP_STM_I2C_SLAVE_ADDRESS, &[QSFP_LED_RX_REG_ADDRESS, led])
                    .is_err()
                {
                    logln!(LS::Hardw, LL::Error, "QSFP+[{:02x}] rx led write failed", self.site);
                }
                QsfpAppState::ModPresentWrite(0)
            }
            QsfpAppState::ModPresentWrite(module) => {
                let reg = QSFP_MODULE_PRESENT_REG_ADDRESS[module as usize];
                if board.i2c[self.bus()]
                    .write_bytes(QSFP_STM_I2C_SLAVE_ADDRESS, &[reg])
                    .is_err()
                {
                    logln!(
                        LS::Hardw,
                        LL::Error,
                        "QSFP+[{:02x}] mod {} write failed",
                        self.site,
                        module
                    );
                }
                QsfpAppState::ModPresentRead(module)
            }
            QsfpAppState::ModPresentRead(module) => {
                let mut rd = [0u8];
                match board.i2c[self.bus()].read_bytes(QSFP_STM_I2C_SLAVE_ADDRESS, &mut rd) {
                    Ok(()) => {
                        // absent module is held in reset
                        let reset_bit = QSFP_MODULE_RESET[module as usize];
                        if rd[0] != 0 {
                            board.regs.rmw(C_WR_ETH_IF_CTL_ADDR, reset_bit, 0);
                        } else {
                            board.regs.rmw(C_WR_ETH_IF_CTL_ADDR, 0, reset_bit);
                        }
                    }
                    Err(_) => {
                        logln!(
                            LS::Hardw,
                            LL::Error,
                            "QSFP+[{:02x}] mod {} read failed",
                            self.site,
                            module
                        );
                    }
                }
                if module < 3 {
                    QsfpAppState::ModPresentWrite(module + 1)
                } else {
                    QsfpAppState::UpdateTxLeds
                }
            }
        }
    }

    /// Two bits per 40 Gb/s core: off, on with link, flashing with activity
    fn led_register(&self, board: &Board, link_mask0: u32, activity_mask0: u32) -> u8 {
        let reg = board.regs.read(C_RD_ETH_IF_LINK_UP_ADDR);
        let mut led = 0u32;
        let mut link_mask = link_mask0;
        let mut activity_mask = activity_mask0;
        for id in 0..4 {
            if reg & link_mask != 0 {
                if reg & activity_mask != 0 {
                    led |= LED_FLASHING << (id * 2);
                } else {
                    led |= LED_ON << (id * 2);
                }
            } else {
                led |= LED_OFF << (id * 2);
            }
            link_mask <<= 4;
            activity_mask <<= 4;
        }
        led as u8
    }
}

//! ADC mezzanine state machine: the same bootloader handoff as the QSFP
//! card, then an idle application phase reserved for expansion.

use crate::board::Board;
use debug::{logln, LL, LS};

pub const ADC_STM_I2C_BOOTLOADER_SLAVE_ADDRESS: u8 = 0x08;

const ADC_LEAVE_BOOTLOADER_MODE: u8 = 0x77;
const ADC_BOOTLOADER_READ_OPCODE: u8 = 0x03;
const ADC_BOOTLOADER_VERSION_ADDRESS: u32 = 0x0800_F000;

/// ticks of 100 ms to let the STM application come up
const ADC_STARTING_TIMEOUT: u32 = 30;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum AdcInitState {
    BootloaderVersionWrite,
    BootloaderVersionRead,
    LeaveBootloader,
    StartingApp,
    AppRunning,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum AdcAppState {
    DoNothing,
}

pub struct AdcSm {
    site: u8,
    wait_count: u32,
    init_state: AdcInitState,
    app_state: AdcAppState,
    pub bootloader_version: (u8, u8),
    paused: bool,
}

impl AdcSm {
    pub fn new(site: u8) -> Self {
        AdcSm {
            site,
            wait_count: 0,
            init_state: AdcInitState::BootloaderVersionWrite,
            app_state: AdcAppState::DoNothing,
            bootloader_version: (0, 0),
            paused: false,
        }
    }

    pub fn init_state(&self) -> AdcInitState {
        self.init_state
    }

    pub fn reset(&mut self) {
        self.wait_count = 0;
        self.init_state = AdcInitState::BootloaderVersionWrite;
        self.app_state = AdcAppState::DoNothing;
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    fn bus(&self) -> usize {
        self.site as usize + 1
    }

    pub fn step(&mut self, board: &mut Board) {
        if self.paused {
            return;
        }
        self.init_state = match self.init_state {
            AdcInitState::BootloaderVersionWrite => {
                let addr = ADC_BOOTLOADER_VERSION_ADDRESS;
                let wr = [
                    ADC_BOOTLOADER_READ_OPCODE,
                    (addr >> 24) as u8,
                    (addr >> 16) as u8,
                    (addr >> 8) as u8,
                    addr as u8,
                    0x00,
                    0x01, // one byte
                ];
                if board.i2c[self.bus()]
                    .write_bytes(ADC_STM_I2C_BOOTLOADER_SLAVE_ADDRESS, &wr)
                    .is_err()
                {
                    logln!(LS::Hardw, LL::Error, "ADC  [{:02x}] bootloader write failed", self.site);
                }
                AdcInitState::BootloaderVersionRead
            }
            AdcInitState::BootloaderVersionRead => {
                let mut rd = [0xffu8];
                if board.i2c[self.bus()]
                    .read_bytes(ADC_STM_I2C_BOOTLOADER_SLAVE_ADDRESS, &mut rd)
                    .is_err()
                {
                    logln!(LS::Hardw, LL::Error, "ADC  [{:02x}] bootloader read failed", self.site);
                }
                self.bootloader_version = ((rd[0] >> 4) & 0xf, rd[0] & 0xf);
                logln!(
                    LS::Hardw,
                    LL::Info,
                    "ADC  [{:02x}] bootloader version {}.{}",
                    self.site,
                    self.bootloader_version.0,
                    self.bootloader_version.1
                );
                AdcInitState::LeaveBootloader
            }
            AdcInitState::LeaveBootloader => {
                logln!(LS::Hardw, LL::Info, "ADC  [{:02x}] leaving bootloader", self.site);
                if board.i2c[self.bus()]
                    .write_bytes(
                        ADC_STM_I2C_BOOTLOADER_SLAVE_ADDRESS,
                        &[ADC_LEAVE_BOOTLOADER_MODE],
                    )
                    .is_err()
                {
                    logln!(LS::Hardw, LL::Error, "ADC  [{:02x}] bootloader write failed", self.site);
                }
                self.wait_count = 0;
                AdcInitState::StartingApp
            }
            AdcInitState::StartingApp => {
                if self.wait_count >= ADC_STARTING_TIMEOUT {
                    AdcInitState::AppRunning
                } else {
                    self.wait_count += 1;
                    AdcInitState::StartingApp
                }
            }
            AdcInitState::AppRunning => {
                self.app_state = match self.app_state {
                    AdcAppState::DoNothing => AdcAppState::DoNothing,
                };
                AdcInitState::AppRunning
            }
        };
    }
}

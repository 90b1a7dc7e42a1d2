//! Ownership of every hardware driver instance.
//!
//! `Board` is constructed once from a table of MMIO base pointers. The
//! hardware table lives here; unit tests build the same structure over RAM
//! arrays, which is what lets the command dispatcher run on the host.

use skarab_hal::board_regs::BoardRegs;
use skarab_hal::eth_mac::EthMac;
use skarab_hal::flash_sdram::FlashSdramCtrl;
use skarab_hal::hal_i2c::I2cMaster;
use skarab_hal::hal_spi::IspSpiCtrl;
use skarab_hal::mem_map;
use skarab_hal::one_wire::OneWire;
use skarab_hal::wdt::Watchdog;
use skarab_hal::wishbone::Wishbone;

pub const NUM_ETHERNET_INTERFACES: usize = 5;
pub const NUM_I2C_BUSES: usize = 5;
pub const NUM_MEZZ_SITES: usize = 4;

/// MMIO base pointers for every peripheral window
pub struct BoardBases {
    pub board_regs: *mut u32,
    pub wishbone: *mut u32,
    pub flash_sdram: *mut u32,
    pub one_wire: *mut u32,
    pub spi: *mut u32,
    pub i2c: [*mut u32; NUM_I2C_BUSES],
    pub eth_mac: [*mut u32; NUM_ETHERNET_INTERFACES],
    pub wdt: *mut u32,
}

impl BoardBases {
    /// The wishbone slave map of the real board
    pub fn hardware() -> Self {
        BoardBases {
            board_regs: mem_map::BOARD_REGISTER_ADDR as *mut u32,
            wishbone: 0 as *mut u32,
            flash_sdram: mem_map::FLASH_SDRAM_SPI_ICAPE_ADDR as *mut u32,
            one_wire: mem_map::ONE_WIRE_ADDR as *mut u32,
            spi: (mem_map::FLASH_SDRAM_SPI_ICAPE_ADDR + 0x4000) as *mut u32,
            i2c: [
                mem_map::I2C_0_ADDR as *mut u32,
                mem_map::I2C_1_ADDR as *mut u32,
                mem_map::I2C_2_ADDR as *mut u32,
                mem_map::I2C_3_ADDR as *mut u32,
                mem_map::I2C_4_ADDR as *mut u32,
            ],
            eth_mac: [
                mem_map::ONE_GBE_MAC_ADDR as *mut u32,
                mem_map::FORTY_GBE_MAC_0_ADDR as *mut u32,
                mem_map::FORTY_GBE_MAC_1_ADDR as *mut u32,
                mem_map::FORTY_GBE_MAC_2_ADDR as *mut u32,
                mem_map::FORTY_GBE_MAC_3_ADDR as *mut u32,
            ],
            wdt: mem_map::WDT_BASE as *mut u32,
        }
    }
}

pub struct Board {
    pub regs: BoardRegs,
    pub wb: Wishbone,
    pub flash: FlashSdramCtrl,
    pub one_wire: OneWire,
    pub spi: IspSpiCtrl,
    pub i2c: [I2cMaster; NUM_I2C_BUSES],
    pub mac: [EthMac; NUM_ETHERNET_INTERFACES],
    pub wdt: Watchdog,
    /// gates the QSFP application loop's I2C traffic while a command
    /// handler owns the mezzanine bus
    pub mezz_i2c_access: bool,
}

impl Board {
    pub fn new(bases: BoardBases) -> Self {
        let i2c = [
            I2cMaster::new(bases.i2c[0]),
            I2cMaster::new(bases.i2c[1]),
            I2cMaster::new(bases.i2c[2]),
            I2cMaster::new(bases.i2c[3]),
            I2cMaster::new(bases.i2c[4]),
        ];
        let mac = [
            EthMac::new(bases.eth_mac[0], 0),
            EthMac::new(bases.eth_mac[1], 1),
            EthMac::new(bases.eth_mac[2], 2),
            EthMac::new(bases.eth_mac[3], 3),
            EthMac::new(bases.eth_mac[4], 4),
        ];
        Board {
            regs: BoardRegs::new(bases.board_regs),
            wb: Wishbone::new(bases.wishbone),
            flash: FlashSdramCtrl::new(bases.flash_sdram),
            one_wire: OneWire::new(bases.one_wire),
            spi: IspSpiCtrl::new(bases.spi),
            i2c,
            mac,
            wdt: Watchdog::new(bases.wdt),
            mezz_i2c_access: true,
        }
    }

    pub fn init_i2c(&mut self, clock_hz: u32) {
        for bus in self.i2c.iter_mut() {
            bus.init(clock_hz);
        }
    }
}

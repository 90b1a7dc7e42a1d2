#![cfg_attr(not(test), no_std)]
//! Low-level drivers for the SKARAB motherboard peripherals reachable from
//! the soft CPU: the board register file, the wishbone window, I2C masters,
//! the 1-Wire controller, the ISP SPI and flash/SDRAM controllers, the
//! ethernet MAC cores, the time base and the watchdog.
//!
//! Every driver wraps a base pointer handed in at construction, so the same
//! code drives real MMIO on the target and plain RAM arrays under test.

pub mod board_regs;
pub mod eth_mac;
pub mod flash_sdram;
pub mod hal_i2c;
pub mod hal_spi;
pub mod hal_time;
pub mod mmio;
pub mod one_wire;
pub mod timer;
pub mod wdt;
pub mod wishbone;

/// Result of a hardware transaction
pub type HalResult<T> = Result<T, HalError>;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum HalError {
    /// Bounded polling loop ran out before the peripheral signalled done
    Timeout,
    /// I2C slave did not acknowledge
    Nack,
    /// Address fell outside the decoded window
    OutOfRange,
    /// Device answered but the payload failed a consistency check (e.g. CRC)
    BadData,
}

/// Wishbone slave address map and fixed board constants
pub mod mem_map {
    pub const BOARD_REGISTER_ADDR: u32 = 0x0000_0000;
    pub const FLASH_SDRAM_SPI_ICAPE_ADDR: u32 = 0x0001_0000;
    pub const ONE_WIRE_ADDR: u32 = 0x0001_8000;
    pub const I2C_0_ADDR: u32 = 0x0002_0000;
    pub const I2C_1_ADDR: u32 = 0x0002_8000;
    pub const I2C_2_ADDR: u32 = 0x0003_0000;
    pub const I2C_3_ADDR: u32 = 0x0003_8000;
    pub const I2C_4_ADDR: u32 = 0x0004_0000;
    pub const UART_BASE: u32 = 0x0004_8000;
    pub const WDT_BASE: u32 = 0x0005_0000;
    pub const TIMER_BASE: u32 = 0x0005_8000;

    /// Each ethernet MAC core gets 0x16000 of address space above the DSP offset
    pub const FORTY_GBE_MAC_0_ADDR: u32 = 0x84000;
    pub const FORTY_GBE_MAC_1_ADDR: u32 = 0x9A000;
    pub const FORTY_GBE_MAC_2_ADDR: u32 = 0xB0000;
    pub const FORTY_GBE_MAC_3_ADDR: u32 = 0xC6000;
    pub const ONE_GBE_MAC_ADDR: u32 = 0xDC000;
    pub const DSP_REGISTER_ADDR: u32 = 0x84000;

    /// Top of the decoded wishbone space; accesses past this latch a bus error
    pub const WISHBONE_TOP: u32 = 0x0010_0000;

    pub const MB_I2C_BUS_ID: u8 = 0x0;
    pub const MEZZANINE_0_I2C_BUS_ID: u8 = 0x1;
    pub const MEZZANINE_1_I2C_BUS_ID: u8 = 0x2;
    pub const MEZZANINE_2_I2C_BUS_ID: u8 = 0x3;
    pub const MEZZANINE_3_I2C_BUS_ID: u8 = 0x4;

    pub const MB_ONE_WIRE_PORT: u16 = 0x0;
}

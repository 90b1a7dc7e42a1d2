//! Flash / SDRAM programming controller and the configuration-access port.
//!
//! One wishbone slave carries the parallel NOR flash used for the golden
//! bitstream, the SDRAM staging area used for network reconfiguration, and
//! the internal configuration-access port used to trigger the reboot.

use crate::mmio::Mmio;
use crate::{HalError, HalResult};

// register word offsets within the controller window
const REG_FLASH_ADDR: usize = 0x0;
const REG_FLASH_DATA: usize = 0x1;
const REG_FLASH_CTL: usize = 0x2;
const REG_FLASH_STAT: usize = 0x3;
const REG_SDRAM_CTL: usize = 0x4;
const REG_SDRAM_DATA: usize = 0x5;
const REG_SDRAM_RD_DATA: usize = 0x6;
const REG_SDRAM_FRAME_STAT: usize = 0x7;
const REG_CONTINUITY_WR: usize = 0x8;
const REG_CONTINUITY_RD: usize = 0x9;
const REG_ICAPE_CTL: usize = 0xA;

// flash control bits
const FLASH_CTL_READ: u32 = 0x1;
const FLASH_CTL_PROGRAM: u32 = 0x2;
const FLASH_CTL_ERASE_BLOCK: u32 = 0x4;

// flash status bits
const FLASH_STAT_BUSY: u32 = 0x1;
const FLASH_STAT_ERROR: u32 = 0x2;

// sdram control bits
bitflags::bitflags! {
    pub struct SdramCtl: u32 {
        const OUTPUT_MODE       = 0x0001;
        const CLEAR             = 0x0002;
        const FINISHED_WRITING  = 0x0004;
        const ABOUT_TO_BOOT     = 0x0008;
        const RESET_READ_ADDR   = 0x0010;
        const CLEAR_ETH_STATS   = 0x0020;
        const DEBUG_READ_MODE   = 0x0040;
        const ASYNC_READ        = 0x0080;
    }
}

const ICAPE_REBOOT: u32 = 0x1;

const FLASH_POLL_LIMIT: u32 = 100_000;

pub struct FlashSdramCtrl {
    mmio: Mmio,
    sdram_ctl_shadow: SdramCtl,
}

impl FlashSdramCtrl {
    pub fn new(base: *mut u32) -> Self {
        FlashSdramCtrl {
            mmio: Mmio::new(base),
            sdram_ctl_shadow: SdramCtl::empty(),
        }
    }

    fn flash_wait_ready(&self) -> HalResult<()> {
        for _ in 0..FLASH_POLL_LIMIT {
            let stat = self.mmio.read(REG_FLASH_STAT);
            if stat & FLASH_STAT_BUSY == 0 {
                if stat & FLASH_STAT_ERROR != 0 {
                    return Err(HalError::BadData);
                }
                return Ok(());
            }
        }
        Err(HalError::Timeout)
    }

    pub fn read_flash_word(&mut self, addr: u32) -> HalResult<u16> {
        self.mmio.write(REG_FLASH_ADDR, addr);
        self.mmio.write(REG_FLASH_CTL, FLASH_CTL_READ);
        self.flash_wait_ready()?;
        Ok((self.mmio.read(REG_FLASH_DATA) & 0xffff) as u16)
    }

    pub fn program_flash_word(&mut self, addr: u32, word: u16) -> HalResult<()> {
        self.mmio.write(REG_FLASH_ADDR, addr);
        self.mmio.write(REG_FLASH_DATA, word as u32);
        self.mmio.write(REG_FLASH_CTL, FLASH_CTL_PROGRAM);
        self.flash_wait_ready()
    }

    pub fn erase_flash_block(&mut self, block_addr: u32) -> HalResult<()> {
        self.mmio.write(REG_FLASH_ADDR, block_addr);
        self.mmio.write(REG_FLASH_CTL, FLASH_CTL_ERASE_BLOCK);
        self.flash_wait_ready()
    }

    pub fn sdram_set_ctl(&mut self, set: SdramCtl, clear: SdramCtl) {
        self.sdram_ctl_shadow = (self.sdram_ctl_shadow - clear) | set;
        self.mmio.write(REG_SDRAM_CTL, self.sdram_ctl_shadow.bits());
    }

    pub fn sdram_ctl(&self) -> SdramCtl {
        self.sdram_ctl_shadow
    }

    /// Stream one 32-bit word of bitstream into the SDRAM write port
    pub fn sdram_program_word(&mut self, word: u32) {
        self.mmio.write(REG_SDRAM_DATA, word);
    }

    pub fn sdram_async_read(&mut self) -> u32 {
        self.sdram_set_ctl(SdramCtl::ASYNC_READ, SdramCtl::empty());
        self.sdram_set_ctl(SdramCtl::empty(), SdramCtl::ASYNC_READ);
        self.mmio.read(REG_SDRAM_RD_DATA)
    }

    /// (frames, bad frames, overload frames) counted by the receive fabric
    pub fn sdram_frame_stats(&self) -> (u16, u16, u16) {
        let stat = self.mmio.read(REG_SDRAM_FRAME_STAT);
        let frames = (stat & 0x3ff) as u16;
        let bad = ((stat >> 10) & 0x3ff) as u16;
        let overload = ((stat >> 20) & 0x3ff) as u16;
        (frames, bad, overload)
    }

    pub fn continuity_test(&mut self, output: u32) -> u32 {
        self.mmio.write(REG_CONTINUITY_WR, output);
        self.mmio.read(REG_CONTINUITY_RD)
    }

    /// Hand the FPGA over to the new bitstream. Does not return on hardware.
    pub fn icape_reboot(&mut self) {
        self.mmio.write(REG_ICAPE_CTL, ICAPE_REBOOT);
    }
}

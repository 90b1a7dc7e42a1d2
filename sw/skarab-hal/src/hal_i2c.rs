//! Polled I2C master driver.
//!
//! One instance per bus: bus 0 serves the motherboard (fan controller,
//! monitors, PCA9546 switch), buses 1..4 serve the four mezzanine sites.
//! All waits are bounded iteration counts; nothing here blocks indefinitely.

use crate::mmio::Mmio;
use crate::{HalError, HalResult};

const REG_PRESCALE_LO: usize = 0x0;
const REG_PRESCALE_HI: usize = 0x1;
const REG_CONTROL: usize = 0x2;
const REG_TX: usize = 0x3;
const REG_RX: usize = 0x3;
const REG_COMMAND: usize = 0x4;
const REG_STATUS: usize = 0x4;

const CTRL_CORE_EN: u32 = 0x80;

const CMD_START: u32 = 0x80;
const CMD_STOP: u32 = 0x40;
const CMD_READ: u32 = 0x20;
const CMD_WRITE: u32 = 0x10;
const CMD_NACK: u32 = 0x08;

const STAT_RX_NACK: u32 = 0x80;
const STAT_TIP: u32 = 0x02;

/// Upper bound on status polling iterations for one byte transfer
const I2C_POLL_LIMIT: u32 = 10_000;

pub struct I2cMaster {
    mmio: Mmio,
}

impl I2cMaster {
    pub fn new(base: *mut u32) -> Self {
        I2cMaster {
            mmio: Mmio::new(base),
        }
    }

    /// Program the clock prescale for ~100 kHz SCL and enable the core
    pub fn init(&mut self, clock_hz: u32) {
        let prescale = clock_hz / (5 * 100_000) - 1;
        self.mmio.write(REG_PRESCALE_LO, prescale & 0xff);
        self.mmio.write(REG_PRESCALE_HI, (prescale >> 8) & 0xff);
        self.mmio.write(REG_CONTROL, CTRL_CORE_EN);
    }

    /// Wait for the transfer-in-progress bit to clear
    fn tip_wait(&mut self) -> HalResult<()> {
        for _ in 0..I2C_POLL_LIMIT {
            if self.mmio.read(REG_STATUS) & STAT_TIP == 0 {
                return Ok(());
            }
        }
        // abandon the cycle so a wedged bus does not poison the next one
        self.mmio.write(REG_COMMAND, CMD_STOP);
        Err(HalError::Timeout)
    }

    fn check_ack(&self) -> HalResult<()> {
        if self.mmio.read(REG_STATUS) & STAT_RX_NACK != 0 {
            return Err(HalError::Nack);
        }
        Ok(())
    }

    /// Address the slave for writing and send every byte of `data`
    pub fn write_bytes(&mut self, slave_addr: u8, data: &[u8]) -> HalResult<()> {
        self.mmio.write(REG_TX, (slave_addr as u32) << 1);
        self.mmio.write(REG_COMMAND, CMD_START | CMD_WRITE);
        self.tip_wait()?;
        self.check_ack()?;

        for (i, byte) in data.iter().enumerate() {
            self.mmio.write(REG_TX, *byte as u32);
            if i == data.len() - 1 {
                self.mmio.write(REG_COMMAND, CMD_STOP | CMD_WRITE);
            } else {
                self.mmio.write(REG_COMMAND, CMD_WRITE);
            }
            self.tip_wait()?;
            self.check_ack()?;
        }
        Ok(())
    }

    /// Address the slave for reading and fill `data`
    pub fn read_bytes(&mut self, slave_addr: u8, data: &mut [u8]) -> HalResult<()> {
        self.mmio.write(REG_TX, ((slave_addr as u32) << 1) | 1);
        self.mmio.write(REG_COMMAND, CMD_START | CMD_WRITE);
        self.tip_wait()?;
        self.check_ack()?;

        let last = data.len().saturating_sub(1);
        for (i, byte) in data.iter_mut().enumerate() {
            if i == last {
                self.mmio.write(REG_COMMAND, CMD_STOP | CMD_READ | CMD_NACK);
            } else {
                self.mmio.write(REG_COMMAND, CMD_READ);
            }
            self.tip_wait()?;
            *byte = (self.mmio.read(REG_RX) & 0xff) as u8;
        }
        Ok(())
    }

    /// Write `wr` then repeated-start read into `rd` (PMBus block read shape)
    pub fn write_read(&mut self, slave_addr: u8, wr: &[u8], rd: &mut [u8]) -> HalResult<()> {
        self.mmio.write(REG_TX, (slave_addr as u32) << 1);
        self.mmio.write(REG_COMMAND, CMD_START | CMD_WRITE);
        self.tip_wait()?;
        self.check_ack()?;

        for byte in wr.iter() {
            self.mmio.write(REG_TX, *byte as u32);
            self.mmio.write(REG_COMMAND, CMD_WRITE);
            self.tip_wait()?;
            self.check_ack()?;
        }
        self.read_bytes(slave_addr, rd)
    }
}

//! Timebase watchdog. Expiry reboots the FPGA; this is the only fatal
//! recovery mechanism in the firmware.

use crate::mmio::Mmio;

const REG_TWCSR0: usize = 0x0;
const REG_TBR: usize = 0x2;

const TWCSR_ENABLE: u32 = 0x3; // EWDT1 | EWDT2
const TWCSR_EXPIRED: u32 = 0x8; // WDS, write-1-to-clear
const TWCSR_KICK: u32 = 0x4; // WRS restart strobe

pub struct Watchdog {
    mmio: Mmio,
    expired_at_boot: bool,
}

impl Watchdog {
    pub fn new(base: *mut u32) -> Self {
        Watchdog {
            mmio: Mmio::new(base),
            expired_at_boot: false,
        }
    }

    /// Start the watchdog, noting whether the previous reset was an expiry
    pub fn start(&mut self) {
        let csr = self.mmio.read(REG_TWCSR0);
        self.expired_at_boot = csr & TWCSR_EXPIRED != 0;
        // clear a latched expiry, then enable
        self.mmio.write(REG_TWCSR0, csr | TWCSR_EXPIRED);
        self.mmio.write(REG_TWCSR0, TWCSR_ENABLE);
    }

    /// True when the reset that led to this boot came from the watchdog
    pub fn expired_at_boot(&self) -> bool {
        self.expired_at_boot
    }

    pub fn kick(&mut self) {
        self.mmio.write(REG_TWCSR0, TWCSR_ENABLE | TWCSR_KICK);
    }

    pub fn timebase(&self) -> u32 {
        self.mmio.read(REG_TBR)
    }
}

//! Mezzanine site discovery, classification and management.
//!
//! Each of the four sites is probed at boot: the card's 1-Wire EEPROM names
//! the hardware, a status register names the driver compiled into the FPGA
//! firmware, and a site is only brought up when the two agree.

use crate::adc::AdcSm;
use crate::board::{Board, NUM_MEZZ_SITES};
use crate::qsfp::QsfpSm;
use debug::{logln, LL, LS};
use skarab_hal::board_regs::{
    C_RD_MEZZANINE_STAT_0_ADDR, C_RD_MEZZANINE_STAT_1_ADDR, C_WR_MEZZANINE_CTL_ADDR,
};

pub const MEZZ_MAGIC: u32 = 0xA5A5_A5A5;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum MezzHwType {
    Open,
    Unknown,
    Qsfp,
    QsfpPhy,
    Adc,
    Hmc,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum MezzFwType {
    Open,
    Unknown,
    Qsfp,
    Hmc,
    Adc,
}

/// The per-card machine, present only when hardware and firmware agree
pub enum MezzCard {
    None,
    Qsfp(QsfpSm),
    Adc(AdcSm),
    /// HMC cards need no supervisory machine; commands talk to them directly
    Hmc,
}

pub struct Mezzanine {
    magic: u32,
    pub site: u8,
    pub hw_type: MezzHwType,
    pub fw_type: MezzFwType,
    pub firmw_support: bool,
    /// set only when hardware and firmware agree (and, for QSFP, when this
    /// is the first QSFP site found)
    pub allow_init: bool,
    pub card: MezzCard,
}

impl Mezzanine {
    pub fn is_initialized(&self) -> bool {
        self.magic == MEZZ_MAGIC
    }

    pub fn qsfp(&mut self) -> Option<&mut QsfpSm> {
        match self.card {
            MezzCard::Qsfp(ref mut sm) => Some(sm),
            _ => None,
        }
    }

    pub fn adc(&mut self) -> Option<&mut AdcSm> {
        match self.card {
            MezzCard::Adc(ref mut sm) => Some(sm),
            _ => None,
        }
    }
}

/// Probe all four sites. Only one QSFP card is managed; a second detected
/// QSFP site is recorded but left uninitialized.
pub fn discover(board: &mut Board) -> [Mezzanine; NUM_MEZZ_SITES] {
    let mut qsfp_present = false;
    let mut init_site = |site: u8| -> Mezzanine {
        let hw_type = read_mezz_type_id(board, site);
        let fw_type = get_mezz_firmware_type(board, site);
        let firmw_support = match (hw_type, fw_type) {
            (MezzHwType::Qsfp, MezzFwType::Qsfp) => true,
            (MezzHwType::QsfpPhy, MezzFwType::Qsfp) => true,
            (MezzHwType::Adc, MezzFwType::Adc) => true,
            (MezzHwType::Hmc, MezzFwType::Hmc) => true,
            _ => {
                if hw_type != MezzHwType::Open && hw_type != MezzHwType::Unknown {
                    logln!(
                        LS::General,
                        LL::Warn,
                        "MEZZ [{:02x}] no firmware support for detected card",
                        site
                    );
                }
                false
            }
        };
        let mut allow_init = firmw_support;
        let card = if firmw_support {
            match hw_type {
                MezzHwType::Qsfp | MezzHwType::QsfpPhy => {
                    if qsfp_present {
                        // only one managed QSFP card per board
                        allow_init = false;
                        MezzCard::None
                    } else {
                        qsfp_present = true;
                        MezzCard::Qsfp(QsfpSm::new(site))
                    }
                }
                MezzHwType::Adc => MezzCard::Adc(AdcSm::new(site)),
                MezzHwType::Hmc => MezzCard::Hmc,
                _ => MezzCard::None,
            }
        } else {
            MezzCard::None
        };
        Mezzanine {
            magic: MEZZ_MAGIC,
            site,
            hw_type,
            fw_type,
            firmw_support,
            allow_init,
            card,
        }
    };
    [init_site(0), init_site(1), init_site(2), init_site(3)]
}

/// Identify the hardware at a site from its 1-Wire EEPROM PX-number and
/// manufacturer ID bytes
fn read_mezz_type_id(board: &mut Board, site: u8) -> MezzHwType {
    let mezz_mask = 1u32 << site;
    let one_wire_port = site as u16 + 1;

    let stat = board.regs.read(C_RD_MEZZANINE_STAT_0_ADDR);
    if stat & mezz_mask == 0 {
        logln!(LS::General, LL::Info, "MEZZ [{:02x}] hardware: none", site);
        return MezzHwType::Open;
    }

    // power up the site before touching its EEPROM
    board.regs.rmw(C_WR_MEZZANINE_CTL_ADDR, 0, mezz_mask);

    let mut rom = [0u8; 8];
    if board.one_wire.read_rom(&mut rom, one_wire_port).is_err() {
        logln!(
            LS::General,
            LL::Error,
            "MEZZ [{:02x}] failed to read device rom",
            site
        );
        return MezzHwType::Unknown;
    }
    let mut id = [0u8; 7];
    if board
        .one_wire
        .ds2433_read_mem(Some(&rom), &mut id, 0, 0, one_wire_port)
        .is_err()
    {
        logln!(
            LS::General,
            LL::Error,
            "MEZZ [{:02x}] failed to read id bytes",
            site
        );
        return MezzHwType::Unknown;
    }

    match (id[0], id[4], id[5], id[6]) {
        (0x50, 0x01, 0xE3, 0x99) => {
            logln!(LS::General, LL::Info, "MEZZ [{:02x}] hardware: QSFP+", site);
            MezzHwType::Qsfp
        }
        (0x50, 0x01, 0xE3, 0xFD) => {
            logln!(LS::General, LL::Info, "MEZZ [{:02x}] hardware: QSFP+ PHY", site);
            MezzHwType::QsfpPhy
        }
        (0x50, 0x01, 0xE7, 0xE5) | (0x50, 0x01, 0xE7, 0xE6) | (0x50, 0x01, 0xE7, 0xE7) => {
            logln!(LS::General, LL::Info, "MEZZ [{:02x}] hardware: ADC", site);
            MezzHwType::Adc
        }
        (0x53, 0xFF, 0x00, 0x01) => {
            logln!(LS::General, LL::Info, "MEZZ [{:02x}] hardware: HMC", site);
            MezzHwType::Hmc
        }
        _ => {
            logln!(
                LS::General,
                LL::Info,
                "MEZZ [{:02x}] hardware: unsupported px/manufacturer id",
                site
            );
            MezzHwType::Unknown
        }
    }
}

/// The driver compiled into the FPGA image, from the per-site status nibble
fn get_mezz_firmware_type(board: &Board, site: u8) -> MezzFwType {
    let reg = board.regs.read(C_RD_MEZZANINE_STAT_1_ADDR);
    let nibble = (reg >> (site * 4)) & 0xf;
    let id = (nibble >> 1) & 0x3;
    match id {
        0 => MezzFwType::Open,
        1 => MezzFwType::Qsfp,
        2 => MezzFwType::Hmc,
        3 => MezzFwType::Adc,
        _ => MezzFwType::Unknown,
    }
}

/// Tick every managed card machine once
pub fn run_mezz_mgmt(mezz: &mut [Mezzanine; NUM_MEZZ_SITES], board: &mut Board) {
    for m in mezz.iter_mut() {
        if !m.is_initialized() || !m.allow_init {
            continue;
        }
        match m.card {
            MezzCard::Qsfp(ref mut sm) => sm.step(board),
            MezzCard::Adc(ref mut sm) => sm.step(board),
            MezzCard::Hmc | MezzCard::None => (),
        }
    }
}

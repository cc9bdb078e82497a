use serde::{Deserialize, Serialize};

use crate::{PatcherError, Result};

/// Cartridge bus layouts the translator knows how to linearise.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum MemoryMap {
    ExHiRom,
    LoRom,
}

// Hi bank $30 is redirected into the extended lo bank $40.
const EXTENDED_WINDOW_MASK: u32 = 0xFF_8000;
const EXTENDED_WINDOW: u32 = 0x30_8000;
const EXTENDED_BANK: u32 = 0x40_0000;
const EXTENDED_BANK_MASK: u32 = 0x7FFF;

const EXHI_MIDPOINT: u32 = 0x80_0000;
const EXHI_LO_OFFSET: u32 = 0x40_0000;
const EXHI_ADDRESS_MASK: u32 = 0x3F_FFFF;

const BUS_LIMIT: u32 = 0xFF_FFFF;

pub const DEFAULT_MAX_OFFSET: usize = 0x60_0000;

/// Maps logical bus addresses onto offsets in the linear image file.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AddressTranslator {
    map: MemoryMap,
    max_offset: usize,
}

impl AddressTranslator {
    pub fn new(map: MemoryMap, max_offset: usize) -> Self {
        Self { map, max_offset }
    }

    pub fn exhirom() -> Self {
        Self::new(MemoryMap::ExHiRom, DEFAULT_MAX_OFFSET)
    }

    pub fn translate(&self, addr: u32) -> Result<usize> {
        if addr > BUS_LIMIT {
            return Err(PatcherError::AddressOutOfRange {
                addr,
                offset: addr as usize,
                max: self.max_offset,
            });
        }

        let offset = match self.map {
            MemoryMap::ExHiRom => exhirom_to_pc(addr),
            MemoryMap::LoRom => lorom_to_pc(addr),
        } as usize;

        // An offset equal to the limit is still accepted.
        if offset > self.max_offset {
            return Err(PatcherError::AddressOutOfRange {
                addr,
                offset,
                max: self.max_offset,
            });
        }

        Ok(offset)
    }
}

pub fn exhirom_to_pc(addr: u32) -> u32 {
    if addr & EXTENDED_WINDOW_MASK == EXTENDED_WINDOW {
        return EXTENDED_BANK | (addr & EXTENDED_BANK_MASK);
    }

    // Banks below $80 live in the upper half of the file; everything above
    // collapses onto the mirrored lower half.
    let base = if addr < EXHI_MIDPOINT { EXHI_LO_OFFSET } else { 0 };
    base | (addr & EXHI_ADDRESS_MASK)
}

pub fn lorom_to_pc(addr: u32) -> u32 {
    ((addr & 0x7F_0000) >> 1) | (addr & 0x7FFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_window_goes_to_bank_40() {
        let t = AddressTranslator::exhirom();
        assert_eq!(t.translate(0x30_8052).unwrap(), 0x40_0052);
        assert_eq!(t.translate(0x30_807C).unwrap(), 0x40_007C);
        assert_eq!(t.translate(0x30_FFFF).unwrap(), 0x40_7FFF);
    }

    #[test]
    fn every_window_address_matches_formula() {
        let t = AddressTranslator::exhirom();
        for addr in (0x30_8000u32..=0x30_FFFF).step_by(0x101) {
            assert_eq!(t.translate(addr).unwrap(), 0x40_0000 | (addr as usize & 0x7FFF));
        }
    }

    #[test]
    fn low_banks_get_exhi_offset() {
        let t = AddressTranslator::exhirom();
        assert_eq!(t.translate(0x02_A09D).unwrap(), 0x42_A09D);
        assert_eq!(t.translate(0x00_FFC0).unwrap(), 0x40_FFC0);
        // Bank $30 below the window takes the general path and lands past
        // the end of the image.
        assert!(t.translate(0x30_7FFF).is_err());
    }

    #[test]
    fn high_banks_collapse_mirrors() {
        let t = AddressTranslator::exhirom();
        assert_eq!(t.translate(0x80_FFC0).unwrap(), 0x00_FFC0);
        assert_eq!(t.translate(0xF8_6000).unwrap(), 0x38_6000);
        assert_eq!(t.translate(0xC0_0000).unwrap(), t.translate(0x80_0000).unwrap());
    }

    #[test]
    fn offsets_past_limit_are_rejected() {
        let t = AddressTranslator::exhirom();
        assert_eq!(t.translate(0x20_0000).unwrap(), 0x60_0000);
        match t.translate(0x20_0001) {
            Err(PatcherError::AddressOutOfRange { offset, max, .. }) => {
                assert_eq!(offset, 0x60_0001);
                assert_eq!(max, 0x60_0000);
            }
            other => panic!("expected AddressOutOfRange, got {other:?}"),
        }
        assert!(t.translate(0x3F_FFFF).is_err());
        assert!(t.translate(0x100_0000).is_err());
    }

    #[test]
    fn lorom_strips_bank_bit() {
        let t = AddressTranslator::new(MemoryMap::LoRom, 0x40_0000);
        assert_eq!(t.translate(0x80_FFC0).unwrap(), 0x7FC0);
        assert_eq!(t.translate(0xB5_FE52).unwrap(), 0x1A_FE52);
        assert_eq!(t.translate(0x00_8000).unwrap(), 0x0000);
    }
}

//! Card-specific data register decoding.

use crate::status::CardType;

/// CSD register, big-endian & MSB-first as clocked out by SEND_CSD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Csd(u128);

impl Csd {
    pub fn from_bytes(bytes: &[u8; 16]) -> Self {
        Self(u128::from_be_bytes(*bytes))
    }

    /// Bits `hi..=lo` of the register.
    fn field(&self, hi: u32, lo: u32) -> u32 {
        ((self.0 >> lo) & ((1u128 << (hi - lo + 1)) - 1)) as u32
    }

    /// CSD_STRUCTURE: 0 for SD v1.x and most MMC, 1 for SD v2.0.
    pub fn structure(&self) -> u32 {
        self.field(127, 126)
    }

    /// Card capacity in 512-byte sectors, saturating at `u32::MAX` for the
    /// largest SDXC layouts.
    pub fn sector_count(&self) -> u32 {
        if self.structure() == 1 {
            let c_size = self.field(69, 48); // 22 bits
            let sectors = (c_size as u64 + 1) << 10;
            u32::try_from(sectors).unwrap_or(u32::MAX)
        } else {
            let read_bl_len = self.field(83, 80);
            let c_size = self.field(73, 62);
            let c_size_mult = self.field(49, 47);
            let shift = read_bl_len + c_size_mult + 2;
            let blocks = c_size + 1;
            if shift >= 9 {
                blocks << (shift - 9)
            } else {
                blocks >> (9 - shift)
            }
        }
    }

    /// ERASE_BLK_EN, or a v2.0 layout, where erase is always by sector.
    pub fn sector_erase_supported(&self) -> bool {
        self.structure() != 0 || self.field(46, 46) == 1
    }

    /// Erase unit in sectors, from the v1.x fields. SD v2.0 reports it in
    /// the SD status register instead.
    pub fn erase_block_size(&self, card_type: CardType) -> u32 {
        if card_type.contains(CardType::SD1) {
            let sector_size = self.field(45, 39);
            let write_bl_len = self.field(25, 22);
            (sector_size + 1) << write_bl_len.saturating_sub(9)
        } else {
            let erase_grp_size = self.field(46, 42);
            let erase_grp_mult = self.field(41, 37);
            (erase_grp_size + 1) * (erase_grp_mult + 1)
        }
    }
}

/// Erase unit in sectors from AU_SIZE, given the leading 16 bytes of the SD
/// status register.
pub fn au_sectors(sd_status: &[u8; 16]) -> u32 {
    16 << (sd_status[10] >> 4)
}

use bitflags::bitflags;

use crate::SECTOR_SIZE;

bitflags! {
    /// Drive status as seen by the file system.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DiskStatus: u8 {
        /// The card has not been (successfully) initialized.
        const UNINITIALIZED = 0x01;
        /// The socket is empty.
        const NO_MEDIA = 0x02;
        /// The card is write protected.
        const WRITE_PROTECTED = 0x04;
    }
}

bitflags! {
    /// Card family detected by `initialize()`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CardType: u8 {
        /// MMC v3
        const MMC = 0x01;
        /// SD v1.x
        const SD1 = 0x02;
        /// SD v2.0 or later
        const SD2 = 0x04;
        /// commands take a block index instead of a byte offset
        const BLOCK = 0x08;

        const SDC = Self::SD1.bits() | Self::SD2.bits();
    }
}

impl CardType {
    pub fn is_sd(self) -> bool {
        self.intersects(Self::SDC)
    }

    pub fn is_block_addressed(self) -> bool {
        self.contains(Self::BLOCK)
    }

    /// Command argument addressing `sector` on this card.
    pub fn address(self, sector: u32) -> u32 {
        if self.is_block_addressed() {
            sector
        } else {
            sector.wrapping_mul(SECTOR_SIZE as u32)
        }
    }
}

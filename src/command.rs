//! SPI-mode command set and the 6-byte command frame.

use bitflags::bitflags;
use crc::{Crc, CRC_7_MMC};

/// Poll result when the card never drove a response.
pub const NO_RESPONSE: u8 = 0xFF;

const CRC7: Crc<u8> = Crc::<u8>::new(&CRC_7_MMC);

bitflags! {
    /// R1 response bits. Bit 7 is always clear on a real response.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct R1: u8 {
        const IDLE = 0x01;
        const ERASE_RESET = 0x02;
        const ILLEGAL_COMMAND = 0x04;
        const CRC_ERROR = 0x08;
        const ERASE_SEQUENCE = 0x10;
        const ADDRESS = 0x20;
        const PARAMETER = 0x40;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cmd {
    pub index: u8,
    pub arg: u32,
    /// must be preceded by APP_CMD
    pub app: bool,
}

impl Cmd {
    const fn new(index: u8, arg: u32) -> Self {
        Self {
            index,
            arg,
            app: false,
        }
    }

    const fn app(index: u8, arg: u32) -> Self {
        Self {
            index,
            arg,
            app: true,
        }
    }

    /// GO_IDLE_STATE
    pub const fn cmd0() -> Self {
        Self::new(0, 0)
    }
    /// SEND_OP_COND (MMC)
    pub const fn cmd1() -> Self {
        Self::new(1, 0)
    }
    /// SEND_IF_COND
    pub const fn cmd8(check_pattern: u8) -> Self {
        let mut arg: u32 = 0;
        arg |= 0b0001 << 8; // host supply voltage 2.7-3.6V
        arg |= check_pattern as u32;
        Self::new(8, arg)
    }
    /// SEND_CSD
    pub const fn cmd9() -> Self {
        Self::new(9, 0)
    }
    /// SEND_CID
    pub const fn cmd10() -> Self {
        Self::new(10, 0)
    }
    /// STOP_TRANSMISSION
    pub const fn cmd12() -> Self {
        Self::new(12, 0)
    }
    /// SET_BLOCKLEN
    pub const fn cmd16(block_len: u32) -> Self {
        Self::new(16, block_len)
    }
    /// READ_SINGLE_BLOCK
    pub const fn cmd17(address: u32) -> Self {
        Self::new(17, address)
    }
    /// READ_MULTIPLE_BLOCK
    pub const fn cmd18(address: u32) -> Self {
        Self::new(18, address)
    }
    /// WRITE_BLOCK
    pub const fn cmd24(address: u32) -> Self {
        Self::new(24, address)
    }
    /// WRITE_MULTIPLE_BLOCK
    pub const fn cmd25(address: u32) -> Self {
        Self::new(25, address)
    }
    /// ERASE_WR_BLK_START
    pub const fn cmd32(address: u32) -> Self {
        Self::new(32, address)
    }
    /// ERASE_WR_BLK_END
    pub const fn cmd33(address: u32) -> Self {
        Self::new(33, address)
    }
    /// ERASE
    pub const fn cmd38() -> Self {
        Self::new(38, 0)
    }
    /// READ_EXTR_SINGLE
    pub const fn cmd48(arg: u32) -> Self {
        Self::new(48, arg)
    }
    /// WRITE_EXTR_SINGLE
    pub const fn cmd49(arg: u32) -> Self {
        Self::new(49, arg)
    }
    /// APP_CMD
    pub const fn cmd55() -> Self {
        Self::new(55, 0)
    }
    /// READ_OCR
    pub const fn cmd58() -> Self {
        Self::new(58, 0)
    }
    /// SD_STATUS
    pub const fn acmd13() -> Self {
        Self::app(13, 0)
    }
    /// SET_WR_BLK_ERASE_COUNT
    pub const fn acmd23(blocks: u32) -> Self {
        Self::app(23, blocks)
    }
    /// SD_SEND_OP_COND
    pub const fn acmd41(supports_sdhc: bool) -> Self {
        Self::app(41, (supports_sdhc as u32) << 30)
    }

    /// STOP_TRANSMISSION goes out while the card is still streaming data, so
    /// it skips the deselect/reselect handshake.
    pub fn is_stop(&self) -> bool {
        self.index == 12
    }

    /// Start bit + index, big-endian argument, CRC7 + end bit.
    ///
    /// Only GO_IDLE_STATE and SEND_IF_COND are evaluated before the card
    /// drops CRC checking, so only those two carry a real CRC.
    pub fn frame(&self) -> [u8; 6] {
        let mut frame = [0u8; 6];
        frame[0] = 0x40 | (self.index & 0x3F);
        frame[1..5].copy_from_slice(&self.arg.to_be_bytes());
        frame[5] = match self.index {
            0 | 8 => CRC7.checksum(&frame[..5]) << 1 | 1,
            _ => 0x01,
        };
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn go_idle_frame() {
        assert_eq!(Cmd::cmd0().frame(), [0x40, 0, 0, 0, 0, 0x95]);
    }

    #[test]
    fn if_cond_frame() {
        assert_eq!(Cmd::cmd8(0xAA).frame(), [0x48, 0, 0, 0x01, 0xAA, 0x87]);
    }

    #[test]
    fn other_commands_use_dummy_crc() {
        assert_eq!(
            Cmd::cmd17(0x1234_5678).frame(),
            [0x51, 0x12, 0x34, 0x56, 0x78, 0x01]
        );
        assert_eq!(Cmd::acmd41(true).frame(), [0x69, 0x40, 0, 0, 0, 0x01]);
    }

    #[test]
    fn app_commands_flagged() {
        assert!(Cmd::acmd41(false).app);
        assert!(Cmd::acmd23(4).app);
        assert!(!Cmd::cmd55().app);
        assert!(Cmd::cmd12().is_stop());
        assert!(!Cmd::cmd18(0).is_stop());
    }
}

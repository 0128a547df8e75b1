//! Control requests: geometry queries, trim, raw register reads, socket power
//! and the iSDIO extension registers.

use crate::block::{TOKEN_START_BLOCK, TOKEN_MS};
use crate::bus::{BusArbiter, BusGuard};
use crate::command::Cmd;
use crate::csd::{au_sectors, Csd};
use crate::disk::MmcSpi;
use crate::error::{Error, Fault};
use crate::link::Link;
use crate::socket::Socket;
use crate::status::{CardType, DiskStatus};
use crate::transport::Transport;
use crate::SECTOR_SIZE;

/// Erase may keep the card busy for this long.
const ERASE_MS: u32 = 30_000;
/// The SD status register is one 64-byte data packet.
const SD_STATUS_LEN: usize = 64;
/// Only the first 16 bytes of SD status carry the AU size.
const SD_STATUS_HEAD: usize = 16;
/// Extension register packets are always a full 512-byte block.
const ISDIO_PACKET_LEN: usize = 512;
const ISDIO_TOKEN_MS: u32 = 1000;

/// Control request with its typed payload.
#[derive(Debug)]
pub enum Ioctl<'b> {
    /// Waits until the card has finished any internal write.
    Sync,
    GetSectorCount(&'b mut u32),
    GetSectorSize(&'b mut u16),
    /// Erase unit in sectors.
    GetEraseBlockSize(&'b mut u32),
    /// Erases sectors `start..=end`. SD cards with sector erase only.
    Trim { start: u32, end: u32 },
    GetCardType(&'b mut CardType),
    GetCsd(&'b mut [u8; 16]),
    GetCid(&'b mut [u8; 16]),
    GetOcr(&'b mut [u8; 4]),
    GetSdStatus(&'b mut [u8; 64]),
    /// Reads `data.len()` (1..=512) bytes of extension register space.
    IsdioRead {
        function: u8,
        address: u32,
        data: &'b mut [u8],
    },
    /// Writes `data.len()` (1..=512) bytes of extension register space.
    IsdioWrite {
        function: u8,
        address: u32,
        data: &'b [u8],
    },
    /// Read-modify-write of one extension register byte: bits set in `mask`
    /// take their value from `value`.
    IsdioMaskWrite {
        function: u8,
        address: u32,
        mask: u8,
        value: u8,
    },
    /// Switches socket power off; the card needs `initialize()` again.
    PowerOff,
}

impl Ioctl<'_> {
    fn name(&self) -> &'static str {
        match self {
            Ioctl::Sync => "sync",
            Ioctl::GetSectorCount(_) => "sector-count",
            Ioctl::GetSectorSize(_) => "sector-size",
            Ioctl::GetEraseBlockSize(_) => "erase-block-size",
            Ioctl::Trim { .. } => "trim",
            Ioctl::GetCardType(_) => "card-type",
            Ioctl::GetCsd(_) => "csd",
            Ioctl::GetCid(_) => "cid",
            Ioctl::GetOcr(_) => "ocr",
            Ioctl::GetSdStatus(_) => "sd-status",
            Ioctl::IsdioRead { .. } => "isdio-read",
            Ioctl::IsdioWrite { .. } => "isdio-write",
            Ioctl::IsdioMaskWrite { .. } => "isdio-mask-write",
            Ioctl::PowerOff => "power-off",
        }
    }
}

/// Numeric control codes, FatFs `disk_ioctl` numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ControlCode {
    Sync = 0,
    GetSectorCount = 1,
    GetSectorSize = 2,
    GetBlockSize = 3,
    Trim = 4,
    PowerOff = 5,
    GetType = 10,
    GetCsd = 11,
    GetCid = 12,
    GetOcr = 13,
    GetSdStatus = 14,
}

impl TryFrom<u8> for ControlCode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        Ok(match value {
            0 => ControlCode::Sync,
            1 => ControlCode::GetSectorCount,
            2 => ControlCode::GetSectorSize,
            3 => ControlCode::GetBlockSize,
            4 => ControlCode::Trim,
            5 => ControlCode::PowerOff,
            10 => ControlCode::GetType,
            11 => ControlCode::GetCsd,
            12 => ControlCode::GetCid,
            13 => ControlCode::GetOcr,
            14 => ControlCode::GetSdStatus,
            _ => return Err(Error::Parameter),
        })
    }
}

/// The leading `N` bytes of `buf`.
fn head<const N: usize>(buf: &mut [u8]) -> Result<&mut [u8; N], Error> {
    buf.get_mut(..N)
        .and_then(|head| head.try_into().ok())
        .ok_or(Error::Parameter)
}

fn isdio_arg(function: u8, address: u32) -> u32 {
    (function as u32 & 0x7) << 28 | (address & 0x1_FFFF) << 9
}

impl<'s, T: Transport> Link<'s, T> {
    fn read_csd(&mut self) -> Result<Csd, Fault> {
        let mut raw = [0u8; 16];
        self.command(Cmd::cmd9())?;
        self.receive_block(&mut raw)?;
        Ok(Csd::from_bytes(&raw))
    }

    /// SD_STATUS answers with R2; the second status byte precedes the packet.
    fn read_sd_status(&mut self, buf: &mut [u8]) -> Result<(), Fault> {
        self.command(Cmd::acmd13())?;
        self.exchange(0xFF);
        self.receive_packet(buf, SD_STATUS_LEN, TOKEN_MS)
    }

    fn erase_block_size(&mut self, card_type: CardType) -> Result<u32, Fault> {
        if card_type.contains(CardType::SD2) {
            let mut status = [0u8; SD_STATUS_HEAD];
            self.read_sd_status(&mut status)?;
            Ok(au_sectors(&status))
        } else {
            Ok(self.read_csd()?.erase_block_size(card_type))
        }
    }

    fn trim(&mut self, card_type: CardType, start: u32, end: u32) -> Result<(), Fault> {
        if !card_type.is_sd() || !self.read_csd()?.sector_erase_supported() {
            debug!("trim: card has no sector erase");
            return Err(Fault::Unsupported);
        }

        self.command(Cmd::cmd32(card_type.address(start)))?;
        self.command(Cmd::cmd33(card_type.address(end)))?;
        self.command(Cmd::cmd38())?;
        if !self.wait_ready(ERASE_MS) {
            error!("erase {}..={} still busy after {} ms", start, end, ERASE_MS);
            return Err(Fault::Timeout);
        }
        Ok(())
    }

    fn isdio_read(&mut self, function: u8, address: u32, data: &mut [u8]) -> Result<(), Fault> {
        let arg = 0x8000_0000 | isdio_arg(function, address) | (data.len() as u32 - 1) & 0x1FF;
        self.command(Cmd::cmd48(arg))?;
        self.receive_packet(data, ISDIO_PACKET_LEN, ISDIO_TOKEN_MS)
    }

    fn isdio_write(&mut self, function: u8, address: u32, data: &[u8]) -> Result<(), Fault> {
        let arg = 0x8000_0000 | isdio_arg(function, address) | (data.len() as u32 - 1) & 0x1FF;
        self.command(Cmd::cmd49(arg))?;
        self.exchange(0xFF);
        self.exchange(TOKEN_START_BLOCK);
        self.bus.transmit_bulk(data);
        // pad to a full packet, then the two CRC bytes
        for _ in data.len()..ISDIO_PACKET_LEN + 2 {
            self.exchange(0xFF);
        }
        self.data_response()
    }

    fn isdio_mask_write(
        &mut self,
        function: u8,
        address: u32,
        mask: u8,
        value: u8,
    ) -> Result<(), Fault> {
        let arg = 0x8400_0000 | isdio_arg(function, address) | mask as u32;
        self.command(Cmd::cmd49(arg))?;
        self.exchange(0xFF);
        self.exchange(TOKEN_START_BLOCK);
        self.exchange(value);
        for _ in 1..ISDIO_PACKET_LEN + 2 {
            self.exchange(0xFF);
        }
        self.data_response()
    }
}

impl<'s, T: Transport, S: Socket, A: BusArbiter> MmcSpi<'s, T, S, A> {
    /// Runs one control request.
    pub fn ioctl(&mut self, request: Ioctl<'_>) -> Result<(), Error> {
        if self.status().contains(DiskStatus::UNINITIALIZED) {
            return Err(Error::NotReady);
        }
        match &request {
            Ioctl::IsdioRead { data, .. } if !(1..=ISDIO_PACKET_LEN).contains(&data.len()) => {
                return Err(Error::Parameter)
            }
            Ioctl::IsdioWrite { data, .. } if !(1..=ISDIO_PACKET_LEN).contains(&data.len()) => {
                return Err(Error::Parameter)
            }
            _ => {}
        }
        trace!("ioctl {}", request.name());

        let _bus = BusGuard::acquire(&mut self.arbiter);
        let link = &mut self.link;
        let card_type = self.card_type;

        let result = match request {
            Ioctl::Sync => {
                if link.select() {
                    Ok(())
                } else {
                    Err(Fault::Timeout)
                }
            }
            Ioctl::GetSectorCount(count) => link.read_csd().map(|csd| *count = csd.sector_count()),
            Ioctl::GetSectorSize(size) => {
                *size = SECTOR_SIZE as u16;
                Ok(())
            }
            Ioctl::GetEraseBlockSize(size) => {
                link.erase_block_size(card_type).map(|sectors| *size = sectors)
            }
            Ioctl::Trim { start, end } => link.trim(card_type, start, end),
            Ioctl::GetCardType(out) => {
                *out = card_type;
                Ok(())
            }
            Ioctl::GetCsd(csd) => link
                .command(Cmd::cmd9())
                .and_then(|()| link.receive_block(&mut csd[..])),
            Ioctl::GetCid(cid) => link
                .command(Cmd::cmd10())
                .and_then(|()| link.receive_block(&mut cid[..])),
            Ioctl::GetOcr(ocr) => link
                .command(Cmd::cmd58())
                .map(|()| *ocr = link.receive_trailer()),
            Ioctl::GetSdStatus(status) => link.read_sd_status(&mut status[..]),
            Ioctl::IsdioRead {
                function,
                address,
                data,
            } => link.isdio_read(function, address, data),
            Ioctl::IsdioWrite {
                function,
                address,
                data,
            } => link.isdio_write(function, address, data),
            Ioctl::IsdioMaskWrite {
                function,
                address,
                mask,
                value,
            } => link.isdio_mask_write(function, address, mask, value),
            Ioctl::PowerOff => {
                self.socket.power_off();
                link.state.set(DiskStatus::UNINITIALIZED);
                Ok(())
            }
        };
        link.deselect();

        result.map_err(|e| {
            debug!("ioctl failed: {:?}", e);
            e.into()
        })
    }

    /// Byte-buffer form of [`MmcSpi::ioctl`] keyed by [`ControlCode`].
    ///
    /// Scalars travel in native byte order; `Trim` takes the start and end
    /// sector as two consecutive `u32`s.
    pub fn ioctl_raw(&mut self, code: u8, buf: &mut [u8]) -> Result<(), Error> {
        match ControlCode::try_from(code)? {
            ControlCode::Sync => self.ioctl(Ioctl::Sync),
            ControlCode::GetSectorCount => {
                let out = head::<4>(buf)?;
                let mut count = 0;
                self.ioctl(Ioctl::GetSectorCount(&mut count))?;
                *out = count.to_ne_bytes();
                Ok(())
            }
            ControlCode::GetSectorSize => {
                let out = head::<2>(buf)?;
                let mut size = 0;
                self.ioctl(Ioctl::GetSectorSize(&mut size))?;
                *out = size.to_ne_bytes();
                Ok(())
            }
            ControlCode::GetBlockSize => {
                let out = head::<4>(buf)?;
                let mut size = 0;
                self.ioctl(Ioctl::GetEraseBlockSize(&mut size))?;
                *out = size.to_ne_bytes();
                Ok(())
            }
            ControlCode::Trim => {
                let range = head::<8>(buf)?;
                let start = u32::from_ne_bytes([range[0], range[1], range[2], range[3]]);
                let end = u32::from_ne_bytes([range[4], range[5], range[6], range[7]]);
                self.ioctl(Ioctl::Trim { start, end })
            }
            ControlCode::PowerOff => self.ioctl(Ioctl::PowerOff),
            ControlCode::GetType => {
                let out = head::<1>(buf)?;
                let mut card_type = CardType::empty();
                self.ioctl(Ioctl::GetCardType(&mut card_type))?;
                out[0] = card_type.bits();
                Ok(())
            }
            ControlCode::GetCsd => self.ioctl(Ioctl::GetCsd(head(buf)?)),
            ControlCode::GetCid => self.ioctl(Ioctl::GetCid(head(buf)?)),
            ControlCode::GetOcr => self.ioctl(Ioctl::GetOcr(head(buf)?)),
            ControlCode::GetSdStatus => self.ioctl(Ioctl::GetSdStatus(head(buf)?)),
        }
    }
}

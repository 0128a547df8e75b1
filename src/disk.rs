//! The block-device facade: status, sector read and write.

use crate::block::{TOKEN_START_BLOCK, TOKEN_START_MULTI};
use crate::bus::{BusArbiter, BusGuard, Exclusive};
use crate::command::Cmd;
use crate::config::Config;
use crate::error::Error;
use crate::link::Link;
use crate::socket::{FixedSocket, Socket};
use crate::status::{CardType, DiskStatus};
use crate::timer::DiskState;
use crate::transport::Transport;
use crate::SECTOR_SIZE;

/// SD/MMC card in SPI mode.
///
/// `state` is shared with the 10 ms timer interrupt, which calls
/// [`DiskState::tick`] (or [`MmcSpi::timer_tick`] when the driver itself
/// lives in the interrupt's reach).
pub struct MmcSpi<'s, T, S = FixedSocket, A = Exclusive> {
    pub(crate) link: Link<'s, T>,
    pub(crate) socket: S,
    pub(crate) arbiter: A,
    pub(crate) config: Config,
    pub(crate) card_type: CardType,
}

impl<'s, T: Transport> MmcSpi<'s, T> {
    /// Card in a hard-wired socket on a bus nobody else uses.
    pub fn new(transport: T, state: &'s DiskState) -> Self {
        Self::with_parts(transport, FixedSocket::new(), Exclusive, state, Config::default())
    }
}

impl<'s, T: Transport, S: Socket, A: BusArbiter> MmcSpi<'s, T, S, A> {
    pub fn with_parts(
        transport: T,
        socket: S,
        arbiter: A,
        state: &'s DiskState,
        config: Config,
    ) -> Self {
        Self {
            link: Link::new(transport, state, config.data_crc),
            socket,
            arbiter,
            config,
            card_type: CardType::empty(),
        }
    }

    pub fn status(&self) -> DiskStatus {
        self.link.state.status()
    }

    /// Card family found by the last successful `initialize()`, empty
    /// before that.
    pub fn card_type(&self) -> CardType {
        self.card_type
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Periodic 10 ms service using the driver's own socket.
    pub fn timer_tick(&mut self) {
        self.link.state.tick(&mut self.socket);
    }

    pub fn transport(&mut self) -> &mut T {
        &mut self.link.bus
    }

    pub fn socket(&mut self) -> &mut S {
        &mut self.socket
    }

    pub fn release(self) -> (T, S, A) {
        (self.link.bus, self.socket, self.arbiter)
    }

    /// Reads `count` sectors starting at `sector` into the front of `buf`.
    pub fn read(&mut self, buf: &mut [u8], sector: u32, count: u16) -> Result<(), Error> {
        let len = count as usize * SECTOR_SIZE;
        if count == 0 || buf.len() < len {
            return Err(Error::Parameter);
        }
        if self.status().contains(DiskStatus::UNINITIALIZED) {
            return Err(Error::NotReady);
        }

        let _bus = BusGuard::acquire(&mut self.arbiter);
        let link = &mut self.link;
        let address = self.card_type.address(sector);
        let blocks = &mut buf[..len];
        trace!("read {} sector(s) at {}", count, sector);

        let result = if count == 1 {
            link.command(Cmd::cmd17(address))
                .and_then(|()| link.receive_block(blocks))
        } else {
            link.command(Cmd::cmd18(address)).and_then(|()| {
                let received = blocks
                    .chunks_exact_mut(SECTOR_SIZE)
                    .try_for_each(|block| link.receive_block(block));
                link.send_command(Cmd::cmd12());
                received
            })
        };
        link.deselect();

        if let Err(e) = result {
            warn!("read at sector {} failed: {:?}", sector, e);
            return Err(e.into());
        }
        #[cfg(feature = "log-blocks")]
        for (i, block) in buf[..len].chunks_exact(SECTOR_SIZE).enumerate() {
            crate::fmt::dump_block("rd", sector.wrapping_add(i as u32), block);
        }
        Ok(())
    }

    /// Writes `count` sectors from the front of `buf` starting at `sector`.
    pub fn write(&mut self, buf: &[u8], sector: u32, count: u16) -> Result<(), Error> {
        let len = count as usize * SECTOR_SIZE;
        if count == 0 || buf.len() < len {
            return Err(Error::Parameter);
        }
        let status = self.status();
        if status.contains(DiskStatus::UNINITIALIZED) {
            return Err(Error::NotReady);
        }
        if status.contains(DiskStatus::WRITE_PROTECTED) {
            return Err(Error::WriteProtected);
        }

        let _bus = BusGuard::acquire(&mut self.arbiter);
        let link = &mut self.link;
        let address = self.card_type.address(sector);
        let blocks = &buf[..len];
        trace!("write {} sector(s) at {}", count, sector);
        #[cfg(feature = "log-blocks")]
        for (i, block) in blocks.chunks_exact(SECTOR_SIZE).enumerate() {
            crate::fmt::dump_block("wr", sector.wrapping_add(i as u32), block);
        }

        let result = if count == 1 {
            link.command(Cmd::cmd24(address))
                .and_then(|()| link.transmit_block(blocks, TOKEN_START_BLOCK))
        } else {
            if self.card_type.is_sd() {
                // pre-erase hint; a rejection only costs speed
                link.send_command(Cmd::acmd23(count as u32));
            }
            link.command(Cmd::cmd25(address)).and_then(|()| {
                let sent = blocks
                    .chunks_exact(SECTOR_SIZE)
                    .try_for_each(|block| link.transmit_block(block, TOKEN_START_MULTI));
                let stopped = link.transmit_stop();
                sent.and(stopped)
            })
        };
        link.deselect();

        result.map_err(|e| {
            warn!("write at sector {} failed: {:?}", sector, e);
            e.into()
        })
    }
}

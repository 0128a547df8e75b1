//! Command engine: chip-select handshake, wait-ready, command framing and
//! response polling.

use crate::command::{Cmd, R1, NO_RESPONSE};
use crate::config::DataCrc;
use crate::error::Fault;
use crate::timer::{Countdown, DiskState};
use crate::transport::Transport;

/// Bytes polled for a response before giving up.
const RESPONSE_ATTEMPTS: u8 = 10;
/// Wait-ready bound when (re)selecting the card or before a data packet.
pub(crate) const READY_MS: u32 = 500;

pub(crate) struct Link<'s, T> {
    pub(crate) bus: T,
    pub(crate) state: &'s DiskState,
    pub(crate) data_crc: DataCrc,
}

impl<'s, T: Transport> Link<'s, T> {
    pub fn new(bus: T, state: &'s DiskState, data_crc: DataCrc) -> Self {
        Self {
            bus,
            state,
            data_crc,
        }
    }

    pub fn exchange(&mut self, out: u8) -> u8 {
        self.bus.exchange(out)
    }

    /// Polls for an idle (all-ones) bus for up to `ms`.
    pub fn wait_ready(&mut self, ms: u32) -> bool {
        let bus = &mut self.bus;
        self.state
            .poll_until(Countdown::Ready, ms, || (bus.exchange(0xFF) == 0xFF).then_some(()))
            .is_some()
    }

    /// Raises chip select and clocks one byte so the card releases MISO.
    pub fn deselect(&mut self) {
        self.bus.deselect();
        self.bus.exchange(0xFF);
    }

    /// Lowers chip select and waits for the card to become ready.
    pub fn select(&mut self) -> bool {
        self.bus.select();
        self.bus.exchange(0xFF);
        if self.wait_ready(READY_MS) {
            return true;
        }

        self.deselect();
        false
    }

    /// Sends `cmd` and returns its R1, or [`NO_RESPONSE`].
    pub fn send_command(&mut self, cmd: Cmd) -> u8 {
        if cmd.app {
            let r1 = self.send_command(Cmd::cmd55());
            if r1 > R1::IDLE.bits() {
                trace!("APP_CMD ahead of ACMD{} rejected: {:02x}", cmd.index, r1);
                return r1;
            }
        }

        if !cmd.is_stop() {
            self.deselect();
            if !self.select() {
                debug!("CMD{}: card not ready", cmd.index);
                return NO_RESPONSE;
            }
        }

        self.bus.transmit_bulk(&cmd.frame());

        if cmd.is_stop() {
            // stuff byte
            self.bus.exchange(0xFF);
        }

        let mut r1 = NO_RESPONSE;
        for _ in 0..RESPONSE_ATTEMPTS {
            r1 = self.bus.exchange(0xFF);
            if r1 & 0x80 == 0 {
                break;
            }
        }
        r1
    }

    /// Sends `cmd` and requires a clean (all-zero) R1.
    pub fn command(&mut self, cmd: Cmd) -> Result<(), Fault> {
        match self.send_command(cmd) {
            0 => Ok(()),
            r1 => {
                debug!("CMD{} failed: {:02x}", cmd.index, r1);
                Err(Fault::from_r1(cmd.index, r1))
            }
        }
    }

    /// The four bytes trailing an R3/R7 response.
    pub fn receive_trailer(&mut self) -> [u8; 4] {
        let mut trailer = [0u8; 4];
        self.bus.receive_bulk(&mut trailer);
        trailer
    }
}

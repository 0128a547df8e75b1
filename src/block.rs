//! Token-framed data packets on top of the command engine.

use crc::{Crc, CRC_16_XMODEM};

use crate::config::DataCrc;
use crate::error::Fault;
use crate::link::{Link, READY_MS};
use crate::timer::Countdown;
use crate::transport::Transport;
use crate::SECTOR_SIZE;

/// Start of a single-block read/write or of a multi-block read packet.
pub(crate) const TOKEN_START_BLOCK: u8 = 0xFE;
/// Start of each packet in a multi-block write.
pub(crate) const TOKEN_START_MULTI: u8 = 0xFC;
/// Ends a multi-block write.
pub(crate) const TOKEN_STOP_TRAN: u8 = 0xFD;

const DATA_RESPONSE_MASK: u8 = 0x1F;
const DATA_ACCEPTED: u8 = 0x05;

/// Bound on the wait for the start-block token.
pub(crate) const TOKEN_MS: u32 = 200;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

impl<'s, T: Transport> Link<'s, T> {
    /// Receives one data packet of exactly `buf.len()` bytes.
    pub fn receive_block(&mut self, buf: &mut [u8]) -> Result<(), Fault> {
        let len = buf.len();
        self.receive_packet(buf, len, TOKEN_MS)
    }

    /// Receives a `packet_len`-byte data packet, keeping only the leading
    /// `buf.len()` bytes.
    pub fn receive_packet(
        &mut self,
        buf: &mut [u8],
        packet_len: usize,
        token_ms: u32,
    ) -> Result<(), Fault> {
        let bus = &mut self.bus;
        let token = self.state.poll_until(Countdown::Data, token_ms, || {
            let token = bus.exchange(0xFF);
            (token != 0xFF).then_some(token)
        });
        match token {
            Some(TOKEN_START_BLOCK) => {}
            Some(token) => {
                debug!("unexpected data token {:02x}", token);
                return Err(Fault::Token(token));
            }
            None => {
                debug!("no data token within {} ms", token_ms);
                return Err(Fault::Timeout);
            }
        }

        self.bus.receive_bulk(buf);
        for _ in buf.len()..packet_len {
            self.bus.exchange(0xFF);
        }
        let crc = u16::from_be_bytes([self.bus.exchange(0xFF), self.bus.exchange(0xFF)]);

        if self.data_crc == DataCrc::Verify && buf.len() == packet_len {
            let actual = CRC16.checksum(buf);
            if actual != crc {
                warn!("data crc mismatch: card {:04x}, host {:04x}", crc, actual);
                return Err(Fault::DataCrc {
                    expected: crc,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Sends one 512-byte packet behind `token` and checks the data response.
    pub fn transmit_block(&mut self, block: &[u8], token: u8) -> Result<(), Fault> {
        if !self.wait_ready(READY_MS) {
            return Err(Fault::Timeout);
        }

        self.bus.exchange(token);
        self.bus.transmit_bulk(&block[..SECTOR_SIZE]);
        // CRC is not checked by the card in SPI mode
        self.bus.exchange(0xFF);
        self.bus.exchange(0xFF);

        self.data_response()
    }

    /// Reads the data-response token that follows a written packet.
    pub fn data_response(&mut self) -> Result<(), Fault> {
        let response = self.bus.exchange(0xFF);
        if response & DATA_RESPONSE_MASK != DATA_ACCEPTED {
            debug!("write rejected: {:02x}", response);
            return Err(Fault::WriteRejected(response));
        }
        Ok(())
    }

    /// Ends a multi-block write.
    pub fn transmit_stop(&mut self) -> Result<(), Fault> {
        if !self.wait_ready(READY_MS) {
            return Err(Fault::Timeout);
        }
        self.bus.exchange(TOKEN_STOP_TRAN);
        Ok(())
    }
}

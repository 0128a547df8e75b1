//! Byte and bulk exchange on the serial bus.
//!
//! Transport operations never fail: a broken bus reads as an idle (all-ones)
//! line and the protocol layer above notices the missing response or token.

use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;
use fugit::HertzU32;

pub trait Transport {
    /// Full-duplex exchange of one byte.
    fn exchange(&mut self, out: u8) -> u8;

    /// Clocks in `buf.len()` bytes with MOSI held high.
    fn receive_bulk(&mut self, buf: &mut [u8]) {
        for byte in buf.iter_mut() {
            *byte = self.exchange(0xFF);
        }
    }

    /// Clocks out `buf`, discarding whatever comes back.
    fn transmit_bulk(&mut self, buf: &[u8]) {
        for &byte in buf {
            self.exchange(byte);
        }
    }

    /// Drive chip select low.
    fn select(&mut self);

    /// Drive chip select high.
    fn deselect(&mut self);

    fn set_clock(&mut self, freq: HertzU32);
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn exchange(&mut self, out: u8) -> u8 {
        (**self).exchange(out)
    }

    fn receive_bulk(&mut self, buf: &mut [u8]) {
        (**self).receive_bulk(buf)
    }

    fn transmit_bulk(&mut self, buf: &[u8]) {
        (**self).transmit_bulk(buf)
    }

    fn select(&mut self) {
        (**self).select()
    }

    fn deselect(&mut self) {
        (**self).deselect()
    }

    fn set_clock(&mut self, freq: HertzU32) {
        (**self).set_clock(freq)
    }
}

/// Retunes the SPI peripheral clock. embedded-hal has no notion of bus
/// frequency, so the platform supplies this.
pub trait BusClock {
    fn set_frequency(&mut self, freq: HertzU32);
}

/// Fixed-rate bus.
impl BusClock for () {
    fn set_frequency(&mut self, _freq: HertzU32) {}
}

/// Polled transport over an embedded-hal SPI bus and a chip-select pin.
pub struct SpiTransport<SPI, CS, CLK = ()> {
    spi: SPI,
    cs: CS,
    clock: CLK,
}

impl<SPI, CS> SpiTransport<SPI, CS, ()>
where
    SPI: SpiBus,
    CS: OutputPin,
{
    pub fn new(spi: SPI, cs: CS) -> Self {
        Self::with_clock(spi, cs, ())
    }
}

impl<SPI, CS, CLK> SpiTransport<SPI, CS, CLK>
where
    SPI: SpiBus,
    CS: OutputPin,
    CLK: BusClock,
{
    pub fn with_clock(spi: SPI, cs: CS, clock: CLK) -> Self {
        Self { spi, cs, clock }
    }

    pub fn release(self) -> (SPI, CS, CLK) {
        (self.spi, self.cs, self.clock)
    }

    fn transfer(&mut self, buf: &mut [u8]) {
        let result = self
            .spi
            .transfer_in_place(buf)
            .and_then(|_| self.spi.flush());
        if result.is_err() {
            warn!("spi transfer of {} bytes failed", buf.len());
            buf.fill(0xFF);
        }
    }
}

impl<SPI, CS, CLK> Transport for SpiTransport<SPI, CS, CLK>
where
    SPI: SpiBus,
    CS: OutputPin,
    CLK: BusClock,
{
    fn exchange(&mut self, out: u8) -> u8 {
        let mut buf = [out];
        self.transfer(&mut buf);
        buf[0]
    }

    fn receive_bulk(&mut self, buf: &mut [u8]) {
        // SpiBus::read leaves MOSI content unspecified; the card wants ones
        buf.fill(0xFF);
        self.transfer(buf);
    }

    fn transmit_bulk(&mut self, buf: &[u8]) {
        if self.spi.write(buf).and_then(|_| self.spi.flush()).is_err() {
            warn!("spi write of {} bytes failed", buf.len());
        }
    }

    fn select(&mut self) {
        if self.cs.set_low().is_err() {
            warn!("chip select low failed");
        }
    }

    fn deselect(&mut self) {
        if self.cs.set_high().is_err() {
            warn!("chip select high failed");
        }
    }

    fn set_clock(&mut self, freq: HertzU32) {
        debug!("bus clock {} Hz", freq.raw());
        self.clock.set_frequency(freq);
    }
}
